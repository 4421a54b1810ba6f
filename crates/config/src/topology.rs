// SPDX-License-Identifier: Apache-2.0

//! Topology validator and healer.
//!
//! The validator derives each component's *effective role* (source,
//! transformer, sink) from its ports and edges, never from its declared type
//! alone. The declared type is a tiebreaker, applied only when the structure
//! is silent. Contradictions between a `terminal` flag and the observed
//! topology are hard lints that abort the build with `ADR033-*` rule codes.
//!
//! When a source cannot reach any sink, the healer performs exactly one
//! bounded reconciliation pass: it walks to the nearest dangling tail of the
//! unreachable source and adds a binding to the best sink candidate. Added
//! bindings are tagged `generated_by: reconciliation`. Running the validator
//! on its own output adds no further edges.

use crate::blueprint::{Binding, BindingEndpoint, Blueprint, GeneratedBy};
use crate::error::Error;
use crate::{ComponentId, PortName, TypeName};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

/// The role a component actually plays in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveRole {
    /// Produces messages; no inputs.
    Source,
    /// Consumes and produces.
    Transformer,
    /// Consumes messages; no outputs.
    Sink,
}

impl fmt::Display for EffectiveRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EffectiveRole::Source => "SOURCE",
            EffectiveRole::Transformer => "TRANSFORMER",
            EffectiveRole::Sink => "SINK",
        };
        f.write_str(label)
    }
}

/// The reconciled view of one component's role.
#[derive(Debug, Clone, Serialize)]
pub struct RoleView {
    /// The type declared in the blueprint.
    pub declared_role: TypeName,
    /// The role derived from ports and edges.
    pub effective_role: EffectiveRole,
    /// The inference rules that fired, in order.
    pub reasons: Vec<String>,
}

/// Rule codes for hard lints raised by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LintCode {
    /// `terminal: true` on a component with outgoing bindings.
    TerminalContradiction,
    /// `terminal: true` on a component with declared output ports.
    TerminalOutputs,
    /// No component plays the SOURCE role after reconciliation.
    NoSource,
    /// No component plays the SINK role after reconciliation.
    NoSink,
    /// A SOURCE cannot reach any SINK, even after reconciliation.
    NoSinkPath,
}

impl LintCode {
    /// The published rule code cited in lint reports.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            LintCode::TerminalContradiction => "ADR033-R4-TERM-CONTRA",
            LintCode::TerminalOutputs => "ADR033-R8-TERM-OUTPUTS",
            LintCode::NoSource => "ADR033-R5-NO-SOURCE",
            LintCode::NoSink => "ADR033-R6-NO-SINK",
            LintCode::NoSinkPath => "ADR033-R7-NO-SINK-PATH",
        }
    }
}

impl fmt::Display for LintCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One hard lint raised by the validator.
#[derive(Debug, Clone, Serialize)]
pub struct Lint {
    /// The rule code.
    pub code: LintCode,
    /// The offending component, when the lint is component-scoped.
    pub component: Option<ComponentId>,
    /// Human-readable explanation.
    pub message: String,
}

/// The structured lint report cited in build failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LintReport {
    /// All lints raised, in deterministic order.
    pub lints: Vec<Lint>,
}

impl LintReport {
    /// Returns `true` if no lints were raised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lints.is_empty()
    }

    /// Lint counts keyed by rule code.
    #[must_use]
    pub fn counts_by_code(&self) -> BTreeMap<&'static str, u64> {
        let mut counts = BTreeMap::new();
        for lint in &self.lints {
            *counts.entry(lint.code.code()).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for LintReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lint in &self.lints {
            match &lint.component {
                Some(component) => {
                    writeln!(f, "[{}] {}: {}", lint.code, component, lint.message)?;
                }
                None => writeln!(f, "[{}] {}", lint.code, lint.message)?,
            }
        }
        Ok(())
    }
}

/// Counters describing what the validator and healer did.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HealerStats {
    /// Components whose effective role differs from their declared-type prior.
    pub role_flips: u64,
    /// Bindings added by the reconciliation pass.
    pub reconciliation_edges_added: u64,
    /// Sources whose sink path was repaired by reconciliation.
    pub reconciliation_sources_fixed: u64,
}

/// Options steering the healer.
#[derive(Debug, Clone, Copy)]
pub struct HealerOptions {
    /// Rollout stop-gap: treat declared `Store` components as valid SINK
    /// candidates for binding generation even before their ports are
    /// materialized. Removed after validated rollout.
    pub store_as_sink: bool,
}

impl Default for HealerOptions {
    fn default() -> Self {
        Self {
            store_as_sink: true,
        }
    }
}

/// The outcome of a validation/heal run.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyReport {
    /// Role view per component.
    pub roles: BTreeMap<ComponentId, RoleView>,
    /// Bindings added by reconciliation (also appended to the blueprint when
    /// healing in place).
    pub added_bindings: Vec<Binding>,
    /// Hard lints raised (empty on success).
    pub lint_report: LintReport,
    /// Healer counters.
    pub stats: HealerStats,
}

/// Type priors used as tiebreakers when the structure is silent (rule R5).
fn type_prior(declared: &str) -> Option<EffectiveRole> {
    match declared {
        "Store" | "Sink" | "APIEndpoint" => Some(EffectiveRole::Sink),
        "Transformer" | "Model" | "StreamProcessor" => Some(EffectiveRole::Transformer),
        "Source" => Some(EffectiveRole::Source),
        _ => None,
    }
}

/// Derives the effective role of every component from ports and edges.
///
/// Rules, applied in order per component:
/// - R1/R2: declared outputs or outgoing bindings make the component a
///   producer; with no inputs at all it is a SOURCE, otherwise a TRANSFORMER.
/// - R3: no outputs and no outgoing bindings make it a SINK.
/// - R5: when the component has no ports and no edges (recipe-backed nodes
///   before expansion), the declared-type prior breaks the tie; without a
///   prior, R3 applies.
#[must_use]
pub fn infer_roles(bp: &Blueprint) -> BTreeMap<ComponentId, RoleView> {
    let mut roles = BTreeMap::new();
    for (id, spec) in &bp.components {
        let out_degree = bp.out_degree(id);
        let in_degree = bp.in_degree(id);
        let has_outputs = !spec.outputs.is_empty() || out_degree > 0;
        let has_inputs = !spec.inputs.is_empty() || in_degree > 0;

        let mut reasons = Vec::new();
        if !spec.outputs.is_empty() {
            reasons.push("R1: declared outputs".to_string());
        }
        if out_degree > 0 {
            reasons.push("R2: out_degree > 0".to_string());
        }

        let effective_role = match (has_outputs, has_inputs) {
            (true, false) => {
                reasons.push("no inputs: producing end of the graph".to_string());
                EffectiveRole::Source
            }
            (true, true) => EffectiveRole::Transformer,
            (false, true) => {
                reasons.push("R3: no outputs and out_degree = 0".to_string());
                EffectiveRole::Sink
            }
            (false, false) => match type_prior(&spec.r#type) {
                Some(prior) => {
                    reasons.push(format!("R5: type prior for `{}`", spec.r#type));
                    prior
                }
                None => {
                    reasons.push("R3: no outputs and out_degree = 0".to_string());
                    EffectiveRole::Sink
                }
            },
        };

        let _ = roles.insert(
            id.clone(),
            RoleView {
                declared_role: spec.r#type.clone(),
                effective_role,
                reasons,
            },
        );
    }
    roles
}

/// Validates the topology without modifying the blueprint.
///
/// Equivalent to [`heal`] on a scratch copy; the report's `added_bindings`
/// shows what reconciliation *would* add.
///
/// # Errors
///
/// Returns [`Error::LintFailed`] when any hard lint fires.
pub fn validate(bp: &Blueprint, options: &HealerOptions) -> Result<TopologyReport, Error> {
    let mut scratch = bp.clone();
    heal(&mut scratch, options)
}

/// Validates the topology and performs the single bounded reconciliation
/// pass, appending any generated bindings to the blueprint.
///
/// # Errors
///
/// Returns [`Error::LintFailed`] when any hard lint fires; the blueprint is
/// left untouched in that case except for lint-free reconciliation edges
/// added before the failure was detected (callers treat a lint failure as
/// fatal and discard the blueprint).
pub fn heal(bp: &mut Blueprint, options: &HealerOptions) -> Result<TopologyReport, Error> {
    let mut lints = Vec::new();

    // Terminal contradictions are structural and abort before reconciliation.
    for (id, spec) in &bp.components {
        if !spec.terminal {
            continue;
        }
        if !spec.outputs.is_empty() {
            lints.push(Lint {
                code: LintCode::TerminalOutputs,
                component: Some(id.clone()),
                message: format!(
                    "terminal component declares output ports {:?}",
                    spec.outputs.iter().map(|p| p.name.clone()).collect::<Vec<_>>()
                ),
            });
        }
        let out_degree = bp.out_degree(id);
        if out_degree > 0 {
            lints.push(Lint {
                code: LintCode::TerminalContradiction,
                component: Some(id.clone()),
                message: format!("terminal component has out_degree {out_degree}"),
            });
        }
    }
    if !lints.is_empty() {
        return Err(Error::LintFailed {
            report: LintReport { lints },
        });
    }

    let mut roles = infer_roles(bp);
    let mut stats = HealerStats::default();
    for view in roles.values() {
        if let Some(prior) = type_prior(&view.declared_role) {
            if prior != view.effective_role {
                stats.role_flips += 1;
            }
        }
    }

    // Single bounded reconciliation pass: repair sources with no sink path.
    let mut added_bindings = Vec::new();
    let unreachable: Vec<ComponentId> = roles
        .iter()
        .filter(|(_, v)| v.effective_role == EffectiveRole::Source)
        .map(|(id, _)| id.clone())
        .filter(|id| !reaches_sink(bp, &roles, options, id))
        .collect();

    for source in &unreachable {
        if let Some(binding) = reconcile_source(bp, &roles, options, source) {
            bp.bindings.push(binding.clone());
            added_bindings.push(binding);
            stats.reconciliation_edges_added += 1;
        }
    }
    if !added_bindings.is_empty() {
        // Roles may have shifted for components that gained edges.
        roles = infer_roles(bp);
    }

    // Post-reconciliation invariants.
    let has_source = roles
        .values()
        .any(|v| v.effective_role == EffectiveRole::Source);
    let has_sink = bp
        .components
        .keys()
        .any(|id| is_sink_like(bp, &roles, options, id));
    if !has_source {
        lints.push(Lint {
            code: LintCode::NoSource,
            component: None,
            message: "system has no SOURCE after reconciliation".to_string(),
        });
    }
    if !has_sink {
        lints.push(Lint {
            code: LintCode::NoSink,
            component: None,
            message: "system has no SINK after reconciliation".to_string(),
        });
    }
    for source in unreachable {
        if reaches_sink(bp, &roles, options, &source) {
            stats.reconciliation_sources_fixed += 1;
        } else {
            lints.push(Lint {
                code: LintCode::NoSinkPath,
                component: Some(source.clone()),
                message: "SOURCE cannot reach any SINK after reconciliation".to_string(),
            });
        }
    }

    let lint_report = LintReport { lints };
    if !lint_report.is_empty() {
        return Err(Error::LintFailed {
            report: lint_report,
        });
    }

    Ok(TopologyReport {
        roles,
        added_bindings,
        lint_report,
        stats,
    })
}

/// A node that terminates a dataflow path: an effective SINK, or, under the
/// `store_as_sink` stop-gap, any declared `Store`.
fn is_sink_like(
    bp: &Blueprint,
    roles: &BTreeMap<ComponentId, RoleView>,
    options: &HealerOptions,
    id: &ComponentId,
) -> bool {
    if roles
        .get(id)
        .is_some_and(|v| v.effective_role == EffectiveRole::Sink)
    {
        return true;
    }
    options.store_as_sink
        && bp
            .components
            .get(id)
            .is_some_and(|spec| spec.r#type == "Store")
}

fn reaches_sink(
    bp: &Blueprint,
    roles: &BTreeMap<ComponentId, RoleView>,
    options: &HealerOptions,
    from: &ComponentId,
) -> bool {
    let mut queue = VecDeque::from([from.clone()]);
    let mut seen = HashSet::new();
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if node != *from && is_sink_like(bp, roles, options, &node) {
            return true;
        }
        for succ in bp.successors(&node) {
            queue.push_back(succ);
        }
    }
    false
}

/// Finds the repair binding for one unreachable source: from its nearest
/// dangling tail to the best sink candidate.
fn reconcile_source(
    bp: &Blueprint,
    roles: &BTreeMap<ComponentId, RoleView>,
    options: &HealerOptions,
    source: &ComponentId,
) -> Option<Binding> {
    // BFS for the nearest dangling tail: reachable, no outgoing bindings, not
    // a sink. Terminal components are excluded (an added out-edge would
    // violate R4). Ties at the same depth break alphabetically.
    let mut queue = VecDeque::from([(source.clone(), 0usize)]);
    let mut seen = HashSet::new();
    let mut tails: Vec<(usize, ComponentId)> = Vec::new();
    while let Some((node, depth)) = queue.pop_front() {
        if !seen.insert(node.clone()) {
            continue;
        }
        let spec = bp.components.get(&node)?;
        let is_tail = bp.out_degree(&node) == 0
            && !spec.terminal
            && !is_sink_like(bp, roles, options, &node);
        if is_tail {
            tails.push((depth, node.clone()));
        }
        for succ in bp.successors(&node) {
            queue.push_back((succ, depth + 1));
        }
    }
    tails.sort();
    let (_, tail) = tails.first()?.clone();

    // Sink candidates, preferring Store/Sink/APIEndpoint declared types, then
    // least contention (fewest in-edges), then name.
    let preference = |declared: &str| -> u8 {
        match declared {
            "Store" => 0,
            "Sink" => 1,
            "APIEndpoint" => 2,
            _ => 3,
        }
    };
    let mut candidates: Vec<(u8, usize, ComponentId)> = bp
        .components
        .iter()
        .filter(|(id, _)| **id != tail)
        .filter(|(id, _)| is_sink_like(bp, roles, options, id))
        .map(|(id, spec)| (preference(&spec.r#type), bp.in_degree(id), id.clone()))
        .collect();
    candidates.sort();
    let (_, _, candidate) = candidates.first()?.clone();

    let tail_spec = bp.components.get(&tail)?;
    let out_port: PortName = tail_spec
        .outputs
        .iter()
        .map(|p| p.name.clone())
        .min()
        .unwrap_or_else(|| "out".into());
    let candidate_spec = bp.components.get(&candidate)?;
    let in_port: PortName = candidate_spec
        .inputs
        .iter()
        .map(|p| p.name.clone())
        .min()
        .unwrap_or_else(|| "in".into());

    Some(Binding {
        from: BindingEndpoint::new(tail, out_port),
        to: BindingEndpoint::new(candidate, in_port),
        generated_by: GeneratedBy::Reconciliation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{BlueprintBuilder, ComponentSpec, PortSpec};
    use crate::schema::Schema;

    fn port(name: &'static str) -> PortSpec {
        PortSpec::new(name, Schema::any("any"))
    }

    fn skeleton() -> Blueprint {
        BlueprintBuilder::new("skeleton")
            .add_component(
                "api_source",
                ComponentSpec::new("Source").with_output(port("out")),
            )
            .add_component(
                "filter",
                ComponentSpec::new("Filter")
                    .with_input(port("in"))
                    .with_output(port("out")),
            )
            .add_component("store", ComponentSpec::new("Store").with_input(port("in")))
            .connect("api_source.out", "filter.in")
            .connect("filter.out", "store.in")
            .build()
            .expect("valid blueprint")
    }

    #[test]
    fn roles_follow_port_topology() {
        let bp = skeleton();
        let report = validate(&bp, &HealerOptions::default()).expect("valid topology");

        assert_eq!(
            report.roles["api_source"].effective_role,
            EffectiveRole::Source
        );
        assert_eq!(
            report.roles["filter"].effective_role,
            EffectiveRole::Transformer
        );
        assert_eq!(report.roles["store"].effective_role, EffectiveRole::Sink);
        assert!(report.added_bindings.is_empty());
        assert_eq!(report.stats.reconciliation_edges_added, 0);
    }

    #[test]
    fn terminal_with_outputs_is_fatal() {
        let bp = BlueprintBuilder::new("bad")
            .add_component(
                "src",
                ComponentSpec::new("Source").with_output(port("out")),
            )
            .add_component(
                "odd",
                ComponentSpec::new("Store")
                    .with_input(port("in"))
                    .with_output(port("x"))
                    .with_terminal(true),
            )
            .connect("src.out", "odd.in")
            .build()
            .expect("builds before topology check");

        match validate(&bp, &HealerOptions::default()) {
            Err(Error::LintFailed { report }) => {
                assert!(report
                    .lints
                    .iter()
                    .any(|l| l.code == LintCode::TerminalOutputs));
                assert!(format!("{report}").contains("ADR033-R8-TERM-OUTPUTS"));
            }
            other => panic!("expected LintFailed, got {other:?}"),
        }
    }

    #[test]
    fn terminal_with_out_degree_is_fatal() {
        let bp = BlueprintBuilder::new("bad")
            .add_component(
                "a",
                ComponentSpec::new("Source")
                    .with_output(port("out"))
                    .with_terminal(true),
            )
            .add_component("b", ComponentSpec::new("Store").with_input(port("in")))
            .connect("a.out", "b.in")
            .build()
            .expect("builds before topology check");

        match validate(&bp, &HealerOptions::default()) {
            Err(Error::LintFailed { report }) => {
                assert!(report
                    .lints
                    .iter()
                    .any(|l| l.code == LintCode::TerminalContradiction));
            }
            other => panic!("expected LintFailed, got {other:?}"),
        }
    }

    #[test]
    fn reconciliation_connects_dangling_tail_to_store() {
        // src -> hanging transformer; store exists but is unbound.
        let mut bp = BlueprintBuilder::new("heal-me")
            .add_component(
                "src",
                ComponentSpec::new("Source").with_output(port("out")),
            )
            .add_component(
                "xform",
                ComponentSpec::new("Transformer")
                    .with_input(port("in"))
                    .with_output(port("out")),
            )
            .add_component("store", ComponentSpec::new("Store").with_input(port("in")))
            .connect("src.out", "xform.in")
            .build()
            .expect("valid blueprint");

        let report = heal(&mut bp, &HealerOptions::default()).expect("healable");
        assert_eq!(report.stats.reconciliation_edges_added, 1);
        assert_eq!(report.stats.reconciliation_sources_fixed, 1);
        let added = &report.added_bindings[0];
        assert_eq!(added.from.to_string(), "xform.out");
        assert_eq!(added.to.to_string(), "store.in");
        assert_eq!(added.generated_by, GeneratedBy::Reconciliation);

        // Idempotence: a second pass adds nothing.
        let report2 = heal(&mut bp, &HealerOptions::default()).expect("still valid");
        assert_eq!(report2.stats.reconciliation_edges_added, 0);
        assert!(report2.added_bindings.is_empty());
    }

    #[test]
    fn unreachable_source_without_candidates_is_fatal() {
        let bp = BlueprintBuilder::new("stuck")
            .add_component(
                "src",
                ComponentSpec::new("Source").with_output(port("out")),
            )
            .add_component(
                "xform",
                ComponentSpec::new("Transformer")
                    .with_input(port("in"))
                    .with_output(port("out")),
            )
            .connect("src.out", "xform.in")
            .build()
            .expect("valid blueprint");

        match validate(&bp, &HealerOptions::default()) {
            Err(Error::LintFailed { report }) => {
                let codes: Vec<_> = report.lints.iter().map(|l| l.code).collect();
                assert!(codes.contains(&LintCode::NoSinkPath));
            }
            other => panic!("expected LintFailed, got {other:?}"),
        }
    }

    #[test]
    fn recipe_backed_components_use_type_priors() {
        let bp = BlueprintBuilder::new("priors")
            .add_component(
                "ws",
                ComponentSpec::new("Source").with_recipe("websocket"),
            )
            .add_component("store", ComponentSpec::new("Store").with_recipe("store"))
            .build()
            .expect("valid blueprint");

        let report = validate(&bp, &HealerOptions::default()).expect("valid topology");
        assert_eq!(report.roles["ws"].effective_role, EffectiveRole::Source);
        assert_eq!(report.roles["store"].effective_role, EffectiveRole::Sink);
        // The healer wired the dangling source into the store.
        assert_eq!(report.added_bindings.len(), 1);
        assert_eq!(report.added_bindings[0].to.to_string(), "store.in");
    }

    #[test]
    fn store_as_sink_flag_gates_candidates() {
        let build = || {
            BlueprintBuilder::new("flagged")
                .add_component(
                    "src",
                    ComponentSpec::new("Source").with_output(port("out")),
                )
                .add_component(
                    "xform",
                    ComponentSpec::new("Transformer")
                        .with_input(port("in"))
                        .with_output(port("out")),
                )
                // Store with an output port: not structurally a sink.
                .add_component(
                    "store",
                    ComponentSpec::new("Store")
                        .with_input(port("in"))
                        .with_output(port("events")),
                )
                .connect("src.out", "xform.in")
                .build()
                .expect("valid blueprint")
        };

        // With the stop-gap on, the declared Store is accepted as a sink
        // candidate despite its output port.
        let mut bp = build();
        let report = heal(
            &mut bp,
            &HealerOptions {
                store_as_sink: true,
            },
        )
        .expect("healable with stop-gap");
        assert_eq!(report.added_bindings[0].to.component, "store");

        // With the stop-gap off there is no candidate and the lint fires.
        let bp = build();
        assert!(matches!(
            validate(
                &bp,
                &HealerOptions {
                    store_as_sink: false,
                }
            ),
            Err(Error::LintFailed { .. })
        ));
    }
}
