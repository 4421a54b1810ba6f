// SPDX-License-Identifier: Apache-2.0

//! Blueprint specification.
//!
//! A blueprint describes the interconnections between components: a directed
//! acyclic graph where each edge (binding) pairs exactly one OUT port with
//! exactly one IN port and is realized at runtime as a bounded FIFO channel.
//! Fan-out is expressed with multiple explicit OUT ports, never by sharing a
//! channel.

use crate::capability::{CapabilityBudgets, CapabilityTuning};
use crate::error::{Context, Error};
use crate::schema::Schema;
use crate::{ComponentId, Description, PortName, RecipeName, SystemId, TypeName};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Policy applied when a message is offered to a full channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowPolicy {
    /// Suspend the producer until capacity is available.
    #[default]
    Block,
    /// Suspend the producer for at most the port's `timeout_ms`.
    BlockWithTimeout,
    /// Remove the head element before enqueueing.
    DropOldest,
    /// Discard the incoming message.
    DropNewest,
}

/// Optional flow type hint carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// Producer-driven flow (the default for channel ports).
    Push,
    /// Consumer-driven flow.
    Pull,
    /// Request/response flow (ingress boundaries).
    ReqRsp,
}

/// Declared specification of a component port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PortSpec {
    /// Port name, snake_case, unique within its component.
    pub name: PortName,
    /// Schema of the messages carried by this port.
    #[serde(default = "default_port_schema")]
    pub schema: Schema,
    /// Channel capacity in messages (>= 1).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Overflow policy applied by the producing end.
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Bounded-wait duration for `BLOCK_WITH_TIMEOUT`, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional flow type hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_type: Option<FlowType>,
}

fn default_port_schema() -> Schema {
    Schema::any("any")
}

fn default_buffer_size() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    2_000
}

impl PortSpec {
    /// Creates a port spec with the default buffer size and policy.
    #[must_use]
    pub fn new<N: Into<PortName>>(name: N, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            buffer_size: default_buffer_size(),
            overflow_policy: OverflowPolicy::default(),
            timeout_ms: default_timeout_ms(),
            flow_type: None,
        }
    }

    /// Sets the buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Sets the overflow policy.
    #[must_use]
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Sets the bounded-wait duration used by `BLOCK_WITH_TIMEOUT`.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// User configuration for a component in the blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    /// The declared component type (e.g. `Store`, `Filter`, `APIEndpoint`).
    ///
    /// The type is advisory: the effective role (source / transformer / sink)
    /// is derived from ports and edges by the topology validator, with the
    /// type used only as a tiebreaker.
    pub r#type: TypeName,

    /// An optional description of this component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,

    /// Optional recipe reference; when present the expander materializes the
    /// component from the recipe registry and these ports become overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<RecipeName>,

    /// Declared input ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<PortSpec>,

    /// Declared output ports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PortSpec>,

    /// Marks a deliberate end of the dataflow. Only legal on components with
    /// no output ports and no outgoing bindings.
    #[serde(default)]
    pub terminal: bool,

    /// Capability tuning (kernel adjustments and opt-in extensions).
    #[serde(default)]
    pub capabilities: CapabilityTuning,

    /// Component-specific configuration, interpreted by the component itself
    /// (or by the recipe expander), not by the blueprint layer.
    #[serde(default)]
    pub config: Value,
}

impl ComponentSpec {
    /// Creates a component spec of the given declared type.
    pub fn new<T: AsRef<str>>(r#type: T) -> Self {
        Self {
            r#type: r#type.as_ref().to_owned().into(),
            description: None,
            recipe: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            terminal: false,
            capabilities: CapabilityTuning::default(),
            config: Value::Null,
        }
    }

    /// Sets the recipe reference.
    #[must_use]
    pub fn with_recipe<R: Into<RecipeName>>(mut self, recipe: R) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    /// Marks the component as terminal.
    #[must_use]
    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    /// Sets the component configuration.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Sets the capability tuning.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilityTuning) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Looks up a declared output port by name.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Looks up a declared input port by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }
}

/// One endpoint of a binding, addressed as `component.port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingEndpoint {
    /// The component owning the port.
    pub component: ComponentId,
    /// The port name.
    pub port: PortName,
}

impl BindingEndpoint {
    /// Creates an endpoint.
    pub fn new<C: Into<ComponentId>, P: Into<PortName>>(component: C, port: P) -> Self {
        Self {
            component: component.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for BindingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.port)
    }
}

impl FromStr for BindingEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((component, port)) if !component.is_empty() && !port.is_empty() => {
                Ok(BindingEndpoint::new(
                    component.to_owned(),
                    port.to_owned(),
                ))
            }
            _ => Err(Error::InvalidBindingEndpoint {
                selector: s.to_owned(),
            }),
        }
    }
}

impl Serialize for BindingEndpoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BindingEndpoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Provenance of a binding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedBy {
    /// Declared by the blueprint author.
    #[default]
    User,
    /// Added by the healer while building the initial graph.
    HealerInitial,
    /// Added by the single bounded reconciliation pass.
    Reconciliation,
}

/// A channel specification: one OUT port wired to one IN port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Binding {
    /// The producing endpoint, `component.out_port`.
    #[schemars(with = "String")]
    pub from: BindingEndpoint,
    /// The consuming endpoint, `component.in_port`.
    #[schemars(with = "String")]
    pub to: BindingEndpoint,
    /// Who generated this binding.
    #[serde(default)]
    pub generated_by: GeneratedBy,
}

/// Harness-level settings recognized by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    /// Graceful-drain grace period on shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Maximum consecutive picks from the same merger input.
    #[serde(default = "default_merger_fairness_window")]
    pub merger_fairness_window: usize,

    /// Capacity of each node control message channel.
    #[serde(default = "default_ctrl_channel_capacity")]
    pub control_channel_capacity: usize,

    /// Capacity of the node-to-harness control channel.
    #[serde(default = "default_ctrl_channel_capacity")]
    pub pipeline_ctrl_channel_capacity: usize,

    /// Seed for any component-level randomness (retry jitter, generators).
    /// Fixed seeds make two runs of the same topology produce identical
    /// output sequences.
    #[serde(default)]
    pub seed: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    30_000
}

fn default_merger_fairness_window() -> usize {
    8
}

fn default_ctrl_channel_capacity() -> usize {
    100
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
            merger_fairness_window: default_merger_fairness_window(),
            control_channel_capacity: default_ctrl_channel_capacity(),
            pipeline_ctrl_channel_capacity: default_ctrl_channel_capacity(),
            seed: 0,
        }
    }
}

/// A blueprint describing one system: components, bindings, budgets, settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    /// The system id.
    pub system: SystemId,

    /// An optional description of the system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Description>,

    /// All components, keyed by component id. The map is ordered so that
    /// iteration (and therefore wiring) is deterministic.
    pub components: BTreeMap<ComponentId, ComponentSpec>,

    /// All bindings.
    #[serde(default)]
    pub bindings: Vec<Binding>,

    /// Capability budget overrides; must stay within the published maxima.
    #[serde(default, skip_serializing_if = "CapabilityBudgets::is_empty")]
    pub capability_budgets: CapabilityBudgets,

    /// Harness settings.
    #[serde(default)]
    pub settings: HarnessSettings,
}

impl Blueprint {
    /// Create a new [`Blueprint`] from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if parsing or validation fails.
    pub fn from_json(json_str: &str) -> Result<Self, Error> {
        let bp: Blueprint =
            serde_json::from_str(json_str).map_err(|e| Error::DeserializationError {
                context: Context::default(),
                format: "JSON".to_string(),
                details: e.to_string(),
            })?;
        bp.validate()?;
        Ok(bp)
    }

    /// Create a new [`Blueprint`] from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if parsing or validation fails.
    pub fn from_yaml(yaml_str: &str) -> Result<Self, Error> {
        let bp: Blueprint =
            serde_yaml::from_str(yaml_str).map_err(|e| Error::DeserializationError {
                context: Context::default(),
                format: "YAML".to_string(),
                details: e.to_string(),
            })?;
        bp.validate()?;
        Ok(bp)
    }

    /// Load a [`Blueprint`] from a file, detecting the format from the
    /// extension (`.json`, `.yaml`, `.yml`).
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        let read = || {
            std::fs::read_to_string(path).map_err(|e| Error::FileReadError {
                context: Context::default(),
                details: e.to_string(),
            })
        };

        match extension.as_deref() {
            Some("json") => Self::from_json(&read()?),
            Some("yaml") | Some("yml") => Self::from_yaml(&read()?),
            _ => Err(Error::FileReadError {
                context: Context::default(),
                details: format!(
                    "Unsupported file extension: {}. Supported extensions are: .json, .yaml, .yml",
                    extension.unwrap_or_else(|| "<none>".to_string())
                ),
            }),
        }
    }

    /// The context used for error reporting.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::new(self.system.clone())
    }

    /// Out-degree of a component: the number of bindings leaving it.
    #[must_use]
    pub fn out_degree(&self, component: &ComponentId) -> usize {
        self.bindings
            .iter()
            .filter(|b| &b.from.component == component)
            .count()
    }

    /// In-degree of a component: the number of bindings entering it.
    #[must_use]
    pub fn in_degree(&self, component: &ComponentId) -> usize {
        self.bindings
            .iter()
            .filter(|b| &b.to.component == component)
            .count()
    }

    /// Downstream neighbors of a component, deduplicated, in binding order.
    #[must_use]
    pub fn successors(&self, component: &ComponentId) -> Vec<ComponentId> {
        let mut seen = HashSet::new();
        self.bindings
            .iter()
            .filter(|b| &b.from.component == component)
            .filter(|b| seen.insert(b.to.component.clone()))
            .map(|b| b.to.component.clone())
            .collect()
    }

    /// Validate the blueprint.
    ///
    /// This method checks for:
    /// - Bindings referencing unknown components or undeclared ports
    /// - Ports bound to more than one channel
    /// - Schema incompatibilities across bindings
    /// - Components without a recipe and without any port
    /// - Cycles in the port graph
    ///
    /// All problems are collected into a single
    /// [`Error::InvalidConfiguration`] so callers see every issue at once.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        let context = || self.context();

        for (id, spec) in &self.components {
            if spec.recipe.is_none() && spec.inputs.is_empty() && spec.outputs.is_empty() {
                errors.push(Error::InvalidUserConfig {
                    error: format!("component `{id}` declares no ports and no recipe"),
                });
            }
        }

        let mut bound_out = HashSet::new();
        let mut bound_in = HashSet::new();
        for binding in &self.bindings {
            let from_spec = match self.components.get(&binding.from.component) {
                Some(spec) => spec,
                None => {
                    errors.push(Error::UnknownComponent {
                        context: context(),
                        component_id: binding.from.component.clone(),
                    });
                    continue;
                }
            };
            let to_spec = match self.components.get(&binding.to.component) {
                Some(spec) => spec,
                None => {
                    errors.push(Error::UnknownComponent {
                        context: context(),
                        component_id: binding.to.component.clone(),
                    });
                    continue;
                }
            };

            // Recipe-backed components may leave ports implicit; the expander
            // materializes them before wiring, so only declared ports are
            // checked here.
            let out_port = from_spec.output(&binding.from.port);
            if from_spec.recipe.is_none() && out_port.is_none() {
                errors.push(Error::UnknownPort {
                    context: context(),
                    component_id: binding.from.component.clone(),
                    port: binding.from.port.clone(),
                    declared: from_spec.outputs.iter().map(|p| p.name.clone()).collect(),
                });
            }
            let in_port = to_spec.input(&binding.to.port);
            if to_spec.recipe.is_none() && in_port.is_none() {
                errors.push(Error::UnknownPort {
                    context: context(),
                    component_id: binding.to.component.clone(),
                    port: binding.to.port.clone(),
                    declared: to_spec.inputs.iter().map(|p| p.name.clone()).collect(),
                });
            }

            if !bound_out.insert(binding.from.clone()) {
                errors.push(Error::DuplicateBinding {
                    context: context(),
                    source_component: binding.from.component.clone(),
                    port: binding.from.port.clone(),
                });
            }
            if !bound_in.insert(binding.to.clone()) {
                errors.push(Error::DuplicateBinding {
                    context: context(),
                    source_component: binding.to.component.clone(),
                    port: binding.to.port.clone(),
                });
            }

            if let (Some(out_port), Some(in_port)) = (out_port, in_port) {
                if let Err(details) = in_port.schema.accepts(&out_port.schema) {
                    errors.push(Error::SchemaMismatch {
                        context: context(),
                        source_component: binding.from.component.clone(),
                        out_port: binding.from.port.clone(),
                        target: binding.to.component.clone(),
                        in_port: binding.to.port.clone(),
                        details,
                    });
                }
            }
        }

        // Check for cycles if no errors so far
        if errors.is_empty() {
            for cycle in self.detect_cycles() {
                errors.push(Error::CycleDetected {
                    context: context(),
                    components: cycle,
                });
            }
        }

        if !errors.is_empty() {
            Err(Error::InvalidConfiguration { errors })
        } else {
            Ok(())
        }
    }

    fn detect_cycles(&self) -> Vec<Vec<ComponentId>> {
        fn visit(
            node: &ComponentId,
            bp: &Blueprint,
            visiting: &mut HashSet<ComponentId>,
            visited: &mut HashSet<ComponentId>,
            current_path: &mut Vec<ComponentId>,
            cycles: &mut Vec<Vec<ComponentId>>,
        ) {
            if visited.contains(node) {
                return;
            }
            if visiting.contains(node) {
                // Cycle found
                if let Some(pos) = current_path.iter().position(|n| n == node) {
                    cycles.push(current_path[pos..].to_vec());
                }
                return;
            }
            let _ = visiting.insert(node.clone());
            current_path.push(node.clone());

            for succ in bp.successors(node) {
                visit(&succ, bp, visiting, visited, current_path, cycles);
            }

            let _ = visiting.remove(node);
            let _ = visited.insert(node.clone());
            let _ = current_path.pop();
        }

        let mut visiting = HashSet::new();
        let mut current_path = Vec::new();
        let mut visited = HashSet::new();
        let mut cycles = Vec::new();

        for node in self.components.keys() {
            if !visited.contains(node) {
                visit(
                    node,
                    self,
                    &mut visiting,
                    &mut visited,
                    &mut current_path,
                    &mut cycles,
                );
            }
        }

        cycles
    }
}

/// A builder for constructing a [`Blueprint`].
///
/// All problems (duplicate components, malformed endpoints, unknown
/// references, cycles) are collected and reported together by
/// [`BlueprintBuilder::build`], rather than failing fast on the first error.
pub struct BlueprintBuilder {
    system: SystemId,
    description: Option<Description>,
    components: BTreeMap<ComponentId, ComponentSpec>,
    duplicate_components: Vec<ComponentId>,
    pending_bindings: Vec<(String, String, GeneratedBy)>,
    settings: HarnessSettings,
    capability_budgets: CapabilityBudgets,
}

impl BlueprintBuilder {
    /// Create a new blueprint builder for the given system id.
    pub fn new<S: Into<SystemId>>(system: S) -> Self {
        Self {
            system: system.into(),
            description: None,
            components: BTreeMap::new(),
            duplicate_components: Vec::new(),
            pending_bindings: Vec::new(),
            settings: HarnessSettings::default(),
            capability_budgets: CapabilityBudgets::default(),
        }
    }

    /// Set the description of the system.
    #[must_use]
    pub fn description<D: Into<Description>>(mut self, description: D) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Override the harness settings.
    #[must_use]
    pub fn settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the capability budget overrides.
    #[must_use]
    pub fn capability_budgets(mut self, budgets: CapabilityBudgets) -> Self {
        self.capability_budgets = budgets;
        self
    }

    /// Add a component with the given id.
    #[must_use]
    pub fn add_component<S: Into<ComponentId>>(mut self, id: S, spec: ComponentSpec) -> Self {
        let id = id.into();
        if self.components.contains_key(&id) {
            self.duplicate_components.push(id);
        } else {
            let _ = self.components.insert(id, spec);
        }
        self
    }

    /// Connect `from` (`component.out_port`) to `to` (`component.in_port`).
    #[must_use]
    pub fn connect<F: Into<String>, T: Into<String>>(mut self, from: F, to: T) -> Self {
        self.pending_bindings
            .push((from.into(), to.into(), GeneratedBy::User));
        self
    }

    /// Validate and build the blueprint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] carrying every problem found.
    pub fn build(self) -> Result<Blueprint, Error> {
        let mut errors = Vec::new();

        for component_id in &self.duplicate_components {
            errors.push(Error::DuplicateComponent {
                context: Context::new(self.system.clone()),
                component_id: component_id.clone(),
            });
        }

        let mut bindings = Vec::new();
        for (from, to, generated_by) in self.pending_bindings {
            let from = match from.parse::<BindingEndpoint>() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let to = match to.parse::<BindingEndpoint>() {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            bindings.push(Binding {
                from,
                to,
                generated_by,
            });
        }

        if !errors.is_empty() {
            return Err(Error::InvalidConfiguration { errors });
        }

        let bp = Blueprint {
            system: self.system,
            description: self.description,
            components: self.components,
            bindings,
            capability_budgets: self.capability_budgets,
            settings: self.settings,
        };
        bp.validate()?;
        Ok(bp)
    }
}
