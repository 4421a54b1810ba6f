// SPDX-License-Identifier: Apache-2.0

//! Harness / supervisor.
//!
//! Deterministic start-up, wiring, shutdown, and failure surfacing:
//!
//! - Components are started in a *stable* topological order (ties broken
//!   alphabetically by component name) — a determinism requirement.
//! - One bounded channel per binding; port names and capacities are frozen
//!   once `setup` completes.
//! - All `process` tasks run in a single cooperative task group on the
//!   current thread; the harness must be driven from inside a
//!   [`tokio::task::LocalSet`].
//! - Shutdown (signal or control request) sends a graceful drain to the
//!   sources; sources close their OUT ports and the rest of the pipeline
//!   drains behind them. When the grace period expires, remaining tasks are
//!   cancelled and the run ends with [`Error::ShutdownTimeout`].
//! - Failure policy is fail-fast: the first fatal component error aborts the
//!   whole system.

use crate::component::{Component, ComponentRunner};
use crate::control::{
    ControlSender, ControlSenders, ControlTargetRole, NodeControlMsg, PipelineControlMsg,
    PipelineCtrlMsgReceiver, PipelineCtrlMsgSender, control_channel, pipeline_ctrl_msg_channel,
};
use crate::error::Error;
use crate::port::{InPort, OutPort, wire};
use autocoder_df_config::blueprint::{Binding, HarnessSettings};
use autocoder_df_config::{ComponentId, PortName, PrimitiveKind, SystemId};
use autocoder_df_telemetry::registry::MetricsRegistry;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};

/// A handle for requesting pipeline shutdown from outside the harness loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: PipelineCtrlMsgSender,
}

impl ShutdownHandle {
    /// Requests a graceful shutdown of the pipeline.
    pub async fn shutdown(&self, reason: &str) {
        let _ = self
            .sender
            .send(PipelineControlMsg::Shutdown {
                reason: reason.to_owned(),
            })
            .await;
    }
}

/// The supervisor for one system.
pub struct Harness {
    system: SystemId,
    settings: HarnessSettings,
    registry: MetricsRegistry,
    components: BTreeMap<ComponentId, Component>,
    bindings: Vec<Binding>,
    pipeline_tx: PipelineCtrlMsgSender,
    pipeline_rx: PipelineCtrlMsgReceiver,
}

impl Harness {
    /// Creates an empty harness.
    pub fn new<S: Into<SystemId>>(
        system: S,
        settings: HarnessSettings,
        registry: MetricsRegistry,
    ) -> Self {
        let (pipeline_tx, pipeline_rx) =
            pipeline_ctrl_msg_channel(settings.pipeline_ctrl_channel_capacity);
        Self {
            system: system.into(),
            settings,
            registry,
            components: BTreeMap::new(),
            bindings: Vec::new(),
            pipeline_tx,
            pipeline_rx,
        }
    }

    /// The system id.
    #[must_use]
    pub fn system(&self) -> &SystemId {
        &self.system
    }

    /// The process-wide metrics registry.
    #[must_use]
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// A handle that requests graceful shutdown of this harness.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.pipeline_tx.clone(),
        }
    }

    /// Adds a component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ComponentAlreadyExists`] on duplicate names.
    pub fn add_component(&mut self, component: Component) -> Result<(), Error> {
        if self.components.contains_key(&component.name) {
            return Err(Error::ComponentAlreadyExists {
                component: component.name.clone(),
            });
        }
        let _ = self.components.insert(component.name.clone(), component);
        Ok(())
    }

    /// Adds a binding (one channel from `from.component.port` to
    /// `to.component.port`).
    pub fn add_binding(&mut self, binding: Binding) {
        self.bindings.push(binding);
    }

    /// Adds many bindings.
    pub fn add_bindings<I: IntoIterator<Item = Binding>>(&mut self, bindings: I) {
        self.bindings.extend(bindings);
    }

    /// Runs the system until completion, draining gracefully on SIGTERM or
    /// Ctrl-C. Must be called from inside a [`tokio::task::LocalSet`].
    ///
    /// # Errors
    ///
    /// Propagates wiring errors, the first fatal component error, or
    /// [`Error::ShutdownTimeout`] on a forced cancel.
    pub async fn run(self) -> Result<(), Error> {
        let signal = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};
                match signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {}
                            _ = term.recv() => {}
                        }
                    }
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        };
        self.run_with_shutdown(signal).await
    }

    /// Runs the system with a caller-provided shutdown trigger instead of OS
    /// signals. The run also ends when every component completes naturally
    /// (sources exhausted, channels drained).
    ///
    /// # Errors
    ///
    /// Propagates wiring errors, the first fatal component error, or
    /// [`Error::ShutdownTimeout`] on a forced cancel.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let Harness {
            system,
            settings,
            registry,
            mut components,
            bindings,
            pipeline_tx,
            mut pipeline_rx,
        } = self;

        let order = stable_topo_order(&components, &bindings)?;
        tracing::info!(system = %system, ?order, "starting components in stable topological order");

        let (mut out_ports, mut in_ports) = wire_bindings(&components, bindings, &registry)?;

        // Finalize runners in stable order, filling in detached ports for
        // declared-but-unbound endpoints.
        let mut control = ControlSenders::new();
        let mut runners: Vec<ComponentRunner> = Vec::with_capacity(order.len());
        let mut timer_requests: Vec<(ComponentId, Duration)> = Vec::new();
        for (index, name) in order.iter().enumerate() {
            let component = components.remove(name).ok_or_else(|| Error::InternalError {
                message: format!("component `{name}` missing after ordering"),
            })?;
            let strict = component.tuning.schema_validator.strict_mode;

            let mut outs = out_ports.remove(name).unwrap_or_default();
            for spec in &component.outputs {
                if !outs.contains_key(&spec.name) {
                    let port = OutPort::detached(&component.name, spec, strict);
                    registry.register(port.metrics().clone());
                    let _ = outs.insert(spec.name.clone(), port);
                }
            }

            let mut ins_by_name = in_ports.remove(name).unwrap_or_default();
            let mut ins = Vec::with_capacity(component.inputs.len());
            for spec in &component.inputs {
                match ins_by_name.remove(&spec.name) {
                    Some(port) => ins.push(port),
                    None => {
                        let port = InPort::detached(&component.name, spec);
                        registry.register(port.metrics().clone());
                        ins.push(port);
                    }
                }
            }

            let (ctrl_tx, ctrl_rx) = control_channel(settings.control_channel_capacity);
            let role = if component.primitive.kind() == PrimitiveKind::Source {
                ControlTargetRole::Source
            } else {
                ControlTargetRole::Downstream
            };
            control.register(name.clone(), role, ctrl_tx);
            if let Some(interval) = component.timer_interval {
                timer_requests.push((name.clone(), interval));
            }

            let seed = settings.seed.wrapping_add(index as u64);
            let runner = component.prepare(
                ins,
                outs,
                ctrl_rx,
                settings.merger_fairness_window,
                seed,
            )?;
            registry.register(runner.metrics().clone());
            runners.push(runner);
        }

        // Setup barrier: every component must report ready before any
        // process task starts; a single failure aborts start-up.
        for runner in &mut runners {
            if let Err(error) = runner.setup().await {
                tracing::error!(component = %runner.name(), %error, "setup failed; aborting start-up");
                return Err(error);
            }
        }

        // Single cooperative task group.
        let mut tasks: JoinSet<(ComponentId, Result<(), Error>)> = JoinSet::new();
        for runner in runners {
            let name = runner.name().clone();
            let _ = tasks.spawn_local(async move {
                let result = runner.process().await;
                (name, result)
            });
        }
        let mut remaining: BTreeSet<ComponentId> = order.iter().cloned().collect();

        let mut timers = TimerTasks::new();
        for (name, duration) in timer_requests {
            if let Some(sender) = control.get(&name) {
                timers.start(name.clone(), duration, sender.clone());
            }
        }

        let grace = Duration::from_millis(settings.shutdown_grace_ms);
        let far_future = Instant::now() + Duration::from_secs(86_400 * 365);
        let mut shutdown = Box::pin(shutdown);
        let mut grace_sleep = Box::pin(sleep_until(far_future));
        let mut draining = false;

        let result = loop {
            tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    None => break Ok(()),
                    Some(Ok((name, Ok(())))) => {
                        let _ = remaining.remove(&name);
                        tracing::debug!(component = %name, "component completed");
                    }
                    Some(Ok((name, Err(error)))) => {
                        let _ = remaining.remove(&name);
                        tracing::error!(component = %name, %error, "component failed; aborting system");
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break Err(error);
                    }
                    Some(Err(join_error)) => {
                        if join_error.is_cancelled() {
                            continue;
                        }
                        break Err(Error::JoinTaskError {
                            is_canceled: join_error.is_cancelled(),
                            is_panic: join_error.is_panic(),
                            error: join_error.to_string(),
                        });
                    }
                },
                msg = pipeline_rx.recv() => match msg {
                    Some(PipelineControlMsg::Shutdown { reason }) if !draining => {
                        draining = true;
                        grace_sleep.as_mut().reset(Instant::now() + grace);
                        initiate_drain(&control, grace, &reason).await;
                    }
                    Some(PipelineControlMsg::StartTimer { component, duration }) => {
                        if let Some(sender) = control.get(&component) {
                            timers.start(component.clone(), duration, sender.clone());
                        }
                    }
                    Some(PipelineControlMsg::CancelTimer { component }) => {
                        timers.cancel(&component);
                    }
                    _ => {}
                },
                _ = &mut shutdown, if !draining => {
                    draining = true;
                    grace_sleep.as_mut().reset(Instant::now() + grace);
                    initiate_drain(&control, grace, "shutdown signal").await;
                }
                _ = &mut grace_sleep, if draining => {
                    tracing::warn!(pending = ?remaining, "drain grace period expired; cancelling");
                    let _ = control.shutdown_all(Duration::ZERO, "grace period expired").await;
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break Err(Error::ShutdownTimeout {
                        pending: remaining.iter().cloned().collect(),
                    });
                }
            }
        };

        timers.cancel_all();
        drop(pipeline_tx);
        tracing::info!(system = %system, ok = result.is_ok(), "pipeline stopped");
        result
    }
}

async fn initiate_drain(control: &ControlSenders, grace: Duration, reason: &str) {
    tracing::info!(reason, grace_ms = grace.as_millis() as u64, "draining pipeline");
    if let Err(failed) = control.shutdown_sources(grace, reason).await {
        tracing::warn!(?failed, "some sources did not accept the shutdown message");
    }
}

type WiredPorts = (
    BTreeMap<ComponentId, BTreeMap<PortName, OutPort>>,
    BTreeMap<ComponentId, BTreeMap<PortName, InPort>>,
);

/// Creates one channel per binding, in deterministic (sorted) order, and
/// registers the port metric sets.
fn wire_bindings(
    components: &BTreeMap<ComponentId, Component>,
    mut bindings: Vec<Binding>,
    registry: &MetricsRegistry,
) -> Result<WiredPorts, Error> {
    let mut out_ports: BTreeMap<ComponentId, BTreeMap<PortName, OutPort>> = BTreeMap::new();
    let mut in_ports: BTreeMap<ComponentId, BTreeMap<PortName, InPort>> = BTreeMap::new();
    bindings.sort_by(|a, b| {
        (&a.from.component, &a.from.port).cmp(&(&b.from.component, &b.from.port))
    });

    for binding in &bindings {
        let producer =
            components
                .get(&binding.from.component)
                .ok_or_else(|| Error::UnknownPort {
                    component: binding.from.component.clone(),
                    port: binding.from.port.clone(),
                })?;
        let consumer = components
            .get(&binding.to.component)
            .ok_or_else(|| Error::UnknownPort {
                component: binding.to.component.clone(),
                port: binding.to.port.clone(),
            })?;
        let out_spec = producer
            .outputs
            .iter()
            .find(|p| p.name == binding.from.port)
            .ok_or_else(|| Error::UnknownPort {
                component: binding.from.component.clone(),
                port: binding.from.port.clone(),
            })?;
        let in_spec = consumer
            .inputs
            .iter()
            .find(|p| p.name == binding.to.port)
            .ok_or_else(|| Error::UnknownPort {
                component: binding.to.component.clone(),
                port: binding.to.port.clone(),
            })?;

        let strict = producer.tuning.schema_validator.strict_mode;
        let (out_port, in_port) = wire(
            &binding.from.component,
            out_spec,
            strict,
            &binding.to.component,
            in_spec,
        )?;
        registry.register(out_port.metrics().clone());
        registry.register(in_port.metrics().clone());

        let existing_out = out_ports
            .entry(binding.from.component.clone())
            .or_default()
            .insert(binding.from.port.clone(), out_port);
        let existing_in = in_ports
            .entry(binding.to.component.clone())
            .or_default()
            .insert(binding.to.port.clone(), in_port);
        if existing_out.is_some() || existing_in.is_some() {
            return Err(Error::InternalError {
                message: format!(
                    "port bound to more than one channel: {}.{} -> {}.{}",
                    binding.from.component,
                    binding.from.port,
                    binding.to.component,
                    binding.to.port
                ),
            });
        }
    }
    Ok((out_ports, in_ports))
}

/// Stable topological order over the components: Kahn's algorithm with the
/// ready set kept sorted so ties always break alphabetically.
fn stable_topo_order(
    components: &BTreeMap<ComponentId, Component>,
    bindings: &[Binding],
) -> Result<Vec<ComponentId>, Error> {
    let mut successors: BTreeMap<&ComponentId, BTreeSet<&ComponentId>> = BTreeMap::new();
    let mut indegree: BTreeMap<&ComponentId, usize> = BTreeMap::new();
    for name in components.keys() {
        let _ = indegree.insert(name, 0);
    }
    for binding in bindings {
        let (Some((from, _)), Some((to, _))) = (
            components.get_key_value(&binding.from.component),
            components.get_key_value(&binding.to.component),
        ) else {
            continue;
        };
        if from == to {
            continue;
        }
        if successors.entry(from).or_default().insert(to) {
            *indegree.entry(to).or_default() += 1;
        }
    }

    let mut ready: BTreeSet<&ComponentId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut order = Vec::with_capacity(components.len());
    while let Some(next) = ready.iter().next().copied() {
        let _ = ready.remove(next);
        order.push(next.clone());
        if let Some(succs) = successors.get(next) {
            for succ in succs {
                let degree = indegree.entry(succ).or_default();
                *degree -= 1;
                if *degree == 0 {
                    let _ = ready.insert(succ);
                }
            }
        }
    }
    if order.len() != components.len() {
        return Err(Error::InternalError {
            message: "cycle detected in component graph".to_owned(),
        });
    }
    Ok(order)
}

/// Drives the per-component periodic timers requested via configuration or
/// [`PipelineControlMsg::StartTimer`].
struct TimerTasks {
    tasks: BTreeMap<ComponentId, tokio::task::JoinHandle<()>>,
}

impl TimerTasks {
    fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    fn start(&mut self, component: ComponentId, duration: Duration, sender: ControlSender) {
        self.cancel(&component);
        let handle = tokio::task::spawn_local(async move {
            let mut interval = tokio::time::interval(duration);
            // The first tick fires immediately; skip it.
            let _ = interval.tick().await;
            loop {
                let _ = interval.tick().await;
                if sender.send(NodeControlMsg::TimerTick {}).await.is_err() {
                    break;
                }
            }
        });
        let _ = self.tasks.insert(component, handle);
    }

    fn cancel(&mut self, component: &ComponentId) {
        if let Some(handle) = self.tasks.remove(component) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, handle) in std::mem::take(&mut self.tasks) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Primitive;
    use crate::testing::{CollectingSink, SeededSource};
    use autocoder_df_config::blueprint::{BindingEndpoint, GeneratedBy, PortSpec};
    use autocoder_df_config::schema::Schema;

    fn binding(from: (&str, &str), to: (&str, &str)) -> Binding {
        Binding {
            from: BindingEndpoint::new(from.0.to_owned(), from.1.to_owned()),
            to: BindingEndpoint::new(to.0.to_owned(), to.1.to_owned()),
            generated_by: GeneratedBy::User,
        }
    }

    #[test]
    fn topo_order_is_stable_and_alphabetical_on_ties() {
        let mut components = BTreeMap::new();
        for name in ["zeta", "alpha", "mid"] {
            let primitive = match name {
                "zeta" | "alpha" => {
                    Primitive::Source(Box::new(SeededSource::new(0, 0)))
                }
                _ => Primitive::Sink(Box::new(CollectingSink::new())),
            };
            let mut c = Component::new(name.to_owned(), primitive);
            if name == "mid" {
                c = c
                    .with_input(PortSpec::new("in_a", Schema::any("any")))
                    .with_input(PortSpec::new("in_b", Schema::any("any")));
            } else {
                c = c.with_output(PortSpec::new("out", Schema::any("any")));
            }
            let _ = components.insert(c.name.clone(), c);
        }
        let bindings = vec![
            binding(("zeta", "out"), ("mid", "in_a")),
            binding(("alpha", "out"), ("mid", "in_b")),
        ];

        let order = stable_topo_order(&components, &bindings).expect("acyclic");
        assert_eq!(
            order,
            vec![
                ComponentId::from("alpha"),
                ComponentId::from("zeta"),
                ComponentId::from("mid")
            ]
        );
    }
}
