// SPDX-License-Identifier: Apache-2.0

//! Component shell and lifecycle.
//!
//! A [`Component`] is the build-time description: a primitive plus declared
//! ports, capability tuning, and policy knobs. The harness wires it into a
//! [`ComponentRunner`], which owns the channels, the control receiver, and
//! the capability chain, and drives the strict lifecycle:
//!
//! 1. `setup` — open external resources; readiness reported to the harness.
//! 2. `process` — one item at a time through the capability chain.
//! 3. `cleanup` — close ports, release resources, on every exit path.
//!
//! Components are fully decoupled: all interaction is via ports; control
//! messages are polled with priority over data.

use crate::capability::{CapabilityChain, ItemContext, ItemOutcome};
use crate::control::{ControlReceiver, NodeControlMsg};
use crate::envelope::ErrorEnvelope;
use crate::error::{ComponentErrorKind, Error};
use crate::message::Message;
use crate::metrics::ComponentMetrics;
use crate::port::{InPort, OutPort};
use crate::primitive::{Primitive, validate_arity};
use autocoder_df_channel::error::RecvError;
use autocoder_df_config::blueprint::PortSpec;
use autocoder_df_config::capability::CapabilityTuning;
use autocoder_df_config::{ComponentId, PortName};
use autocoder_df_state::StateAdapter;
use futures::future::select_all;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

/// Build-time description of one component.
pub struct Component {
    /// Unique component name within the system.
    pub name: ComponentId,
    /// The business logic.
    pub primitive: Primitive,
    /// Declared input ports.
    pub inputs: Vec<PortSpec>,
    /// Declared output ports.
    pub outputs: Vec<PortSpec>,
    /// Capability tuning.
    pub tuning: CapabilityTuning,
    /// Forbid the transformer hook from dropping items.
    pub require_output: bool,
    /// Deliver a `TimerTick` to the component at this interval.
    pub timer_interval: Option<Duration>,
    /// State adapter instance, required when the tuning opts into state.
    pub state: Option<Rc<dyn StateAdapter>>,
}

impl Component {
    /// Creates a component description with no ports.
    pub fn new<N: Into<ComponentId>>(name: N, primitive: Primitive) -> Self {
        Self {
            name: name.into(),
            primitive,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tuning: CapabilityTuning::default(),
            require_output: false,
            timer_interval: None,
            state: None,
        }
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, spec: PortSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, spec: PortSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Sets the capability tuning.
    #[must_use]
    pub fn with_tuning(mut self, tuning: CapabilityTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Forbids drops from the transformer hook.
    #[must_use]
    pub fn with_require_output(mut self, require_output: bool) -> Self {
        self.require_output = require_output;
        self
    }

    /// Requests periodic `TimerTick` delivery.
    #[must_use]
    pub fn with_timer_interval(mut self, interval: Duration) -> Self {
        self.timer_interval = Some(interval);
        self
    }

    /// Attaches a state adapter instance.
    #[must_use]
    pub fn with_state(mut self, state: Rc<dyn StateAdapter>) -> Self {
        self.state = Some(state);
        self
    }

    /// Checks the primitive arity invariants against the declared ports.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the port counts do not fit.
    pub fn check_arity(&self) -> Result<(), Error> {
        validate_arity(
            &self.name,
            self.primitive.kind(),
            self.inputs.len(),
            self.outputs.len(),
        )
    }

    /// Finalizes the component into a runner with its wired ports.
    ///
    /// `in_ports`/`out_ports` come from the harness wiring pass; declared OUT
    /// ports without a binding stay detached and discard sends. Ports and
    /// capacities are frozen from here on.
    ///
    /// # Errors
    ///
    /// Returns an error when the capability chain cannot be built.
    pub fn prepare(
        self,
        in_ports: Vec<InPort>,
        out_ports: BTreeMap<PortName, OutPort>,
        ctrl_rx: ControlReceiver,
        fairness_window: usize,
        seed: u64,
    ) -> Result<ComponentRunner, Error> {
        self.check_arity()?;
        let metrics = ComponentMetrics::new(&self.name);
        let chain = CapabilityChain::new(
            &self.name,
            &self.tuning,
            metrics.clone(),
            self.state.clone(),
            seed,
        )?;
        let declared_outputs = self.outputs.iter().map(|p| p.name.clone()).collect();
        let default_out = if out_ports.len() == 1 {
            out_ports.keys().next().cloned()
        } else {
            None
        };
        Ok(ComponentRunner {
            name: self.name,
            primitive: self.primitive,
            in_ports,
            out_ports,
            declared_outputs,
            default_out,
            chain,
            ctrl_rx,
            require_output: self.require_output,
            fairness_window: fairness_window.max(1),
            metrics,
        })
    }
}

/// Effect context handed to a [`crate::primitive::Source`]'s `produce` hook.
///
/// Every emission threads the message through the capability chain (schema
/// validation, rate limiting, metrics) before the OUT port send delivers
/// backpressure.
pub struct SourceContext<'a> {
    component: &'a ComponentId,
    chain: &'a mut CapabilityChain,
    out_ports: &'a BTreeMap<PortName, OutPort>,
    default_out: Option<&'a PortName>,
    metrics: &'a ComponentMetrics,
}

impl SourceContext<'_> {
    /// Emits a message on the component's single (or default) OUT port.
    ///
    /// # Errors
    ///
    /// - [`Error::SendTimeout`] when a bounded wait expires; the caller (an
    ///   ingress boundary) converts this into a 503-style rejection.
    /// - [`Error::SchemaViolation`] when the message fails validation.
    pub async fn emit(&mut self, msg: Message) -> Result<(), Error> {
        let Some(port) = self.default_out else {
            return Err(Error::ComponentError {
                component: self.component.clone(),
                kind: ComponentErrorKind::Configuration,
                error: "emit without a port name requires exactly one OUT port".to_owned(),
            });
        };
        let port = port.clone();
        self.emit_to(&port, msg).await
    }

    /// Emits a message on a named OUT port.
    ///
    /// # Errors
    ///
    /// Same as [`SourceContext::emit`], plus [`Error::UnknownPort`] for
    /// undeclared ports.
    pub async fn emit_to(&mut self, port: &PortName, msg: Message) -> Result<(), Error> {
        let Some(out) = self.out_ports.get(port) else {
            return Err(Error::UnknownPort {
                component: self.component.clone(),
                port: port.clone(),
            });
        };
        let ctx = ItemContext::new(self.component, None, Some(out.schema()));
        if let Err(e) = self.chain.before_item(&ctx, &msg).await {
            self.chain.after_item(&ctx, &ItemOutcome::Failed).await;
            return Err(e);
        }
        match out.send(msg).await {
            Ok(()) => {
                self.chain.after_item(&ctx, &ItemOutcome::Emitted(1)).await;
                Ok(())
            }
            Err(e @ Error::SendTimeout { .. }) => {
                self.chain.after_item(&ctx, &ItemOutcome::Rejected).await;
                Err(e)
            }
            Err(e) => {
                self.chain.after_item(&ctx, &ItemOutcome::Failed).await;
                Err(e)
            }
        }
    }

    /// The component's metric set (ingress boundaries count 503s here).
    #[must_use]
    pub fn metrics(&self) -> &ComponentMetrics {
        self.metrics
    }

    /// The component id.
    #[must_use]
    pub fn component(&self) -> &ComponentId {
        self.component
    }
}

/// A wired component, ready to run.
pub struct ComponentRunner {
    name: ComponentId,
    primitive: Primitive,
    in_ports: Vec<InPort>,
    out_ports: BTreeMap<PortName, OutPort>,
    declared_outputs: BTreeSet<PortName>,
    default_out: Option<PortName>,
    chain: CapabilityChain,
    ctrl_rx: ControlReceiver,
    require_output: bool,
    fairness_window: usize,
    metrics: ComponentMetrics,
}

impl ComponentRunner {
    /// The component name.
    #[must_use]
    pub fn name(&self) -> &ComponentId {
        &self.name
    }

    /// The component's metric set.
    #[must_use]
    pub fn metrics(&self) -> &ComponentMetrics {
        &self.metrics
    }

    /// The capability tiers in execution order (always starts 10, 20 and
    /// ends 90).
    #[must_use]
    pub fn capability_tiers(&self) -> Vec<u8> {
        self.chain.tiers()
    }

    /// Opens external resources. The harness calls this on every component
    /// (in stable topological order) before starting any `process` task.
    ///
    /// # Errors
    ///
    /// Propagates the primitive's setup failure; the harness aborts start-up.
    pub async fn setup(&mut self) -> Result<(), Error> {
        match &mut self.primitive {
            Primitive::Source(p) => p.setup().await,
            Primitive::Sink(p) => p.setup().await,
            Primitive::Transformer(p) => p.setup().await,
            Primitive::Splitter(p) => p.setup().await,
            Primitive::Merger(p) => p.setup().await,
        }
    }

    /// Runs the component until end-of-stream or shutdown, then cleans up.
    /// Cleanup runs on every exit path, including errors.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; item-recoverable errors are emitted as
    /// envelopes and do not stop the loop.
    pub async fn process(mut self) -> Result<(), Error> {
        let loop_result = self.event_loop().await;
        for port in self.out_ports.values() {
            port.close();
        }
        let cleanup_result = match &mut self.primitive {
            Primitive::Source(p) => p.cleanup().await,
            Primitive::Sink(p) => p.cleanup().await,
            Primitive::Transformer(p) => p.cleanup().await,
            Primitive::Splitter(p) => p.cleanup().await,
            Primitive::Merger(p) => p.cleanup().await,
        };
        if let Err(error) = &cleanup_result {
            tracing::warn!(component = %self.name, %error, "cleanup failed");
        }
        loop_result.and(cleanup_result)
    }

    async fn event_loop(&mut self) -> Result<(), Error> {
        match self.primitive.kind() {
            autocoder_df_config::PrimitiveKind::Source => self.run_source().await,
            _ => self.run_consumer().await,
        }
    }

    /// Drives a source: `produce` runs as one long task, cancelled at its
    /// next suspension point when a shutdown control message arrives.
    async fn run_source(&mut self) -> Result<(), Error> {
        let Primitive::Source(source) = &mut self.primitive else {
            return Err(Error::InternalError {
                message: "run_source on non-source".to_owned(),
            });
        };
        let mut ctx = SourceContext {
            component: &self.name,
            chain: &mut self.chain,
            out_ports: &self.out_ports,
            default_out: self.default_out.as_ref(),
            metrics: &self.metrics,
        };
        let ctrl_rx = &self.ctrl_rx;
        let mut produce = Box::pin(source.produce(&mut ctx));
        loop {
            tokio::select! {
                biased;
                ctrl = ctrl_rx.recv() => match ctrl {
                    Ok(msg) if msg.is_shutdown() => {
                        tracing::info!(component = %self.name, "source shutting down");
                        break;
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                },
                result = &mut produce => {
                    result?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drives per-item primitives: control messages take priority, then the
    /// fair receiver picks the next input message.
    async fn run_consumer(&mut self) -> Result<(), Error> {
        let mut closed = vec![false; self.in_ports.len()];
        let mut last_pick: Option<usize> = None;
        let mut consecutive = 0usize;
        let mut draining = false;

        loop {
            if closed.iter().all(|c| *c) {
                break;
            }

            let event = if draining {
                match try_next_fair(
                    &self.in_ports,
                    &mut closed,
                    &mut last_pick,
                    &mut consecutive,
                    self.fairness_window,
                ) {
                    Some(pick) => LoopEvent::Data(Some(pick)),
                    // Nothing buffered; a draining component is done.
                    None => break,
                }
            } else {
                tokio::select! {
                    biased;
                    ctrl = self.ctrl_rx.recv() => LoopEvent::Ctrl(ctrl.ok()),
                    next = next_fair(
                        &self.in_ports,
                        &mut closed,
                        &mut last_pick,
                        &mut consecutive,
                        self.fairness_window,
                    ) => LoopEvent::Data(next),
                }
            };

            match event {
                LoopEvent::Ctrl(Some(NodeControlMsg::Shutdown { .. })) | LoopEvent::Ctrl(None) => {
                    draining = true;
                }
                LoopEvent::Ctrl(Some(NodeControlMsg::TimerTick {})) => {
                    self.handle_timer_tick().await?;
                }
                LoopEvent::Ctrl(Some(NodeControlMsg::Config { .. })) => {
                    tracing::debug!(
                        component = %self.name,
                        "config updates are not applied at runtime"
                    );
                }
                LoopEvent::Data(Some((idx, msg))) => self.handle_item(idx, msg).await?,
                LoopEvent::Data(None) => {}
            }
        }
        // Final window flush for batching/windowed primitives, so buffered
        // work is not lost when the inputs close.
        self.handle_timer_tick().await?;
        Ok(())
    }

    async fn handle_timer_tick(&mut self) -> Result<(), Error> {
        let emitted = match &mut self.primitive {
            Primitive::Transformer(p) => p.on_timer().await?,
            Primitive::Merger(p) => p.on_timer().await?,
            _ => Vec::new(),
        };
        for msg in emitted {
            if let Some(port) = self.single_out() {
                port.send(msg).await?;
            }
        }
        Ok(())
    }

    fn single_out(&self) -> Option<&OutPort> {
        self.default_out.as_ref().and_then(|n| self.out_ports.get(n))
    }

    /// Threads one item through the capability chain and the primitive hook.
    async fn handle_item(&mut self, idx: usize, msg: Message) -> Result<(), Error> {
        let component = self.name.clone();
        let port_name = self.in_ports[idx].name().clone();
        let schema = self.in_ports[idx].schema().clone();
        let mut ictx = ItemContext::new(&component, Some(&port_name), Some(&schema));

        if let Err(error) = self.chain.before_item(&ictx, &msg).await {
            self.chain.after_item(&ictx, &ItemOutcome::Failed).await;
            return self.finish_failed_item(idx, error, Some(&msg));
        }

        // The hook, re-invoked while the retry capability grants backoff.
        let hook_result = loop {
            let attempt_result = match &mut self.primitive {
                Primitive::Sink(p) => p.consume(msg.clone()).await.map(|()| HookOutput::Consumed),
                Primitive::Transformer(p) => {
                    p.transform(msg.clone()).await.map(HookOutput::Transformed)
                }
                Primitive::Splitter(p) => p.split(msg.clone()).await.map(HookOutput::Split),
                Primitive::Merger(p) => p
                    .merge_step(&port_name, msg.clone())
                    .await
                    .map(HookOutput::Merged),
                Primitive::Source(_) => Err(Error::InternalError {
                    message: "source primitive in consumer loop".to_owned(),
                }),
            };
            match attempt_result {
                Ok(output) => break Ok(output),
                Err(error) => match self.chain.should_retry(&mut ictx, &error) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => break Err(error),
                },
            }
        };

        let output = match hook_result {
            Ok(output) => output,
            Err(error) => {
                self.chain.after_item(&ictx, &ItemOutcome::Failed).await;
                return self.finish_failed_item(idx, error, Some(&msg));
            }
        };

        let outcome = match self.deliver(output).await {
            Ok(outcome) => outcome,
            Err(error @ Error::SendTimeout { .. }) => {
                // Capacity rejection mid-pipeline: the item is gone but it is
                // not an error of the item.
                tracing::debug!(component = %self.name, %error, "downstream capacity rejection");
                ItemOutcome::Rejected
            }
            Err(error) => {
                self.chain.after_item(&ictx, &ItemOutcome::Failed).await;
                return self.finish_failed_item(idx, error, Some(&msg));
            }
        };

        self.chain.after_item(&ictx, &outcome).await;
        Ok(())
    }

    /// Sends hook output to the right ports and names the outcome.
    async fn deliver(&mut self, output: HookOutput) -> Result<ItemOutcome, Error> {
        match output {
            HookOutput::Consumed => Ok(ItemOutcome::Consumed),
            HookOutput::Transformed(Some(out)) => match self.single_out() {
                Some(port) => {
                    port.send(out).await?;
                    Ok(ItemOutcome::Emitted(1))
                }
                // A transformer with no wired output (e.g. a store used
                // terminally): the result is discarded, which is neither a
                // drop nor an error.
                None => Ok(ItemOutcome::Consumed),
            },
            HookOutput::Transformed(None) => {
                if self.require_output {
                    return Err(Error::DropForbidden {
                        component: self.name.clone(),
                    });
                }
                tracing::debug!(component = %self.name, reason = "transform_returned_none", "message dropped");
                Ok(ItemOutcome::Dropped)
            }
            HookOutput::Split(map) => {
                for port in map.keys() {
                    if !self.declared_outputs.contains(port) {
                        return Err(Error::UndeclaredPort {
                            component: self.name.clone(),
                            port: port.clone(),
                        });
                    }
                }
                let mut emitted = 0;
                for (port, out) in map {
                    // Declared but unwired ports discard silently.
                    if let Some(out_port) = self.out_ports.get(&port) {
                        out_port.send(out).await?;
                        emitted += 1;
                    }
                }
                Ok(ItemOutcome::Emitted(emitted))
            }
            HookOutput::Merged(msgs) => {
                let n = msgs.len();
                for out in msgs {
                    if let Some(port) = self.single_out() {
                        port.send(out).await?;
                    }
                }
                Ok(ItemOutcome::Emitted(n))
            }
        }
    }

    /// Routes a failed item: recoverable errors become envelopes and the
    /// loop continues; anything else propagates to the supervisor.
    fn finish_failed_item(
        &mut self,
        idx: usize,
        error: Error,
        payload: Option<&Message>,
    ) -> Result<(), Error> {
        if error.is_item_recoverable() {
            let port_name = self.in_ports[idx].name().clone();
            self.in_ports[idx].metrics().errors_total.inc();
            ErrorEnvelope::from_error(&self.name, Some(&port_name), &error, payload).emit();
            Ok(())
        } else {
            Err(error)
        }
    }
}

/// One turn of the consumer loop: a control message or a data pick.
enum LoopEvent {
    Ctrl(Option<NodeControlMsg>),
    Data(Option<(usize, Message)>),
}

/// The possible shapes of hook output, unified for delivery.
enum HookOutput {
    Consumed,
    Transformed(Option<Message>),
    Split(BTreeMap<PortName, Message>),
    Merged(Vec<Message>),
}

/// Non-suspending fair pick across input ports: prefer the last port while
/// its streak is under the fairness window, then rotate.
fn try_next_fair(
    in_ports: &[InPort],
    closed: &mut [bool],
    last_pick: &mut Option<usize>,
    consecutive: &mut usize,
    window: usize,
) -> Option<(usize, Message)> {
    let n = in_ports.len();
    if n == 0 {
        return None;
    }
    let start = last_pick.map_or(0, |i| {
        if *consecutive < window { i } else { (i + 1) % n }
    });
    for offset in 0..n {
        let idx = (start + offset) % n;
        if closed[idx] {
            continue;
        }
        match in_ports[idx].try_recv() {
            Ok(msg) => {
                if *last_pick == Some(idx) {
                    *consecutive += 1;
                } else {
                    *last_pick = Some(idx);
                    *consecutive = 1;
                }
                return Some((idx, msg));
            }
            Err(RecvError::Closed) => closed[idx] = true,
            Err(RecvError::Empty) => {}
        }
    }
    None
}

/// Fair receive across input ports: buffered messages first (respecting the
/// fairness window), otherwise suspend until any open port is readable.
/// Returns `None` when every port is closed or when woken without a message
/// (the caller loops).
async fn next_fair(
    in_ports: &[InPort],
    closed: &mut [bool],
    last_pick: &mut Option<usize>,
    consecutive: &mut usize,
    window: usize,
) -> Option<(usize, Message)> {
    if let Some(pick) = try_next_fair(in_ports, closed, last_pick, consecutive, window) {
        return Some(pick);
    }

    let open: Vec<usize> = (0..in_ports.len()).filter(|i| !closed[*i]).collect();
    if open.is_empty() {
        return None;
    }
    let futures: Vec<_> = open
        .iter()
        .map(|&i| Box::pin(in_ports[i].recv()))
        .collect();
    let (result, which, _rest) = select_all(futures).await;
    let idx = open[which];
    match result {
        Ok(msg) => {
            if *last_pick == Some(idx) {
                *consecutive += 1;
            } else {
                *last_pick = Some(idx);
                *consecutive = 1;
            }
            Some((idx, msg))
        }
        Err(RecvError::Closed) => {
            closed[idx] = true;
            None
        }
        Err(RecvError::Empty) => None,
    }
}
