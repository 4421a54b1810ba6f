// SPDX-License-Identifier: Apache-2.0

//! Control messages exchanged between the harness and components.
//!
//! Every component owns a control channel polled with priority over data.
//! Components talk back to the harness through a single shared MPSC channel
//! (timer management, shutdown requests).

use autocoder_df_channel::{OverflowPolicy, mpsc};
use autocoder_df_config::ComponentId;
use std::collections::HashMap;
use std::time::Duration;

/// Control messages sent by the harness to components.
#[derive(Debug, Clone)]
pub enum NodeControlMsg {
    /// Notifies the component of a configuration change.
    Config {
        /// The new configuration as a JSON value.
        config: serde_json::Value,
    },

    /// Emitted when a scheduled timer expires, used to trigger periodic tasks
    /// (e.g. window emissions, heartbeats).
    TimerTick {},

    /// Requests a graceful shutdown: finish processing and release resources
    /// by the deadline.
    Shutdown {
        /// Deadline for the drain.
        deadline: Duration,
        /// Human-readable reason for the shutdown.
        reason: String,
    },
}

impl NodeControlMsg {
    /// Returns `true` if this control message is a shutdown request.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, NodeControlMsg::Shutdown { .. })
    }
}

/// Control messages sent by components to the harness.
#[derive(Debug, Clone)]
pub enum PipelineControlMsg {
    /// Requests a periodic timer delivering `TimerTick` to the component.
    StartTimer {
        /// The requesting component.
        component: ComponentId,
        /// Timer interval.
        duration: Duration,
    },
    /// Cancels the component's periodic timer.
    CancelTimer {
        /// The requesting component.
        component: ComponentId,
    },
    /// Requests shutdown of the whole pipeline.
    Shutdown {
        /// Human-readable reason for the shutdown.
        reason: String,
    },
}

/// Sender half of a component's control channel.
pub type ControlSender = mpsc::Sender<NodeControlMsg>;

/// Receiver half of a component's control channel.
pub type ControlReceiver = mpsc::Receiver<NodeControlMsg>;

/// Creates a control channel for one component.
#[must_use]
pub fn control_channel(capacity: usize) -> (ControlSender, ControlReceiver) {
    mpsc::Channel::new(capacity, OverflowPolicy::Block)
}

/// Sender for component-to-harness control messages.
pub type PipelineCtrlMsgSender = tokio::sync::mpsc::Sender<PipelineControlMsg>;

/// Receiver for component-to-harness control messages.
pub type PipelineCtrlMsgReceiver = tokio::sync::mpsc::Receiver<PipelineControlMsg>;

/// Creates the shared component-to-harness control channel.
#[must_use]
pub fn pipeline_ctrl_msg_channel(
    capacity: usize,
) -> (PipelineCtrlMsgSender, PipelineCtrlMsgReceiver) {
    tokio::sync::mpsc::channel(capacity)
}

/// The role a registered control target plays, used to scope broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTargetRole {
    /// A component with no inputs: shutdown starts here so the rest of the
    /// pipeline drains behind it.
    Source,
    /// Any component fed by a channel.
    Downstream,
}

/// Holds the control senders for all components in the pipeline.
#[derive(Default)]
pub struct ControlSenders {
    senders: HashMap<ComponentId, (ControlTargetRole, ControlSender)>,
}

impl ControlSenders {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component's control sender.
    pub fn register(
        &mut self,
        component: ComponentId,
        role: ControlTargetRole,
        sender: ControlSender,
    ) {
        let _ = self.senders.insert(component, (role, sender));
    }

    /// Gets the control sender for a component.
    #[must_use]
    pub fn get(&self, component: &ComponentId) -> Option<&ControlSender> {
        self.senders.get(component).map(|(_, sender)| sender)
    }

    /// Number of registered senders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Returns `true` if no senders are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Broadcasts a graceful shutdown to all sources. Sources close their OUT
    /// ports when they stop, so the rest of the pipeline drains naturally;
    /// this is the preferred way to shut a pipeline down.
    ///
    /// # Errors
    ///
    /// Returns the components whose control channel rejected the message.
    pub async fn shutdown_sources(
        &self,
        deadline: Duration,
        reason: &str,
    ) -> Result<(), Vec<ComponentId>> {
        self.shutdown_role(Some(ControlTargetRole::Source), deadline, reason)
            .await
    }

    /// Broadcasts a shutdown to every component. Skips the graceful drain;
    /// used when the grace period has already expired.
    ///
    /// # Errors
    ///
    /// Returns the components whose control channel rejected the message.
    pub async fn shutdown_all(
        &self,
        deadline: Duration,
        reason: &str,
    ) -> Result<(), Vec<ComponentId>> {
        self.shutdown_role(None, deadline, reason).await
    }

    async fn shutdown_role(
        &self,
        role_filter: Option<ControlTargetRole>,
        deadline: Duration,
        reason: &str,
    ) -> Result<(), Vec<ComponentId>> {
        let mut failed = Vec::new();
        for (component, (role, sender)) in &self.senders {
            if let Some(filter) = role_filter {
                if *role != filter {
                    continue;
                }
            }
            let msg = NodeControlMsg::Shutdown {
                deadline,
                reason: reason.to_owned(),
            };
            if sender.send(msg).await.is_err() {
                failed.push(component.clone());
            }
        }
        if failed.is_empty() { Ok(()) } else { Err(failed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_targets_sources_only() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        let handle = local.spawn_local(async {
            let mut senders = ControlSenders::new();
            let (src_tx, src_rx) = control_channel(4);
            let (sink_tx, sink_rx) = control_channel(4);
            senders.register("src".into(), ControlTargetRole::Source, src_tx);
            senders.register("sink".into(), ControlTargetRole::Downstream, sink_tx);

            senders
                .shutdown_sources(Duration::from_secs(1), "test")
                .await
                .expect("sends succeed");

            assert!(src_rx.try_recv().expect("source got shutdown").is_shutdown());
            assert!(sink_rx.try_recv().is_err());
        });
        rt.block_on(local);
        rt.block_on(handle).expect("test task failed");
    }
}
