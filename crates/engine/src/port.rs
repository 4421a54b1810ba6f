// SPDX-License-Identifier: Apache-2.0

//! Typed, named, directional ports backed by bounded FIFO channels.
//!
//! Wiring pairs exactly one OUT port with one IN port ([`wire`]); the OUT
//! side owns the overflow policy and validates every message against its
//! schema before enqueueing, so a buggy hook can never put malformed data on
//! a channel. Both ends observe the same depth counter and update the port
//! gauges as they go.

use crate::error::Error;
use crate::message::Message;
use crate::metrics::PortMetrics;
use autocoder_df_channel::error::{RecvError, SendError};
use autocoder_df_channel::{OverflowPolicy as ChannelPolicy, SendOutcome, mpsc};
use autocoder_df_config::blueprint::{OverflowPolicy, PortSpec};
use autocoder_df_config::schema::Schema;
use autocoder_df_config::{ComponentId, PortName};
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;

/// Maps a declared overflow policy to the channel-level policy.
fn channel_policy(spec: &PortSpec) -> ChannelPolicy {
    match spec.overflow_policy {
        OverflowPolicy::Block => ChannelPolicy::Block,
        OverflowPolicy::BlockWithTimeout => {
            ChannelPolicy::BlockWithTimeout(Duration::from_millis(spec.timeout_ms))
        }
        OverflowPolicy::DropOldest => ChannelPolicy::DropOldest,
        OverflowPolicy::DropNewest => ChannelPolicy::DropNewest,
    }
}

/// The producing end of a channel.
pub struct OutPort {
    component: ComponentId,
    name: PortName,
    schema: Schema,
    strict: bool,
    timeout_ms: u64,
    sender: Option<mpsc::Sender<Message>>,
    metrics: PortMetrics,
}

impl OutPort {
    /// Creates an OUT port that is declared but not wired to any channel.
    /// Sends on a detached port are discarded after validation.
    #[must_use]
    pub fn detached(component: &ComponentId, spec: &PortSpec, strict: bool) -> Self {
        Self {
            component: component.clone(),
            name: spec.name.clone(),
            schema: spec.schema.clone(),
            strict,
            timeout_ms: spec.timeout_ms,
            sender: None,
            metrics: PortMetrics::new(component, &spec.name),
        }
    }

    /// The port name.
    #[must_use]
    pub fn name(&self) -> &PortName {
        &self.name
    }

    /// The schema owned by this port.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The port's metric set.
    #[must_use]
    pub fn metrics(&self) -> &PortMetrics {
        &self.metrics
    }

    /// Sends a message, validating it against the port schema first.
    ///
    /// Suspension and drop behavior follow the port's overflow policy. The
    /// blocked duration is accounted on the port either way.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaViolation`] when validation fails; nothing is enqueued.
    /// - [`Error::SendTimeout`] when a bounded wait expires (capacity, not an
    ///   item error).
    /// - [`Error::ChannelSendError`] when the channel is closed.
    pub async fn send(&self, msg: Message) -> Result<(), Error> {
        if let Err(violation) = self.schema.check(msg.fields(), self.strict) {
            self.metrics.errors_total.inc();
            return Err(Error::SchemaViolation {
                component: self.component.clone(),
                port: Some(self.name.clone()),
                violation,
            });
        }

        let Some(sender) = &self.sender else {
            // Declared but unbound: the message has nowhere to go and is
            // discarded after validation. Not a drop, not an error.
            return Ok(());
        };

        let start = Instant::now();
        let result = sender.send(msg).await;
        let blocked = start.elapsed();
        if blocked > Duration::ZERO {
            self.metrics.add_blocked_ms(blocked.as_secs_f64() * 1e3);
        }

        match result {
            Ok(outcome) => {
                match outcome {
                    SendOutcome::Enqueued => self.metrics.messages_out_total.inc(),
                    SendOutcome::DroppedOldest => {
                        self.metrics.messages_out_total.inc();
                        self.metrics.messages_dropped_total.inc();
                        tracing::debug!(
                            component = %self.component,
                            port = %self.name,
                            reason = "overflow_drop_oldest",
                            "message dropped"
                        );
                    }
                    SendOutcome::DroppedNewest => {
                        self.metrics.messages_dropped_total.inc();
                        tracing::debug!(
                            component = %self.component,
                            port = %self.name,
                            reason = "overflow_drop_newest",
                            "message dropped"
                        );
                    }
                }
                self.metrics
                    .observe_depth(sender.depth(), sender.capacity());
                Ok(())
            }
            Err(SendError::Timeout(_)) => Err(Error::SendTimeout {
                component: self.component.clone(),
                port: self.name.clone(),
                timeout_ms: self.timeout_ms,
            }),
            Err(SendError::Closed(_)) | Err(SendError::Full(_)) => Err(Error::ChannelSendError {
                component: self.component.clone(),
                port: self.name.clone(),
                error: "channel closed".to_owned(),
            }),
        }
    }

    /// Signals end-of-stream. The consumer drains buffered messages, then its
    /// iteration terminates.
    pub fn close(&self) {
        if let Some(sender) = &self.sender {
            sender.close();
        }
    }
}

/// The consuming end of a channel.
pub struct InPort {
    name: PortName,
    schema: Schema,
    receiver: mpsc::Receiver<Message>,
    metrics: PortMetrics,
}

impl InPort {
    /// Creates an IN port that is declared but not wired to any channel. It
    /// reads as immediately closed, so the owning component treats it as an
    /// exhausted input.
    #[must_use]
    pub fn detached(component: &ComponentId, spec: &PortSpec) -> Self {
        let (sender, receiver) = mpsc::Channel::<Message>::new(1, ChannelPolicy::Block);
        drop(sender);
        Self {
            name: spec.name.clone(),
            schema: spec.schema.clone(),
            receiver,
            metrics: PortMetrics::new(component, &spec.name),
        }
    }

    /// The port name.
    #[must_use]
    pub fn name(&self) -> &PortName {
        &self.name
    }

    /// The schema this port expects.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The port's metric set.
    #[must_use]
    pub fn metrics(&self) -> &PortMetrics {
        &self.metrics
    }

    /// Receives the next message, recording message age when the producer
    /// stamped an `event_time`.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Closed`] once the channel is closed and drained;
    /// this is the normal end-of-stream signal, not a failure.
    pub async fn recv(&self) -> Result<Message, RecvError> {
        let msg = self.receiver.recv().await?;
        self.account(&msg);
        Ok(msg)
    }

    /// Non-suspending receive.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Empty`] when no message is buffered, or
    /// [`RecvError::Closed`] after close-and-drain.
    pub fn try_recv(&self) -> Result<Message, RecvError> {
        let msg = self.receiver.try_recv()?;
        self.account(&msg);
        Ok(msg)
    }

    fn account(&self, msg: &Message) {
        self.metrics.messages_in_total.inc();
        self.metrics
            .observe_depth(self.receiver.depth(), self.receiver.capacity());
        if let Some(age) = msg.age_ms(Utc::now()) {
            self.metrics.message_age_ms.observe(age);
        }
    }
}

/// Pairs one OUT port with one IN port over a fresh bounded channel.
///
/// The consumer's schema must accept the producer's (structural
/// compatibility plus version range); capacity and overflow policy come from
/// the producing port spec.
///
/// # Errors
///
/// Returns [`Error::ConnectSchemaMismatch`] when the schemas are not
/// compatible.
pub fn wire(
    producer: &ComponentId,
    out_spec: &PortSpec,
    strict: bool,
    consumer: &ComponentId,
    in_spec: &PortSpec,
) -> Result<(OutPort, InPort), Error> {
    if let Err(details) = in_spec.schema.accepts(&out_spec.schema) {
        return Err(Error::ConnectSchemaMismatch {
            producer: producer.clone(),
            out_port: out_spec.name.clone(),
            consumer: consumer.clone(),
            in_port: in_spec.name.clone(),
            details,
        });
    }

    let (sender, receiver) = mpsc::Channel::new(out_spec.buffer_size, channel_policy(out_spec));
    let out_port = OutPort {
        component: producer.clone(),
        name: out_spec.name.clone(),
        schema: out_spec.schema.clone(),
        strict,
        timeout_ms: out_spec.timeout_ms,
        sender: Some(sender),
        metrics: PortMetrics::new(producer, &out_spec.name),
    };
    let in_port = InPort {
        name: in_spec.name.clone(),
        schema: in_spec.schema.clone(),
        receiver,
        metrics: PortMetrics::new(consumer, &in_spec.name),
    };
    Ok((out_port, in_port))
}
