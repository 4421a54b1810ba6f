// SPDX-License-Identifier: Apache-2.0

//! Errors for the component runtime.
//!
//! Important note: It is important not to use `!Send` data types in errors (e.g. avoid using Rc) to
//! ensure these errors can be emitted in both `Send` and `!Send` contexts.

use autocoder_df_config::schema::SchemaViolation;
use autocoder_df_config::{ComponentId, PortName};

/// High-level classification for component failures to aid troubleshooting.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ComponentErrorKind {
    /// Errors caused by invalid or incomplete configuration detected at runtime.
    Configuration,
    /// Errors raised while opening external resources in `setup`.
    Setup,
    /// Errors raised by the business-logic hook while processing an item.
    Process,
    /// Errors raised while releasing resources in `cleanup`.
    Cleanup,
    /// Catch-all for component failures that do not fit other categories.
    Other,
}

impl std::fmt::Display for ComponentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ComponentErrorKind::Configuration => "configuration",
            ComponentErrorKind::Setup => "setup",
            ComponentErrorKind::Process => "process",
            ComponentErrorKind::Cleanup => "cleanup",
            ComponentErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// All errors that can occur in the component runtime.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wrapper for the blueprint/config errors.
    #[error("A config error occurred: {0}")]
    ConfigError(#[from] Box<autocoder_df_config::error::Error>),

    /// A wrapper for the channel receive errors.
    #[error("A channel error occurred: {0}")]
    ChannelRecvError(#[from] autocoder_df_channel::error::RecvError),

    /// A message could not be sent on a port's channel.
    #[error("A channel send error occurred on {component}.{port}: {error}")]
    ChannelSendError {
        /// The component owning the port.
        component: ComponentId,
        /// The port that failed to send.
        port: PortName,
        /// The reason (e.g., channel closed).
        error: String,
    },

    /// A bounded-wait send expired before capacity became available.
    ///
    /// This is a capacity condition, not an error of the item: at an ingress
    /// boundary it becomes a 503-style rejection.
    #[error("Send timed out on {component}.{port} after {timeout_ms} ms")]
    SendTimeout {
        /// The component owning the port.
        component: ComponentId,
        /// The port that timed out.
        port: PortName,
        /// The configured bounded wait, in milliseconds.
        timeout_ms: u64,
    },

    /// A message failed schema validation. Aborts the item, never the system.
    #[error("Schema validation failed at {component}: {violation}")]
    SchemaViolation {
        /// The component where validation failed.
        component: ComponentId,
        /// The port involved, when known.
        port: Option<PortName>,
        /// The violation.
        violation: SchemaViolation,
    },

    /// A transformer configured with `require_output = true` returned no
    /// output. Programmer error; fails fast.
    #[error("Transformer {component} dropped a message but require_output is set")]
    DropForbidden {
        /// The offending component.
        component: ComponentId,
    },

    /// A splitter emitted to a port it never declared. Fails the item.
    #[error("Splitter {component} emitted to undeclared port `{port}`")]
    UndeclaredPort {
        /// The offending component.
        component: ComponentId,
        /// The undeclared port name.
        port: PortName,
    },

    /// A port referenced during wiring does not exist on the component.
    #[error("Unknown port `{port}` on component {component}")]
    UnknownPort {
        /// The component that lacks the port.
        component: ComponentId,
        /// The missing port name.
        port: PortName,
    },

    /// The schemas on the two ends of a channel are incompatible.
    #[error("Schema mismatch wiring {producer}.{out_port} -> {consumer}.{in_port}: {details}")]
    ConnectSchemaMismatch {
        /// The producing component.
        producer: ComponentId,
        /// The producing port.
        out_port: PortName,
        /// The consuming component.
        consumer: ComponentId,
        /// The consuming port.
        in_port: PortName,
        /// A description of the incompatibility.
        details: String,
    },

    /// A component failure classified by lifecycle stage.
    #[error("A component error occurred in {component} ({kind}): {error}")]
    ComponentError {
        /// The component that failed.
        component: ComponentId,
        /// High-level classification of the failure.
        kind: ComponentErrorKind,
        /// The error that occurred.
        error: String,
    },

    /// A transient external failure (I/O, state adapter). Subject to retry
    /// when the retry capability is enabled.
    #[error("A transient error occurred in {component}: {error}")]
    Transient {
        /// The component that failed.
        component: ComponentId,
        /// The error that occurred.
        error: String,
    },

    /// The circuit breaker is open for this component; items fail fast until
    /// the recovery timeout elapses.
    #[error("Circuit breaker open for {component}")]
    CircuitOpen {
        /// The component whose circuit is open.
        component: ComponentId,
    },

    /// A capability re-entered the processing chain beyond the allowed depth.
    /// Programmer error; fails fast.
    #[error("Re-entrancy violation in {component}: depth {depth} exceeds the allowed maximum of 1")]
    ReentrancyViolation {
        /// The offending component.
        component: ComponentId,
        /// The observed re-entry depth.
        depth: u32,
    },

    /// A state adapter failure surfaced to the runtime.
    #[error("A state adapter error occurred in {component}: {error}")]
    StateError {
        /// The component using the adapter.
        component: ComponentId,
        /// The error that occurred.
        error: String,
    },

    /// A component requiring durable state was built without a state
    /// capability. Programmer error; fails fast at setup.
    #[error("Component {component} requires a state capability but none is configured")]
    StateCapabilityMissing {
        /// The offending component.
        component: ComponentId,
    },

    /// The specified component already exists in the harness.
    #[error("The component `{component}` already exists")]
    ComponentAlreadyExists {
        /// The duplicated component id.
        component: ComponentId,
    },

    /// A task error that occurred during the execution of a join task.
    #[error("Join task error: {error}, cancelled: {is_canceled}, panic: {is_panic}")]
    JoinTaskError {
        /// Flag indicating whether the task was canceled.
        is_canceled: bool,
        /// Flag indicating whether the task panicked.
        is_panic: bool,
        /// The error that occurred.
        error: String,
    },

    /// The drain grace period expired and tasks were forcibly cancelled.
    #[error("Shutdown grace period expired; cancelled components: {pending:?}")]
    ShutdownTimeout {
        /// Components that were still running when the grace period expired.
        pending: Vec<ComponentId>,
    },

    /// An internal error that occurred in the component runtime.
    #[error("Internal error: {message}")]
    InternalError {
        /// An internal error message.
        message: String,
    },
}

impl Error {
    /// Returns the name of the error variant as a string.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Error::ConfigError(_) => "ConfigError",
            Error::ChannelRecvError(_) => "ChannelRecvError",
            Error::ChannelSendError { .. } => "ChannelSendError",
            Error::SendTimeout { .. } => "SendTimeout",
            Error::SchemaViolation { .. } => "SchemaViolation",
            Error::DropForbidden { .. } => "DropForbidden",
            Error::UndeclaredPort { .. } => "UndeclaredPort",
            Error::UnknownPort { .. } => "UnknownPort",
            Error::ConnectSchemaMismatch { .. } => "ConnectSchemaMismatch",
            Error::ComponentError { .. } => "ComponentError",
            Error::Transient { .. } => "Transient",
            Error::CircuitOpen { .. } => "CircuitOpen",
            Error::ReentrancyViolation { .. } => "ReentrancyViolation",
            Error::StateError { .. } => "StateError",
            Error::StateCapabilityMissing { .. } => "StateCapabilityMissing",
            Error::ComponentAlreadyExists { .. } => "ComponentAlreadyExists",
            Error::JoinTaskError { .. } => "JoinTaskError",
            Error::ShutdownTimeout { .. } => "ShutdownTimeout",
            Error::InternalError { .. } => "InternalError",
        }
    }

    /// Returns `true` if the error aborts only the current item: processing
    /// of subsequent items continues after the envelope is emitted.
    ///
    /// Everything else is fatal and propagates to the supervisor, which
    /// applies the configured policy (default: abort the system).
    #[must_use]
    pub fn is_item_recoverable(&self) -> bool {
        matches!(
            self,
            Error::SchemaViolation { .. }
                | Error::UndeclaredPort { .. }
                | Error::Transient { .. }
                | Error::CircuitOpen { .. }
                | Error::StateError { .. }
        )
    }

    /// Returns `true` if the retry capability may re-invoke the hook for
    /// this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::StateError { .. })
    }

    /// Returns `true` if a caller observing this error should expect success
    /// on a later retry (used for the error envelope's `retryable` flag).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transient { .. }
                | Error::StateError { .. }
                | Error::SendTimeout { .. }
                | Error::CircuitOpen { .. }
        )
    }
}
