// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use crate::topology::LintReport;
use crate::{ComponentId, PortName, SystemId};
use miette::Diagnostic;
use std::fmt::Display;

/// Errors that can occur while processing the configuration of a system,
/// a component, or a binding.
///
/// Note: All errors are contextualized with the system id, if applicable.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// A collection of errors that occurred during parsing or validating the configuration.
    #[error("Invalid configuration: {errors:?}")]
    #[diagnostic(code(blueprint::invalid_configuration))]
    InvalidConfiguration {
        /// A list of errors that occurred during parsing or validating the configuration.
        #[related]
        errors: Vec<Error>,
    },

    /// An error that occurred while reading a blueprint file.
    #[error("File read error: {details}\nContext: {context}")]
    #[diagnostic(code(blueprint::file_read_error))]
    FileReadError {
        /// The context in which the error occurred.
        context: Context,
        /// A description of the error that occurred.
        details: String,
    },

    /// An error that occurred while deserializing a blueprint file.
    #[error("{format} deserialization error: {details}\nContext: {context}")]
    #[diagnostic(code(blueprint::deserialization_error))]
    DeserializationError {
        /// The context in which the error occurred.
        context: Context,
        /// The format of the blueprint file (e.g. "JSON").
        format: String,
        /// A description of the error that occurred.
        details: String,
    },

    /// A cycle was detected in the port graph.
    #[error("Cycle detected involving components: {components:?}\nContext: {context}")]
    #[diagnostic(code(blueprint::cycle_detected))]
    CycleDetected {
        /// The context in which the error occurred.
        context: Context,
        /// The components involved in the cycle.
        components: Vec<ComponentId>,
    },

    /// A component with the same id already exists in the system.
    #[error("Duplicated component id `{component_id}`\nContext: {context}")]
    #[diagnostic(code(blueprint::duplicate_component))]
    DuplicateComponent {
        /// The context in which the error occurred.
        context: Context,
        /// The id of the component that was duplicated.
        component_id: ComponentId,
    },

    /// The same port was bound to more than one channel.
    ///
    /// Fan-out requires explicit OUT ports; a channel pairs exactly one OUT
    /// port with exactly one IN port.
    #[error(
        "The port `{port}` on component `{source_component}` was bound to more than one channel\nContext: {context}"
    )]
    #[diagnostic(code(blueprint::duplicate_binding))]
    DuplicateBinding {
        /// The context in which the error occurred.
        context: Context,
        /// The component on which the port was bound twice.
        source_component: ComponentId,
        /// The port name that was used twice.
        port: PortName,
    },

    /// A binding references a component that does not exist in the system.
    #[error("Binding references unknown component `{component_id}`\nContext: {context}")]
    #[diagnostic(code(blueprint::unknown_component))]
    UnknownComponent {
        /// The context in which the error occurred.
        context: Context,
        /// The id of the missing component.
        component_id: ComponentId,
    },

    /// A binding references a port that is not declared on its component.
    #[error(
        "Binding references unknown port `{component_id}.{port}` (declared: {declared:?})\nContext: {context}"
    )]
    #[diagnostic(code(blueprint::unknown_port))]
    UnknownPort {
        /// The context in which the error occurred.
        context: Context,
        /// The component owning the port.
        component_id: ComponentId,
        /// The missing port name.
        port: PortName,
        /// The port names declared on the component.
        declared: Vec<PortName>,
    },

    /// A binding endpoint selector is malformed.
    #[error("Invalid binding endpoint `{selector}`: expected `component.port`")]
    #[diagnostic(code(blueprint::invalid_binding_endpoint))]
    InvalidBindingEndpoint {
        /// The raw endpoint selector.
        selector: String,
    },

    /// The schemas on the two ends of a binding are not compatible.
    #[error(
        "Schema mismatch on binding {source_component}.{out_port} -> {target}.{in_port}: {details}\nContext: {context}"
    )]
    #[diagnostic(code(blueprint::schema_mismatch))]
    SchemaMismatch {
        /// The context in which the error occurred.
        context: Context,
        /// The producing component.
        source_component: ComponentId,
        /// The producing port.
        out_port: PortName,
        /// The consuming component.
        target: ComponentId,
        /// The consuming port.
        in_port: PortName,
        /// A description of the incompatibility.
        details: String,
    },

    /// Topology validation raised one or more fatal lints.
    #[error("Topology validation failed:\n{report}")]
    #[diagnostic(code(blueprint::lint_failed))]
    LintFailed {
        /// The structured lint report, citing rule codes.
        report: LintReport,
    },

    /// A capability budget override exceeds the declared maximum.
    #[error(
        "Budget override for capability `{capability}` exceeds declared maximum: {field} {requested} > {maximum}"
    )]
    #[diagnostic(code(blueprint::budget_exceeded))]
    BudgetExceeded {
        /// The capability whose budget was overridden.
        capability: String,
        /// The budget field that was exceeded.
        field: String,
        /// The requested value.
        requested: u64,
        /// The declared maximum.
        maximum: u64,
    },

    /// An invalid user configuration occurred.
    #[error("An invalid user configuration occurred: {error}")]
    #[diagnostic(code(blueprint::invalid_user_config))]
    InvalidUserConfig {
        /// An error message.
        error: String,
    },
}

/// Information that all errors provide to help identify
/// the context in which they occurred.
#[derive(Debug, Default)]
pub struct Context {
    /// The system id, if applicable.
    pub system_id: Option<SystemId>,
}

impl Context {
    /// Creates a new context with the given system id.
    #[must_use]
    pub const fn new(system_id: SystemId) -> Self {
        Self {
            system_id: Some(system_id),
        }
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(system_id) = &self.system_id {
            write!(f, "System: '{system_id}'")?;
        }
        Ok(())
    }
}
