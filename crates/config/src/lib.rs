// SPDX-License-Identifier: Apache-2.0

//! Blueprint configuration model for the component runtime.
//!
//! Data Model:
//! - system (blueprint)
//!   - components (typed nodes, optionally backed by a recipe)
//!     - ports (named, directional, schema-carrying)
//!   - bindings (one OUT port to one IN port)
//!
//! A blueprint describes a system as a directed acyclic graph of components
//! connected port-to-port. The declared component *type* is advisory: the
//! [`topology`] module derives each component's effective role from its ports
//! and edges and reconciles the graph so every source reaches a sink.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub mod blueprint;
pub mod capability;
pub mod error;
pub mod schema;
pub mod topology;

/// The id of a system described by a blueprint.
pub type SystemId = Cow<'static, str>;

/// The id of a component in the system.
pub type ComponentId = Cow<'static, str>;

/// The name of a component port (snake_case, unique within its component).
pub type PortName = Cow<'static, str>;

/// The declared type of a component (e.g. `Store`, `APIEndpoint`, `Filter`).
pub type TypeName = Cow<'static, str>;

/// The name of a recipe in the recipe registry.
pub type RecipeName = Cow<'static, str>;

/// The description of a system or a component.
pub type Description = Cow<'static, str>;

/// The five mathematical primitives every component is built from.
///
/// All other roles are recipes (configurations) over these; there is no sixth
/// primitive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    /// `0 -> N`: produces messages on its OUT ports until shutdown.
    Source,
    /// `N -> 0`: consumes messages, never emits.
    Sink,
    /// `1 -> {0,1}`: pointwise function with optional drop.
    Transformer,
    /// `1 -> N`: routes one input item to any subset of its OUT ports.
    Splitter,
    /// `N -> 1`: interleaves several inputs into one output.
    Merger,
}

impl PrimitiveKind {
    /// Human-readable name of the primitive.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Source => "source",
            PrimitiveKind::Sink => "sink",
            PrimitiveKind::Transformer => "transformer",
            PrimitiveKind::Splitter => "splitter",
            PrimitiveKind::Merger => "merger",
        }
    }
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
