// SPDX-License-Identifier: Apache-2.0

//! Recipe registry and expander.
//!
//! A recipe is a named configuration over one of the five primitives: default
//! ports, default config, capability defaults, and a business-logic slot.
//! Thirteen recipes cover the generator's role taxonomy; anything else is a
//! direct component definition, not a new primitive class.
//!
//! The registry follows a static factory slice fronted by a lazily built
//! name map; the [`expander`] is the only place where recipes materialize
//! into runtime components.

use autocoder_df_config::blueprint::{OverflowPolicy, PortSpec};
use autocoder_df_config::capability::{CapabilityTuning, StateBackend};
use autocoder_df_config::schema::Schema;
use autocoder_df_config::{PrimitiveKind, RecipeName};
use autocoder_df_engine::component::Component;
use autocoder_df_engine::ingress::IngressHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::OnceLock;

pub mod expander;
pub mod logic;
pub mod prompt;

pub use expander::{ComponentDefinition, expand, expand_blueprint, instantiate};

/// Errors raised by the recipe system.
#[derive(thiserror::Error, Debug)]
pub enum RecipeError {
    /// The named recipe is not in the registry.
    #[error("Unknown recipe `{recipe}`")]
    UnknownRecipe {
        /// The unknown recipe name.
        recipe: RecipeName,
    },

    /// The method slot does not fit the base primitive's hook signature.
    /// Programmer error; fails fast at expansion.
    #[error("Recipe `{recipe}`: method slot `{slot}` does not match primitive `{primitive}`")]
    SlotMismatch {
        /// The offending recipe.
        recipe: RecipeName,
        /// The declared method slot.
        slot: MethodSlot,
        /// The base primitive.
        primitive: PrimitiveKind,
    },

    /// The merged configuration is invalid for the recipe.
    #[error("Recipe `{recipe}`: invalid configuration: {error}")]
    InvalidConfig {
        /// The offending recipe.
        recipe: RecipeName,
        /// A description of the problem.
        error: String,
    },

    /// A state adapter could not be constructed.
    #[error("State adapter error: {0}")]
    State(#[from] autocoder_df_state::StateError),

    /// A runtime-layer error surfaced during instantiation.
    #[error("Engine error: {0}")]
    Engine(#[from] autocoder_df_engine::error::Error),

    /// The prompt service failed or timed out.
    #[error("Prompt service `{provider}` failed: {error}")]
    Prompt {
        /// The provider name.
        provider: String,
        /// A description of the failure.
        error: String,
    },
}

/// The business-logic hook a recipe fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MethodSlot {
    /// `Source::produce`.
    Produce,
    /// `Sink::consume`.
    Consume,
    /// `Transformer::transform`.
    Transform,
    /// `Splitter::split`.
    Split,
    /// `Merger::merge_step`.
    Merge,
}

impl MethodSlot {
    /// Returns `true` if the slot matches the primitive's hook signature.
    #[must_use]
    pub const fn matches(&self, primitive: PrimitiveKind) -> bool {
        matches!(
            (self, primitive),
            (MethodSlot::Produce, PrimitiveKind::Source)
                | (MethodSlot::Consume, PrimitiveKind::Sink)
                | (MethodSlot::Transform, PrimitiveKind::Transformer)
                | (MethodSlot::Split, PrimitiveKind::Splitter)
                | (MethodSlot::Merge, PrimitiveKind::Merger)
        )
    }
}

impl std::fmt::Display for MethodSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MethodSlot::Produce => "produce",
            MethodSlot::Consume => "consume",
            MethodSlot::Transform => "transform",
            MethodSlot::Split => "split",
            MethodSlot::Merge => "merge",
        };
        f.write_str(label)
    }
}

/// A materialized component plus its boundary handles.
pub struct Instantiated {
    /// The runnable component.
    pub component: Component,
    /// The ingress submission handle, for ingress recipes (APIEndpoint,
    /// WebSocket). The external listener drives it.
    pub ingress: Option<IngressHandle>,
}

/// A factory describing one recipe.
pub struct RecipeFactory {
    /// Registry name (snake_case).
    pub name: &'static str,
    /// The base primitive.
    pub base_primitive: PrimitiveKind,
    /// The business-logic slot the generator fills.
    pub method_slot: MethodSlot,
    /// Whether the transformer hook may drop items.
    pub require_output: bool,
    /// Default input ports.
    pub default_inputs: fn() -> Vec<PortSpec>,
    /// Default output ports.
    pub default_outputs: fn() -> Vec<PortSpec>,
    /// Default recipe configuration.
    pub default_config: fn() -> Value,
    /// Default capability tuning (extension opt-ins).
    pub default_tuning: fn() -> CapabilityTuning,
    /// Builds the runnable component from an expanded definition.
    pub instantiate: fn(&ComponentDefinition) -> Result<Instantiated, RecipeError>,
}

fn message_port(name: &'static str) -> PortSpec {
    PortSpec::new(name, Schema::any("message"))
}

fn no_ports() -> Vec<PortSpec> {
    Vec::new()
}

fn single_in() -> Vec<PortSpec> {
    vec![message_port("in")]
}

fn single_out() -> Vec<PortSpec> {
    vec![message_port("out")]
}

fn empty_config() -> Value {
    json!({})
}

fn no_tuning() -> CapabilityTuning {
    CapabilityTuning::default()
}

fn store_tuning() -> CapabilityTuning {
    CapabilityTuning {
        state: Some(StateBackend::Sqlite {
            path: "autocoder_state.db".to_owned(),
        }),
        ..CapabilityTuning::default()
    }
}

fn api_endpoint_outputs() -> Vec<PortSpec> {
    vec![
        message_port("out")
            .with_overflow_policy(OverflowPolicy::BlockWithTimeout)
            .with_timeout_ms(2_000),
    ]
}

fn controller_outputs() -> Vec<PortSpec> {
    vec![message_port("out"), message_port("rejected")]
}

fn router_outputs() -> Vec<PortSpec> {
    vec![message_port("matched"), message_port("default")]
}

fn aggregator_inputs() -> Vec<PortSpec> {
    vec![message_port("in_a"), message_port("in_b")]
}

/// The 13 role recipes, in registry order.
static RECIPES: &[RecipeFactory] = &[
    RecipeFactory {
        name: "store",
        base_primitive: PrimitiveKind::Transformer,
        method_slot: MethodSlot::Transform,
        require_output: true,
        default_inputs: single_in,
        default_outputs: no_ports,
        default_config: || json!({ "key_field": "id" }),
        default_tuning: store_tuning,
        instantiate: logic::transforms::instantiate_store,
    },
    RecipeFactory {
        name: "controller",
        base_primitive: PrimitiveKind::Splitter,
        method_slot: MethodSlot::Split,
        require_output: false,
        default_inputs: single_in,
        default_outputs: controller_outputs,
        default_config: || {
            json!({ "route_field": "action", "routes": {}, "default_port": "rejected" })
        },
        default_tuning: no_tuning,
        instantiate: logic::splits::instantiate_controller,
    },
    RecipeFactory {
        name: "api_endpoint",
        base_primitive: PrimitiveKind::Source,
        method_slot: MethodSlot::Produce,
        require_output: false,
        default_inputs: no_ports,
        default_outputs: api_endpoint_outputs,
        default_config: || json!({ "success_status": 202, "ingress_capacity": 64 }),
        default_tuning: no_tuning,
        instantiate: logic::sources::instantiate_api_endpoint,
    },
    RecipeFactory {
        name: "message_queue",
        base_primitive: PrimitiveKind::Transformer,
        method_slot: MethodSlot::Transform,
        require_output: true,
        default_inputs: single_in,
        default_outputs: single_out,
        default_config: empty_config,
        default_tuning: no_tuning,
        instantiate: logic::transforms::instantiate_message_queue,
    },
    RecipeFactory {
        name: "aggregator",
        base_primitive: PrimitiveKind::Merger,
        method_slot: MethodSlot::Merge,
        require_output: false,
        default_inputs: aggregator_inputs,
        default_outputs: single_out,
        default_config: || json!({ "value_field": "value", "window_ms": 1000 }),
        default_tuning: no_tuning,
        instantiate: logic::merges::instantiate_aggregator,
    },
    RecipeFactory {
        name: "filter",
        base_primitive: PrimitiveKind::Transformer,
        method_slot: MethodSlot::Transform,
        require_output: false,
        default_inputs: single_in,
        default_outputs: single_out,
        default_config: || json!({ "field": null, "equals": null }),
        default_tuning: no_tuning,
        instantiate: logic::transforms::instantiate_filter,
    },
    RecipeFactory {
        name: "router",
        base_primitive: PrimitiveKind::Splitter,
        method_slot: MethodSlot::Split,
        require_output: false,
        default_inputs: single_in,
        default_outputs: router_outputs,
        default_config: || json!({ "rules": [], "default_port": "default" }),
        default_tuning: no_tuning,
        instantiate: logic::splits::instantiate_router,
    },
    RecipeFactory {
        name: "cache",
        base_primitive: PrimitiveKind::Transformer,
        method_slot: MethodSlot::Transform,
        require_output: true,
        default_inputs: single_in,
        default_outputs: single_out,
        default_config: || json!({ "key_field": "id", "ttl_ms": 60_000, "max_entries": 1024 }),
        default_tuning: no_tuning,
        instantiate: logic::transforms::instantiate_cache,
    },
    RecipeFactory {
        name: "validator",
        base_primitive: PrimitiveKind::Transformer,
        method_slot: MethodSlot::Transform,
        require_output: false,
        default_inputs: single_in,
        default_outputs: single_out,
        default_config: || json!({ "required_fields": [] }),
        default_tuning: no_tuning,
        instantiate: logic::transforms::instantiate_validator,
    },
    RecipeFactory {
        name: "logger",
        base_primitive: PrimitiveKind::Sink,
        method_slot: MethodSlot::Consume,
        require_output: false,
        default_inputs: single_in,
        default_outputs: no_ports,
        default_config: || json!({ "level": "info" }),
        default_tuning: no_tuning,
        instantiate: logic::sinks::instantiate_logger,
    },
    RecipeFactory {
        name: "metrics_collector",
        base_primitive: PrimitiveKind::Sink,
        method_slot: MethodSlot::Consume,
        require_output: false,
        default_inputs: single_in,
        default_outputs: no_ports,
        default_config: || json!({ "value_field": null }),
        default_tuning: no_tuning,
        instantiate: logic::sinks::instantiate_metrics_sink,
    },
    RecipeFactory {
        name: "websocket",
        base_primitive: PrimitiveKind::Source,
        method_slot: MethodSlot::Produce,
        require_output: false,
        default_inputs: no_ports,
        default_outputs: single_out,
        default_config: || json!({ "heartbeat_ms": 5_000, "ingress_capacity": 64 }),
        default_tuning: no_tuning,
        instantiate: logic::sources::instantiate_websocket,
    },
    RecipeFactory {
        name: "stream_processor",
        base_primitive: PrimitiveKind::Transformer,
        method_slot: MethodSlot::Transform,
        require_output: false,
        default_inputs: single_in,
        default_outputs: single_out,
        default_config: || json!({ "batch_size": 10, "flush_interval_ms": null }),
        default_tuning: no_tuning,
        instantiate: logic::transforms::instantiate_stream_processor,
    },
];

static RECIPE_MAP: OnceLock<HashMap<&'static str, &'static RecipeFactory>> = OnceLock::new();

/// The recipe registry, keyed by recipe name.
pub fn registry() -> &'static HashMap<&'static str, &'static RecipeFactory> {
    RECIPE_MAP.get_or_init(|| RECIPES.iter().map(|f| (f.name, f)).collect())
}

/// Looks up a recipe by name.
///
/// # Errors
///
/// Returns [`RecipeError::UnknownRecipe`] for unregistered names.
pub fn get(recipe: &str) -> Result<&'static RecipeFactory, RecipeError> {
    registry()
        .get(recipe)
        .copied()
        .ok_or_else(|| RecipeError::UnknownRecipe {
            recipe: recipe.to_owned().into(),
        })
}

/// Maps a declared component type to its recipe name, for blueprint nodes
/// that reference a role type without an explicit `recipe` field.
#[must_use]
pub fn recipe_for_type(type_name: &str) -> Option<&'static str> {
    match type_name {
        "Store" => Some("store"),
        "Controller" => Some("controller"),
        "APIEndpoint" => Some("api_endpoint"),
        "MessageQueue" => Some("message_queue"),
        "Aggregator" => Some("aggregator"),
        "Filter" => Some("filter"),
        "Router" => Some("router"),
        "Cache" => Some("cache"),
        "Validator" => Some("validator"),
        "Logger" => Some("logger"),
        "MetricsCollector" => Some("metrics_collector"),
        "WebSocket" => Some("websocket"),
        "StreamProcessor" => Some("stream_processor"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_holds_all_thirteen_recipes() {
        assert_eq!(registry().len(), 13);
        for factory in RECIPES {
            assert!(
                factory.method_slot.matches(factory.base_primitive),
                "recipe `{}` slot/primitive mismatch",
                factory.name
            );
        }
    }

    #[test]
    fn every_role_type_maps_to_a_recipe() {
        for role in [
            "Store",
            "Controller",
            "APIEndpoint",
            "MessageQueue",
            "Aggregator",
            "Filter",
            "Router",
            "Cache",
            "Validator",
            "Logger",
            "MetricsCollector",
            "WebSocket",
            "StreamProcessor",
        ] {
            let name = recipe_for_type(role).expect("role maps");
            assert!(registry().contains_key(name));
        }
        assert!(recipe_for_type("SomethingElse").is_none());
    }

    #[test]
    fn unknown_recipe_is_an_error() {
        assert!(matches!(
            get("bespoke"),
            Err(RecipeError::UnknownRecipe { .. })
        ));
    }
}
