// SPDX-License-Identifier: Apache-2.0

//! Recipe expander.
//!
//! Deterministic transformer from `recipe + component name + user config` to
//! an executable [`ComponentDefinition`]: same inputs yield a byte-identical
//! serialized artifact. The expander merges user configuration over recipe
//! defaults (user wins on leaves), materializes ports, verifies the method
//! slot against the primitive hook, and binds the business-logic body.

use crate::prompt::{GenerateOptions, PromptService};
use crate::{Instantiated, MethodSlot, RecipeError, get, recipe_for_type};
use autocoder_df_config::blueprint::{Blueprint, ComponentSpec, PortSpec};
use autocoder_df_config::capability::CapabilityTuning;
use autocoder_df_config::{ComponentId, PrimitiveKind, RecipeName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The business-logic body bound into a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BodyBinding {
    /// The built-in implementation the runtime executes.
    pub builtin: RecipeName,
    /// Generated body text from the prompt service, kept alongside the
    /// artifact for review. The runtime never executes this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A self-contained, executable component definition: the expanded artifact
/// the generator persists and the runtime instantiates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ComponentDefinition {
    /// The component name.
    pub name: ComponentId,
    /// The recipe this definition was expanded from.
    pub recipe: RecipeName,
    /// The base primitive.
    pub primitive: PrimitiveKind,
    /// The filled method slot.
    pub method_slot: MethodSlot,
    /// Declared input ports (names and schemas from the recipe, capacities
    /// from configuration).
    pub inputs: Vec<PortSpec>,
    /// Declared output ports.
    pub outputs: Vec<PortSpec>,
    /// Whether the transformer hook may drop items.
    pub require_output: bool,
    /// Capability kernel tuning plus opt-in extensions.
    pub capabilities: CapabilityTuning,
    /// Merged recipe configuration.
    pub config: Value,
    /// The bound business-logic body.
    pub body: BodyBinding,
}

impl ComponentDefinition {
    /// Canonical serialization of the artifact. Deterministic: object keys
    /// are sorted and struct fields have a fixed order, so identical inputs
    /// produce identical bytes.
    #[must_use]
    pub fn artifact_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Merges `user` over `base`: objects merge recursively with user leaves
/// winning; any non-object user value replaces the base value; `null` (the
/// absent config) keeps the base.
#[must_use]
pub fn merge_config(base: Value, user: &Value) -> Value {
    match (base, user) {
        (base, Value::Null) => base,
        (Value::Object(mut base_map), Value::Object(user_map)) => {
            for (key, user_value) in user_map {
                let merged = match base_map.remove(key) {
                    Some(base_value) => merge_config(base_value, user_value),
                    None => user_value.clone(),
                };
                let _ = base_map.insert(key.clone(), merged);
            }
            Value::Object(base_map)
        }
        (_, user) => user.clone(),
    }
}

/// Merges capability tuning: the kernel entries come from the user spec
/// (they always carry defaults), while extension opt-ins fall back to the
/// recipe defaults when the user did not declare them.
fn merge_tuning(user: &CapabilityTuning, defaults: &CapabilityTuning) -> CapabilityTuning {
    CapabilityTuning {
        schema_validator: user.schema_validator.clone(),
        rate_limit: user.rate_limit.clone(),
        state: user.state.clone().or_else(|| defaults.state.clone()),
        retry: user.retry.clone().or_else(|| defaults.retry.clone()),
        circuit_breaker: user
            .circuit_breaker
            .clone()
            .or_else(|| defaults.circuit_breaker.clone()),
    }
}

/// Expands one blueprint component into its definition.
///
/// # Errors
///
/// Returns [`RecipeError::UnknownRecipe`] when neither the `recipe` field
/// nor the declared type resolves, or [`RecipeError::SlotMismatch`] when the
/// slot does not fit the primitive hook.
pub fn expand(
    component_id: &ComponentId,
    spec: &ComponentSpec,
) -> Result<ComponentDefinition, RecipeError> {
    let recipe_name: RecipeName = match &spec.recipe {
        Some(recipe) => recipe.clone(),
        None => recipe_for_type(&spec.r#type)
            .map(Into::into)
            .ok_or_else(|| RecipeError::UnknownRecipe {
                recipe: spec.r#type.clone(),
            })?,
    };
    let factory = get(&recipe_name)?;
    if !factory.method_slot.matches(factory.base_primitive) {
        return Err(RecipeError::SlotMismatch {
            recipe: recipe_name,
            slot: factory.method_slot,
            primitive: factory.base_primitive,
        });
    }

    let inputs = if spec.inputs.is_empty() {
        (factory.default_inputs)()
    } else {
        spec.inputs.clone()
    };
    let outputs = if spec.outputs.is_empty() {
        (factory.default_outputs)()
    } else {
        spec.outputs.clone()
    };
    let config = merge_config((factory.default_config)(), &spec.config);
    let capabilities = merge_tuning(&spec.capabilities, &(factory.default_tuning)());

    Ok(ComponentDefinition {
        name: component_id.clone(),
        recipe: recipe_name.clone(),
        primitive: factory.base_primitive,
        method_slot: factory.method_slot,
        inputs,
        outputs,
        require_output: factory.require_output,
        capabilities,
        config,
        body: BodyBinding {
            builtin: recipe_name,
            source: None,
        },
    })
}

/// Expands every recipe-backed component of a blueprint, in deterministic
/// (name-sorted) order. Components without a recipe reference are direct
/// definitions and are left to the caller.
///
/// # Errors
///
/// Propagates the first expansion failure.
pub fn expand_blueprint(bp: &Blueprint) -> Result<Vec<ComponentDefinition>, RecipeError> {
    let mut definitions = Vec::new();
    for (id, spec) in &bp.components {
        if spec.recipe.is_some() {
            definitions.push(expand(id, spec)?);
        }
    }
    Ok(definitions)
}

/// Builds the runnable component for an expanded definition.
///
/// # Errors
///
/// Returns [`RecipeError::SlotMismatch`] when the definition was tampered
/// with, or the factory's instantiation failure.
pub fn instantiate(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let factory = get(&def.body.builtin)?;
    if !def.method_slot.matches(def.primitive) || def.primitive != factory.base_primitive {
        return Err(RecipeError::SlotMismatch {
            recipe: def.recipe.clone(),
            slot: def.method_slot,
            primitive: def.primitive,
        });
    }
    (factory.instantiate)(def)
}

/// Fills the definition's method slot with a body produced by the prompt
/// service. The generated text is carried in the artifact for human review;
/// execution always goes through the built-in binding.
///
/// # Errors
///
/// Propagates the provider failure or timeout.
pub async fn fill_method_slot(
    def: &mut ComponentDefinition,
    service: &dyn PromptService,
    opts: &GenerateOptions,
) -> Result<(), RecipeError> {
    let prompt = format!(
        "Implement the `{}` hook for component `{}` (recipe `{}`) with configuration:\n{}",
        def.method_slot, def.name, def.recipe, def.config
    );
    let source = service.generate(&prompt, opts).await?;
    def.body.source = Some(source);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocoder_df_config::capability::StateBackend;
    use serde_json::json;

    fn spec(recipe: &str, config: Value) -> ComponentSpec {
        ComponentSpec::new("Anything")
            .with_recipe(recipe.to_owned())
            .with_config(config)
    }

    #[test]
    fn expansion_is_deterministic_and_byte_identical() {
        let id: ComponentId = "api".into();
        let s = spec("api_endpoint", json!({ "success_status": 200 }));
        let a = expand(&id, &s).expect("expands");
        let b = expand(&id, &s).expect("expands");
        assert_eq!(a, b);
        assert_eq!(a.artifact_json(), b.artifact_json());
    }

    #[test]
    fn user_config_wins_on_leaves() {
        let id: ComponentId = "v".into();
        let s = spec("validator", json!({ "required_fields": ["email"] }));
        let def = expand(&id, &s).expect("expands");
        assert_eq!(def.config["required_fields"], json!(["email"]));
        // Recipe-provided ports survive.
        assert_eq!(def.inputs[0].name, "in");
        assert_eq!(def.outputs[0].name, "out");
        assert!(!def.require_output);
    }

    #[test]
    fn nested_merge_keeps_unset_defaults() {
        let base = json!({ "a": { "x": 1, "y": 2 }, "b": true });
        let user = json!({ "a": { "y": 3 } });
        let merged = merge_config(base, &user);
        assert_eq!(merged, json!({ "a": { "x": 1, "y": 3 }, "b": true }));
    }

    #[test]
    fn store_gets_state_capability_by_default() {
        let id: ComponentId = "store".into();
        let def = expand(&id, &spec("store", Value::Null)).expect("expands");
        assert!(matches!(
            def.capabilities.state,
            Some(StateBackend::Sqlite { .. })
        ));
        assert!(def.require_output);
        assert!(def.outputs.is_empty());
    }

    #[test]
    fn user_tuning_overrides_recipe_state_default() {
        let id: ComponentId = "store".into();
        let mut s = spec("store", Value::Null);
        s.capabilities.state = Some(StateBackend::Memory);
        let def = expand(&id, &s).expect("expands");
        assert_eq!(def.capabilities.state, Some(StateBackend::Memory));
    }

    #[test]
    fn type_name_resolves_without_explicit_recipe() {
        let id: ComponentId = "f".into();
        let s = ComponentSpec::new("Filter");
        let def = expand(&id, &s).expect("expands");
        assert_eq!(def.recipe, "filter");

        let unknown = ComponentSpec::new("Bespoke");
        assert!(matches!(
            expand(&id, &unknown),
            Err(RecipeError::UnknownRecipe { .. })
        ));
    }

    #[test]
    fn tampered_definition_fails_instantiation() {
        let id: ComponentId = "q".into();
        let mut def = expand(&id, &spec("message_queue", Value::Null)).expect("expands");
        def.method_slot = MethodSlot::Split;
        assert!(matches!(
            instantiate(&def),
            Err(RecipeError::SlotMismatch { .. })
        ));
    }
}
