// SPDX-License-Identifier: Apache-2.0

//! Built-in business-logic bodies for the recipe registry.
//!
//! Each module implements the hook for one primitive family and exposes the
//! `instantiate_*` constructors referenced by the registry's factory slice.

pub mod merges;
pub mod sinks;
pub mod sources;
pub mod splits;
pub mod transforms;

use crate::{ComponentDefinition, RecipeError};
use autocoder_df_config::capability::StateBackend;
use autocoder_df_engine::component::Component;
use autocoder_df_engine::primitive::Primitive;
use autocoder_df_state::StateAdapter;
use autocoder_df_state::memory::MemoryStateAdapter;
use autocoder_df_state::sqlite::SqliteStateAdapter;
use serde::de::DeserializeOwned;
use std::rc::Rc;

/// Parses the merged recipe configuration into a typed struct. Extra keys
/// are tolerated: strictness for user-facing input lives at the blueprint
/// layer, and merged configs legitimately carry keys for other concerns.
pub(crate) fn parse_config<T: DeserializeOwned>(
    def: &ComponentDefinition,
) -> Result<T, RecipeError> {
    serde_json::from_value(def.config.clone()).map_err(|e| RecipeError::InvalidConfig {
        recipe: def.recipe.clone(),
        error: e.to_string(),
    })
}

/// Constructs the state adapter selected by the definition's tuning.
pub(crate) fn build_state(
    def: &ComponentDefinition,
) -> Result<Option<Rc<dyn StateAdapter>>, RecipeError> {
    let Some(backend) = &def.capabilities.state else {
        return Ok(None);
    };
    let adapter: Rc<dyn StateAdapter> = match backend {
        StateBackend::Memory => Rc::new(MemoryStateAdapter::new()),
        StateBackend::Sqlite { path } => Rc::new(SqliteStateAdapter::open(path)?),
        #[cfg(feature = "redis")]
        StateBackend::Redis { url } => {
            Rc::new(autocoder_df_state::redis::LazyRedisStateAdapter::new(url))
        }
        #[cfg(not(feature = "redis"))]
        StateBackend::Redis { .. } => {
            return Err(RecipeError::InvalidConfig {
                recipe: def.recipe.clone(),
                error: "redis state backend requires the `redis` feature".to_owned(),
            });
        }
    };
    Ok(Some(adapter))
}

/// Builds the component shell shared by every recipe: ports, tuning,
/// require-output policy, and the state adapter when one is configured.
pub(crate) fn base_component(
    def: &ComponentDefinition,
    primitive: Primitive,
    state: Option<Rc<dyn StateAdapter>>,
) -> Component {
    let mut component = Component::new(def.name.clone(), primitive)
        .with_tuning(def.capabilities.clone())
        .with_require_output(def.require_output);
    for spec in &def.inputs {
        component = component.with_input(spec.clone());
    }
    for spec in &def.outputs {
        component = component.with_output(spec.clone());
    }
    if let Some(adapter) = state {
        component = component.with_state(adapter);
    }
    component
}
