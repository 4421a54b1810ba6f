// SPDX-License-Identifier: Apache-2.0

//! Schema validation capability (tier 10).

use super::{Capability, ItemContext, tier};
use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::ComponentId;
use autocoder_df_config::capability::SchemaValidatorConfig;
use async_trait::async_trait;

/// Validates every incoming item against the boundary schema before the hook
/// runs. A failure is fail-fast for the item: the hook never sees the
/// message. Output messages are validated again at the OUT port send.
pub struct SchemaValidator {
    component: ComponentId,
    strict: bool,
}

impl SchemaValidator {
    /// Creates the validator from its tuning.
    #[must_use]
    pub fn new(component: &ComponentId, config: &SchemaValidatorConfig) -> Self {
        Self {
            component: component.clone(),
            strict: config.strict_mode,
        }
    }
}

#[async_trait(?Send)]
impl Capability for SchemaValidator {
    fn name(&self) -> &'static str {
        "schema_validator"
    }

    fn tier(&self) -> u8 {
        tier::SCHEMA_VALIDATOR
    }

    async fn before_process(
        &mut self,
        ctx: &ItemContext<'_>,
        msg: &Message,
    ) -> Result<(), Error> {
        let Some(schema) = ctx.schema else {
            return Ok(());
        };
        schema
            .check(msg.fields(), self.strict)
            .map_err(|violation| Error::SchemaViolation {
                component: self.component.clone(),
                port: ctx.port.cloned(),
                violation,
            })
    }
}
