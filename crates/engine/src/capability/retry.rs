// SPDX-License-Identifier: Apache-2.0

//! Retry capability (tier 40).
//!
//! The only capability allowed to re-enter the processing chain. The actual
//! re-invocation loop lives in [`super::CapabilityChain::should_retry`]: the
//! chain consults the retry tuning, grants exponentially backed-off,
//! jittered delays for transient errors, and audit-logs every re-entry.
//! Re-entry depth is capped at one level of retries; deeper re-entry is a
//! programmer error.

use super::{Capability, ItemContext, tier};
use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::ComponentId;
use autocoder_df_config::capability::RetryConfig;
use async_trait::async_trait;

/// Marker capability anchoring the retry tier in the chain.
pub struct RetryHandler {
    _component: ComponentId,
    _config: RetryConfig,
}

impl RetryHandler {
    /// Creates the handler from its tuning.
    #[must_use]
    pub fn new(component: &ComponentId, config: &RetryConfig) -> Self {
        Self {
            _component: component.clone(),
            _config: config.clone(),
        }
    }
}

#[async_trait(?Send)]
impl Capability for RetryHandler {
    fn name(&self) -> &'static str {
        "retry_handler"
    }

    fn tier(&self) -> u8 {
        tier::RETRY
    }

    async fn before_process(
        &mut self,
        _ctx: &ItemContext<'_>,
        _msg: &Message,
    ) -> Result<(), Error> {
        Ok(())
    }
}
