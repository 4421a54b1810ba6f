// SPDX-License-Identifier: Apache-2.0

//! State capability (tier 30).
//!
//! The only sanctioned way for a component to hold durable or shared state.
//! The capability itself is passive in the item phases; it carries the
//! adapter handle so its presence (and tier position) is part of the audited
//! chain, and so components without it are rejected at build time when their
//! recipe requires state.

use super::{Capability, ItemContext, tier};
use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::ComponentId;
use autocoder_df_state::StateAdapter;
use async_trait::async_trait;
use std::rc::Rc;

/// Exposes a [`StateAdapter`] to the component's business logic.
pub struct StateCapability {
    component: ComponentId,
    adapter: Rc<dyn StateAdapter>,
}

impl StateCapability {
    /// Creates the capability around an adapter instance.
    #[must_use]
    pub fn new(component: &ComponentId, adapter: Rc<dyn StateAdapter>) -> Self {
        Self {
            component: component.clone(),
            adapter,
        }
    }

    /// The owning component id, used as the state key.
    #[must_use]
    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    /// The underlying adapter.
    #[must_use]
    pub fn adapter(&self) -> Rc<dyn StateAdapter> {
        self.adapter.clone()
    }
}

#[async_trait(?Send)]
impl Capability for StateCapability {
    fn name(&self) -> &'static str {
        "state"
    }

    fn tier(&self) -> u8 {
        tier::STATE
    }

    async fn before_process(
        &mut self,
        _ctx: &ItemContext<'_>,
        _msg: &Message,
    ) -> Result<(), Error> {
        Ok(())
    }
}
