// SPDX-License-Identifier: Apache-2.0

//! The capability kernel: a deterministic chain of cross-cutting behaviors
//! applied to every processed item.
//!
//! The kernel triple — schema validation (tier 10), rate limiting (tier 20),
//! metrics (tier 90) — is constructed unconditionally: no configuration can
//! remove it or reorder it. Extension capabilities (state 30, retry 40,
//! circuit breaker 50) are opt-in and slot between by tier.
//!
//! # Execution model
//!
//! For each item the shell drives three phases:
//!
//! 1. [`CapabilityChain::before_item`] in tier order `10 -> 90`. A failure
//!    here aborts the item before the hook runs.
//! 2. The primitive hook, re-invoked by the shell while
//!    [`CapabilityChain::should_retry`] grants backoff (the retry handler is
//!    the only re-entrant capability; re-entry depth is capped at one level
//!    of retries and every re-invocation is audit-logged).
//! 3. [`CapabilityChain::after_item`] in reverse tier order `90 -> 10`,
//!    best-effort: a failing `after_process` is logged and can never mask
//!    the item's original error.

pub mod circuit_breaker;
pub mod metrics_collector;
pub mod rate_limiter;
pub mod retry;
pub mod schema_validator;
pub mod state;

use crate::error::Error;
use crate::message::Message;
use crate::metrics::ComponentMetrics;
use autocoder_df_config::capability::CapabilityTuning;
use autocoder_df_config::schema::Schema;
use autocoder_df_config::{ComponentId, PortName};
use autocoder_df_state::StateAdapter;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

/// Capability tiers. The kernel triple occupies 10/20/90; extensions 30/40/50.
pub mod tier {
    /// Schema validation.
    pub const SCHEMA_VALIDATOR: u8 = 10;
    /// Rate limiting.
    pub const RATE_LIMITER: u8 = 20;
    /// State adapter access.
    pub const STATE: u8 = 30;
    /// Retry with backoff.
    pub const RETRY: u8 = 40;
    /// Circuit breaker.
    pub const CIRCUIT_BREAKER: u8 = 50;
    /// Metrics collection.
    pub const METRICS_COLLECTOR: u8 = 90;
}

/// Per-item context threaded through the capability phases.
pub struct ItemContext<'a> {
    /// The component processing the item.
    pub component: &'a ComponentId,
    /// The input port the item arrived on (none for source emissions).
    pub port: Option<&'a PortName>,
    /// The schema the item must satisfy, when the boundary declares one.
    pub schema: Option<&'a Schema>,
    /// When the item entered the chain.
    pub started: Instant,
    /// Hook invocation count for this item (0 on the first attempt).
    pub attempt: u32,
}

impl<'a> ItemContext<'a> {
    /// Creates a context for an item entering the chain now.
    #[must_use]
    pub fn new(
        component: &'a ComponentId,
        port: Option<&'a PortName>,
        schema: Option<&'a Schema>,
    ) -> Self {
        Self {
            component,
            port,
            schema,
            started: Instant::now(),
            attempt: 0,
        }
    }
}

/// What happened to an item after the hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The hook emitted this many messages.
    Emitted(usize),
    /// The hook intentionally dropped the item (not an error).
    Dropped,
    /// A sink consumed the item.
    Consumed,
    /// A capacity boundary rejected the item (bounded-wait expiry). Not an
    /// error: it never counts toward `errors_total`.
    Rejected,
    /// The item was aborted by an error.
    Failed,
}

/// A cross-cutting behavior applied to every processed item.
#[async_trait(?Send)]
pub trait Capability {
    /// Stable capability name (used in budgets and logs).
    fn name(&self) -> &'static str;

    /// Ordering tier. Kernel capabilities use 10/20/90; extensions 30/40/50.
    fn tier(&self) -> u8;

    /// Runs before the primitive hook, in tier order. An error aborts the
    /// item.
    async fn before_process(
        &mut self,
        ctx: &ItemContext<'_>,
        msg: &Message,
    ) -> Result<(), Error>;

    /// Runs after the hook, in reverse tier order. Best-effort: errors are
    /// logged by the chain and never mask the item's outcome.
    async fn after_process(
        &mut self,
        _ctx: &ItemContext<'_>,
        _outcome: &ItemOutcome,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// The per-component capability chain.
pub struct CapabilityChain {
    component: ComponentId,
    caps: Vec<Box<dyn Capability>>,
    retry: Option<autocoder_df_config::capability::RetryConfig>,
    state: Option<Rc<dyn StateAdapter>>,
    rng: StdRng,
}

impl CapabilityChain {
    /// Builds the chain for a component: the kernel triple always, extensions
    /// by presence in the tuning, ordered by tier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateCapabilityMissing`] when the tuning opts into
    /// state but no adapter instance was provided.
    pub fn new(
        component: &ComponentId,
        tuning: &CapabilityTuning,
        metrics: ComponentMetrics,
        state: Option<Rc<dyn StateAdapter>>,
        seed: u64,
    ) -> Result<Self, Error> {
        if tuning.state.is_some() && state.is_none() {
            return Err(Error::StateCapabilityMissing {
                component: component.clone(),
            });
        }

        let mut caps: Vec<Box<dyn Capability>> = vec![
            Box::new(schema_validator::SchemaValidator::new(
                component,
                &tuning.schema_validator,
            )),
            Box::new(rate_limiter::RateLimiter::new(component, &tuning.rate_limit)),
        ];
        if let Some(adapter) = &state {
            caps.push(Box::new(state::StateCapability::new(
                component,
                adapter.clone(),
            )));
        }
        if let Some(retry_cfg) = &tuning.retry {
            caps.push(Box::new(retry::RetryHandler::new(component, retry_cfg)));
        }
        if let Some(cb_cfg) = &tuning.circuit_breaker {
            caps.push(Box::new(circuit_breaker::CircuitBreaker::new(
                component, cb_cfg,
            )));
        }
        caps.push(Box::new(metrics_collector::MetricsCollector::new(metrics)));
        caps.sort_by_key(|c| c.tier());

        Ok(Self {
            component: component.clone(),
            caps,
            retry: tuning.retry.clone(),
            state,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// The tiers present in the chain, in execution order.
    #[must_use]
    pub fn tiers(&self) -> Vec<u8> {
        self.caps.iter().map(|c| c.tier()).collect()
    }

    /// The capability names, in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.caps.iter().map(|c| c.name()).collect()
    }

    /// The state adapter, when the state capability is attached.
    #[must_use]
    pub fn state_adapter(&self) -> Option<Rc<dyn StateAdapter>> {
        self.state.clone()
    }

    /// Phase 1: runs `before_process` in tier order. An error aborts the item.
    ///
    /// # Errors
    ///
    /// Propagates the first capability error (schema violation, open circuit).
    pub async fn before_item(
        &mut self,
        ctx: &ItemContext<'_>,
        msg: &Message,
    ) -> Result<(), Error> {
        for cap in &mut self.caps {
            cap.before_process(ctx, msg).await?;
        }
        Ok(())
    }

    /// Decides whether the hook may be re-invoked for the given error.
    ///
    /// Returns the backoff to sleep before the next attempt, or `None` when
    /// the error is not transient, retry is not enabled, or attempts are
    /// exhausted. Increments the context's attempt counter and emits the
    /// re-entrancy audit log.
    pub fn should_retry(&mut self, ctx: &mut ItemContext<'_>, error: &Error) -> Option<Duration> {
        let retry = self.retry.as_ref()?;
        if !error.is_transient() {
            return None;
        }
        // attempt counts completed invocations; the first run is attempt 0.
        if ctx.attempt + 1 >= retry.max_attempts {
            return None;
        }
        ctx.attempt += 1;
        let exp = retry
            .initial_delay_ms
            .saturating_mul(1u64 << (ctx.attempt - 1).min(16));
        let capped = exp.min(retry.max_delay_ms).max(1);
        // Full jitter, seeded so runs are reproducible.
        let delay_ms = self.rng.random_range(0..=capped);
        tracing::warn!(
            component = %self.component,
            attempt = ctx.attempt,
            max_attempts = retry.max_attempts,
            delay_ms,
            error = %error,
            "re-entrant retry of processing hook"
        );
        Some(Duration::from_millis(delay_ms))
    }

    /// Phase 3: runs `after_process` in reverse tier order. Best-effort: a
    /// failing capability is logged and cannot mask the item's outcome.
    pub async fn after_item(&mut self, ctx: &ItemContext<'_>, outcome: &ItemOutcome) {
        for cap in self.caps.iter_mut().rev() {
            if let Err(error) = cap.after_process(ctx, outcome).await {
                tracing::warn!(
                    component = %self.component,
                    capability = cap.name(),
                    %error,
                    "after_process failed (ignored)"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocoder_df_config::capability::{CircuitBreakerConfig, RetryConfig};
    use serde_json::json;

    fn chain(tuning: &CapabilityTuning) -> CapabilityChain {
        let component: ComponentId = "c".into();
        CapabilityChain::new(
            &component,
            tuning,
            ComponentMetrics::new(&component),
            None,
            42,
        )
        .expect("chain builds")
    }

    #[test]
    fn kernel_triple_always_present_in_order() {
        let c = chain(&CapabilityTuning::default());
        assert_eq!(c.tiers(), vec![10, 20, 90]);
        assert_eq!(
            c.names(),
            vec!["schema_validator", "rate_limiter", "metrics_collector"]
        );
    }

    #[test]
    fn extensions_slot_between_kernel_tiers() {
        let tuning = CapabilityTuning {
            retry: Some(RetryConfig::default()),
            circuit_breaker: Some(CircuitBreakerConfig::default()),
            ..CapabilityTuning::default()
        };
        let c = chain(&tuning);
        assert_eq!(c.tiers(), vec![10, 20, 40, 50, 90]);
    }

    #[test]
    fn state_opt_in_requires_an_adapter() {
        let tuning = CapabilityTuning {
            state: Some(autocoder_df_config::capability::StateBackend::Memory),
            ..CapabilityTuning::default()
        };
        let component: ComponentId = "c".into();
        let result = CapabilityChain::new(
            &component,
            &tuning,
            ComponentMetrics::new(&component),
            None,
            0,
        );
        assert!(matches!(result, Err(Error::StateCapabilityMissing { .. })));
    }

    #[test]
    fn retry_only_for_transient_errors_within_attempts() {
        let tuning = CapabilityTuning {
            retry: Some(RetryConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 100,
            }),
            ..CapabilityTuning::default()
        };
        let mut c = chain(&tuning);
        let component: ComponentId = "c".into();
        let mut ctx = ItemContext::new(&component, None, None);

        let transient = Error::Transient {
            component: component.clone(),
            error: "io".to_owned(),
        };
        assert!(c.should_retry(&mut ctx, &transient).is_some());
        assert_eq!(ctx.attempt, 1);
        assert!(c.should_retry(&mut ctx, &transient).is_some());
        assert_eq!(ctx.attempt, 2);
        // Attempts exhausted (max_attempts = 3 including the first run).
        assert!(c.should_retry(&mut ctx, &transient).is_none());

        let mut ctx = ItemContext::new(&component, None, None);
        let contract = Error::DropForbidden {
            component: component.clone(),
        };
        assert!(c.should_retry(&mut ctx, &contract).is_none());
    }

    #[test]
    fn no_retry_without_opt_in() {
        let mut c = chain(&CapabilityTuning::default());
        let component: ComponentId = "c".into();
        let mut ctx = ItemContext::new(&component, None, None);
        let transient = Error::Transient {
            component: component.clone(),
            error: "io".to_owned(),
        };
        assert!(c.should_retry(&mut ctx, &transient).is_none());
    }

    #[test]
    fn retry_backoff_is_deterministic_for_a_seed() {
        let tuning = CapabilityTuning {
            retry: Some(RetryConfig::default()),
            ..CapabilityTuning::default()
        };
        let component: ComponentId = "c".into();
        let transient = Error::Transient {
            component: component.clone(),
            error: "io".to_owned(),
        };

        let delays = |seed: u64| {
            let mut c = CapabilityChain::new(
                &component,
                &tuning,
                ComponentMetrics::new(&component),
                None,
                seed,
            )
            .expect("chain builds");
            let mut ctx = ItemContext::new(&component, None, None);
            let mut out = Vec::new();
            while let Some(d) = c.should_retry(&mut ctx, &transient) {
                out.push(d);
            }
            out
        };
        assert_eq!(delays(7), delays(7));
    }

    #[tokio::test]
    async fn before_item_validates_against_schema() {
        use autocoder_df_config::schema::{FieldSpec, FieldType};

        let mut c = chain(&CapabilityTuning::default());
        let component: ComponentId = "c".into();
        let schema = Schema::record("evt", [("id", FieldSpec::required(FieldType::Integer))]);
        let ctx = ItemContext::new(&component, None, Some(&schema));

        let ok = Message::from_value(json!({"id": 3})).unwrap();
        assert!(c.before_item(&ctx, &ok).await.is_ok());

        let bad = Message::from_value(json!({"wrong": true})).unwrap();
        assert!(matches!(
            c.before_item(&ctx, &bad).await,
            Err(Error::SchemaViolation { .. })
        ));
    }
}
