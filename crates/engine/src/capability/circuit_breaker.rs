// SPDX-License-Identifier: Apache-2.0

//! Circuit-breaker capability (tier 50).
//!
//! Closed / open / half-open. The breaker counts item *failures*, never
//! intentional drops. When consecutive failures reach the threshold the
//! circuit opens and items fail fast until the recovery timeout elapses;
//! the first item after that probes the path (half-open) and either closes
//! the circuit or re-opens it.

use super::{Capability, ItemContext, ItemOutcome, tier};
use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::ComponentId;
use autocoder_df_config::capability::CircuitBreakerConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Opens the processing path after repeated failures.
pub struct CircuitBreaker {
    component: ComponentId,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Creates the breaker from its tuning.
    #[must_use]
    pub fn new(component: &ComponentId, config: &CircuitBreakerConfig) -> Self {
        Self {
            component: component.clone(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(config.recovery_timeout_ms),
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    /// Returns `true` while the circuit rejects items.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

#[async_trait(?Send)]
impl Capability for CircuitBreaker {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn tier(&self) -> u8 {
        tier::CIRCUIT_BREAKER
    }

    async fn before_process(
        &mut self,
        _ctx: &ItemContext<'_>,
        _msg: &Message,
    ) -> Result<(), Error> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    self.state = BreakerState::HalfOpen;
                    tracing::info!(component = %self.component, "circuit half-open, probing");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        component: self.component.clone(),
                    })
                }
            }
        }
    }

    async fn after_process(
        &mut self,
        _ctx: &ItemContext<'_>,
        outcome: &ItemOutcome,
    ) -> Result<(), Error> {
        match outcome {
            ItemOutcome::Failed => {
                if self.state == BreakerState::Open {
                    // Rejections while open are not new evidence.
                    return Ok(());
                }
                self.consecutive_failures += 1;
                if self.state == BreakerState::HalfOpen
                    || self.consecutive_failures >= self.failure_threshold
                {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                    self.consecutive_failures = 0;
                    tracing::warn!(component = %self.component, "circuit opened");
                }
            }
            ItemOutcome::Emitted(_) | ItemOutcome::Consumed => {
                if self.state == BreakerState::HalfOpen {
                    tracing::info!(component = %self.component, "circuit closed");
                }
                self.state = BreakerState::Closed;
                self.consecutive_failures = 0;
            }
            // Intentional drops and capacity rejections are not failures.
            ItemOutcome::Dropped | ItemOutcome::Rejected => {}
        }
        Ok(())
    }
}
