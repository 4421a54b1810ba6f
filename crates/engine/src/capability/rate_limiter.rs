// SPDX-License-Identifier: Apache-2.0

//! Rate-limiting capability (tier 20).
//!
//! A token bucket per port. When tokens are exhausted the producer is
//! suspended until the bucket refills; exhaustion is backpressure, never an
//! error. The limiter is tunable but not removable; effectively-unlimited
//! throughput is a very high rate (the default).

use super::{Capability, ItemContext, tier};
use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::ComponentId;
use autocoder_df_config::capability::RateLimitConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter, one bucket per input port.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    buckets: HashMap<String, Bucket>,
}

impl RateLimiter {
    /// Creates the limiter from its tuning.
    #[must_use]
    pub fn new(_component: &ComponentId, config: &RateLimitConfig) -> Self {
        Self {
            rate: config.rate,
            burst: config.burst as f64,
            buckets: HashMap::new(),
        }
    }

    async fn acquire(&mut self, port: &str) {
        if self.rate <= 0.0 {
            return;
        }
        let now = Instant::now();
        let bucket = self.buckets.entry(port.to_owned()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
            bucket.last_refill = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return;
            }
            let wait = (1.0 - bucket.tokens) / self.rate;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[async_trait(?Send)]
impl Capability for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn tier(&self) -> u8 {
        tier::RATE_LIMITER
    }

    async fn before_process(
        &mut self,
        ctx: &ItemContext<'_>,
        _msg: &Message,
    ) -> Result<(), Error> {
        let port = ctx.port.map_or("__default__", |p| p.as_ref());
        self.acquire(port).await;
        Ok(())
    }
}
