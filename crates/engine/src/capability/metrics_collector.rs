// SPDX-License-Identifier: Apache-2.0

//! Metrics collection capability (tier 90).
//!
//! Runs last before the hook and first after it, so the recorded latency
//! covers the hook plus any inner capabilities. Instruments are lock-free
//! atomics; collection can never fail and never aborts processing.

use super::{Capability, ItemContext, ItemOutcome, tier};
use crate::error::Error;
use crate::message::Message;
use crate::metrics::ComponentMetrics;
use async_trait::async_trait;

/// Records per-item counters and processing latency on the component's
/// metric set.
pub struct MetricsCollector {
    metrics: ComponentMetrics,
}

impl MetricsCollector {
    /// Creates the collector writing to the given metric set.
    #[must_use]
    pub fn new(metrics: ComponentMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait(?Send)]
impl Capability for MetricsCollector {
    fn name(&self) -> &'static str {
        "metrics_collector"
    }

    fn tier(&self) -> u8 {
        tier::METRICS_COLLECTOR
    }

    async fn before_process(
        &mut self,
        _ctx: &ItemContext<'_>,
        _msg: &Message,
    ) -> Result<(), Error> {
        self.metrics.messages_in_total.inc();
        Ok(())
    }

    async fn after_process(
        &mut self,
        ctx: &ItemContext<'_>,
        outcome: &ItemOutcome,
    ) -> Result<(), Error> {
        self.metrics
            .process_latency_ms
            .observe(ctx.started.elapsed().as_secs_f64() * 1e3);
        match outcome {
            ItemOutcome::Emitted(n) => self.metrics.messages_out_total.add(*n as u64),
            ItemOutcome::Dropped => self.metrics.messages_dropped_total.inc(),
            ItemOutcome::Consumed | ItemOutcome::Rejected => {}
            ItemOutcome::Failed => self.metrics.errors_total.inc(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autocoder_df_config::ComponentId;
    use serde_json::json;

    #[tokio::test]
    async fn outcome_counters_are_disjoint() {
        let component: ComponentId = "c".into();
        let metrics = ComponentMetrics::new(&component);
        let mut collector = MetricsCollector::new(metrics.clone());
        let msg = Message::from_value(json!({})).unwrap();
        let ctx = ItemContext::new(&component, None, None);

        collector.before_process(&ctx, &msg).await.unwrap();
        collector
            .after_process(&ctx, &ItemOutcome::Dropped)
            .await
            .unwrap();

        collector.before_process(&ctx, &msg).await.unwrap();
        collector
            .after_process(&ctx, &ItemOutcome::Failed)
            .await
            .unwrap();

        collector.before_process(&ctx, &msg).await.unwrap();
        collector
            .after_process(&ctx, &ItemOutcome::Emitted(2))
            .await
            .unwrap();

        assert_eq!(metrics.messages_in_total.get(), 3);
        assert_eq!(metrics.messages_dropped_total.get(), 1);
        assert_eq!(metrics.errors_total.get(), 1);
        assert_eq!(metrics.messages_out_total.get(), 2);
        assert_eq!(metrics.process_latency_ms.count(), 3);
    }
}
