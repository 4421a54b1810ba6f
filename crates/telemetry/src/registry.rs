// SPDX-License-Identifier: Apache-2.0

//! Process-wide metrics registry.
//!
//! Metric sets are structs of instruments registered once (at wiring time)
//! and sampled on demand. The registry owns no instrument state: every set
//! keeps handles to its own atomics, so sampling never contends with the hot
//! path.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

/// Static description of one metric within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    /// Metric name within the set, e.g. `messages_in_total`.
    pub name: &'static str,
    /// Unit annotation, e.g. `{message}` or `{ms}`.
    pub unit: &'static str,
}

/// A sampled metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    /// Monotonic counter value.
    Counter(u64),
    /// Latest gauge observation.
    Gauge(f64),
    /// Sum and count of a summary.
    Summary {
        /// Sum of all observations.
        sum: f64,
        /// Number of observations.
        count: u64,
    },
}

/// A named set of related metrics that can be sampled together.
pub trait MetricSet: Send + Sync {
    /// Instance name scoping the set, e.g. `component/api_source/port/out`.
    fn set_name(&self) -> &str;

    /// Descriptors, position-aligned with [`MetricSet::snapshot`].
    fn descriptors(&self) -> &'static [MetricDescriptor];

    /// Samples every metric in the set.
    fn snapshot(&self) -> Vec<MetricValue>;
}

/// One sampled metric in a registry report.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    /// The owning set's instance name.
    pub set: String,
    /// The metric descriptor.
    pub descriptor: MetricDescriptor,
    /// The sampled value.
    pub value: MetricValue,
}

/// Process-wide registry of metric sets.
///
/// Cloning the registry clones a handle; all clones observe the same sets.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    sets: Arc<Mutex<Vec<Box<dyn MetricSet>>>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a metric set. Sets are never unregistered; component
    /// lifetimes end with the process.
    pub fn register<S: MetricSet + 'static>(&self, set: S) {
        self.sets.lock().push(Box::new(set));
    }

    /// Number of registered sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.lock().len()
    }

    /// Returns `true` if no sets are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.lock().is_empty()
    }

    /// Samples every registered set.
    #[must_use]
    pub fn collect(&self) -> Vec<Sample> {
        let sets = self.sets.lock();
        let mut samples = Vec::new();
        for set in sets.iter() {
            let descriptors = set.descriptors();
            for (descriptor, value) in descriptors.iter().zip(set.snapshot()) {
                samples.push(Sample {
                    set: set.set_name().to_owned(),
                    descriptor: *descriptor,
                    value,
                });
            }
        }
        samples
    }

    /// Finds the current value of a counter by set and metric name.
    ///
    /// Intended for tests and assertions; returns zero when absent.
    #[must_use]
    pub fn counter_value(&self, set_name: &str, metric: &str) -> u64 {
        self.collect()
            .into_iter()
            .filter(|s| s.set == set_name && s.descriptor.name == metric)
            .find_map(|s| match s.value {
                MetricValue::Counter(v) => Some(v),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Renders a plain-text report of every metric, one line per sample.
    ///
    /// This is the v1 export surface; wire-format exporters are external
    /// collaborators consuming [`MetricsRegistry::collect`].
    #[must_use]
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        for sample in self.collect() {
            match sample.value {
                MetricValue::Counter(v) => {
                    let _ = writeln!(
                        out,
                        "{}.{} {} {}",
                        sample.set, sample.descriptor.name, v, sample.descriptor.unit
                    );
                }
                MetricValue::Gauge(v) => {
                    let _ = writeln!(
                        out,
                        "{}.{} {} {}",
                        sample.set, sample.descriptor.name, v, sample.descriptor.unit
                    );
                }
                MetricValue::Summary { sum, count } => {
                    let _ = writeln!(
                        out,
                        "{}.{} sum={} count={} {}",
                        sample.set, sample.descriptor.name, sum, count, sample.descriptor.unit
                    );
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Counter, Summary};

    struct TestSet {
        name: String,
        hits: Counter,
        latency: Summary,
    }

    const TEST_DESCRIPTORS: &[MetricDescriptor] = &[
        MetricDescriptor {
            name: "hits_total",
            unit: "{hit}",
        },
        MetricDescriptor {
            name: "latency_ms",
            unit: "{ms}",
        },
    ];

    impl MetricSet for TestSet {
        fn set_name(&self) -> &str {
            &self.name
        }

        fn descriptors(&self) -> &'static [MetricDescriptor] {
            TEST_DESCRIPTORS
        }

        fn snapshot(&self) -> Vec<MetricValue> {
            vec![
                MetricValue::Counter(self.hits.get()),
                MetricValue::Summary {
                    sum: self.latency.sum(),
                    count: self.latency.count(),
                },
            ]
        }
    }

    #[test]
    fn registry_collects_registered_sets() {
        let registry = MetricsRegistry::new();
        let hits = Counter::new();
        let latency = Summary::new();
        registry.register(TestSet {
            name: "component/test".to_owned(),
            hits: hits.clone(),
            latency: latency.clone(),
        });

        hits.add(3);
        latency.observe(1.5);

        assert_eq!(registry.counter_value("component/test", "hits_total"), 3);
        let samples = registry.collect();
        assert_eq!(samples.len(), 2);

        let text = registry.export_text();
        assert!(text.contains("component/test.hits_total 3"));
        assert!(text.contains("sum=1.5 count=1"));
    }

    #[test]
    fn missing_counter_reads_zero() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.counter_value("nope", "nothing"), 0);
    }
}
