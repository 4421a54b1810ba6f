// SPDX-License-Identifier: Apache-2.0

//! Metric sets for ports, components, and the topology healer.
//!
//! Sets are cheaply clonable instrument bundles; one clone lives in the hot
//! path, another is registered with the process-wide registry.

use autocoder_df_config::{ComponentId, PortName};
use autocoder_df_telemetry::instrument::{Counter, Gauge, GaugeF64, Summary};
use autocoder_df_telemetry::registry::{MetricDescriptor, MetricSet, MetricValue};

/// Per-port metrics.
#[derive(Debug, Clone)]
pub struct PortMetrics {
    scope: String,
    /// Count of messages dequeued on this port.
    pub messages_in_total: Counter,
    /// Count of messages enqueued on this port.
    pub messages_out_total: Counter,
    /// Count of messages discarded by the overflow drop policies.
    pub messages_dropped_total: Counter,
    /// Count of item errors observed at this port.
    pub errors_total: Counter,
    /// Current channel depth.
    pub queue_depth: Gauge,
    /// Channel depth over capacity, in `[0, 1]`.
    pub buffer_utilization: GaugeF64,
    /// Cumulative time the producer spent suspended on this port.
    pub blocked_duration_ms: GaugeF64,
    /// Message age at dequeue, for messages carrying an `event_time`.
    pub message_age_ms: Summary,
}

const PORT_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "messages_in_total",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "messages_out_total",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "messages_dropped_total",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "errors_total",
        unit: "{error}",
    },
    MetricDescriptor {
        name: "queue_depth",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "buffer_utilization",
        unit: "{1}",
    },
    MetricDescriptor {
        name: "blocked_duration_ms",
        unit: "{ms}",
    },
    MetricDescriptor {
        name: "message_age_ms",
        unit: "{ms}",
    },
];

impl PortMetrics {
    /// Creates the metric set for one port.
    #[must_use]
    pub fn new(component: &ComponentId, port: &PortName) -> Self {
        Self {
            scope: format!("component/{component}/port/{port}"),
            messages_in_total: Counter::new(),
            messages_out_total: Counter::new(),
            messages_dropped_total: Counter::new(),
            errors_total: Counter::new(),
            queue_depth: Gauge::new(),
            buffer_utilization: GaugeF64::new(),
            blocked_duration_ms: GaugeF64::new(),
            message_age_ms: Summary::new(),
        }
    }

    /// Adds to the cumulative blocked duration.
    pub fn add_blocked_ms(&self, ms: f64) {
        self.blocked_duration_ms.set(self.blocked_duration_ms.get() + ms);
    }

    /// Records the observed channel depth.
    pub fn observe_depth(&self, depth: usize, capacity: usize) {
        self.queue_depth.set(depth as u64);
        if capacity > 0 {
            self.buffer_utilization.set(depth as f64 / capacity as f64);
        }
    }
}

impl MetricSet for PortMetrics {
    fn set_name(&self) -> &str {
        &self.scope
    }

    fn descriptors(&self) -> &'static [MetricDescriptor] {
        PORT_DESCRIPTORS
    }

    fn snapshot(&self) -> Vec<MetricValue> {
        vec![
            MetricValue::Counter(self.messages_in_total.get()),
            MetricValue::Counter(self.messages_out_total.get()),
            MetricValue::Counter(self.messages_dropped_total.get()),
            MetricValue::Counter(self.errors_total.get()),
            MetricValue::Gauge(self.queue_depth.get() as f64),
            MetricValue::Gauge(self.buffer_utilization.get()),
            MetricValue::Gauge(self.blocked_duration_ms.get()),
            MetricValue::Summary {
                sum: self.message_age_ms.sum(),
                count: self.message_age_ms.count(),
            },
        ]
    }
}

/// Per-component metrics, updated by the metrics-collector capability.
#[derive(Debug, Clone)]
pub struct ComponentMetrics {
    scope: String,
    /// Count of items entering the processing chain.
    pub messages_in_total: Counter,
    /// Count of messages emitted by the business-logic hook.
    pub messages_out_total: Counter,
    /// Count of intentional drops (distinct from errors).
    pub messages_dropped_total: Counter,
    /// Count of items aborted by an error.
    pub errors_total: Counter,
    /// Count of ingress rejections returned as 503.
    pub ingress_503_total: Counter,
    /// Per-item processing latency through the capability chain.
    pub process_latency_ms: Summary,
}

const COMPONENT_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "messages_in_total",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "messages_out_total",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "messages_dropped_total",
        unit: "{message}",
    },
    MetricDescriptor {
        name: "errors_total",
        unit: "{error}",
    },
    MetricDescriptor {
        name: "ingress_503_total",
        unit: "{request}",
    },
    MetricDescriptor {
        name: "process_latency_ms",
        unit: "{ms}",
    },
];

impl ComponentMetrics {
    /// Creates the metric set for one component.
    #[must_use]
    pub fn new(component: &ComponentId) -> Self {
        Self {
            scope: format!("component/{component}"),
            messages_in_total: Counter::new(),
            messages_out_total: Counter::new(),
            messages_dropped_total: Counter::new(),
            errors_total: Counter::new(),
            ingress_503_total: Counter::new(),
            process_latency_ms: Summary::new(),
        }
    }
}

impl MetricSet for ComponentMetrics {
    fn set_name(&self) -> &str {
        &self.scope
    }

    fn descriptors(&self) -> &'static [MetricDescriptor] {
        COMPONENT_DESCRIPTORS
    }

    fn snapshot(&self) -> Vec<MetricValue> {
        vec![
            MetricValue::Counter(self.messages_in_total.get()),
            MetricValue::Counter(self.messages_out_total.get()),
            MetricValue::Counter(self.messages_dropped_total.get()),
            MetricValue::Counter(self.errors_total.get()),
            MetricValue::Counter(self.ingress_503_total.get()),
            MetricValue::Summary {
                sum: self.process_latency_ms.sum(),
                count: self.process_latency_ms.count(),
            },
        ]
    }
}

/// Build-time topology metrics exported once per validator/healer run.
#[derive(Debug, Clone)]
pub struct TopologyMetrics {
    scope: String,
    /// Components whose effective role differs from their declared-type prior.
    pub role_flips_total: Counter,
    /// Bindings added by reconciliation.
    pub reconciliation_edges_added_total: Counter,
    /// Sources repaired by reconciliation.
    pub reconciliation_sources_fixed_total: Counter,
    /// Fraction of validator runs that passed, in `[0, 1]`.
    pub validation_pass_rate: GaugeF64,
}

const TOPOLOGY_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "role_flips_total",
        unit: "{component}",
    },
    MetricDescriptor {
        name: "reconciliation_edges_added_total",
        unit: "{binding}",
    },
    MetricDescriptor {
        name: "reconciliation_sources_fixed_total",
        unit: "{component}",
    },
    MetricDescriptor {
        name: "validation_pass_rate",
        unit: "{1}",
    },
];

impl TopologyMetrics {
    /// Creates the topology metric set for one system.
    #[must_use]
    pub fn new(system: &str) -> Self {
        Self {
            scope: format!("system/{system}/topology"),
            role_flips_total: Counter::new(),
            reconciliation_edges_added_total: Counter::new(),
            reconciliation_sources_fixed_total: Counter::new(),
            validation_pass_rate: GaugeF64::new(),
        }
    }
}

impl MetricSet for TopologyMetrics {
    fn set_name(&self) -> &str {
        &self.scope
    }

    fn descriptors(&self) -> &'static [MetricDescriptor] {
        TOPOLOGY_DESCRIPTORS
    }

    fn snapshot(&self) -> Vec<MetricValue> {
        vec![
            MetricValue::Counter(self.role_flips_total.get()),
            MetricValue::Counter(self.reconciliation_edges_added_total.get()),
            MetricValue::Counter(self.reconciliation_sources_fixed_total.get()),
            MetricValue::Gauge(self.validation_pass_rate.get()),
        ]
    }
}
