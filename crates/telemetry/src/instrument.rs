// SPDX-License-Identifier: Apache-2.0

//! Metric instruments.
//!
//! All instruments are cheaply clonable handles over shared atomics, so the
//! same instrument can live in a component's hot path and in the registry
//! snapshot at once. `f64` values are stored as raw bits in an `AtomicU64`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter by one.
    #[inline]
    pub fn inc(&self) {
        let _ = self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n` to the counter.
    #[inline]
    pub fn add(&self, n: u64) {
        let _ = self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge holding the latest `u64` observation.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    /// Creates a gauge starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation.
    #[inline]
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Latest observation.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge holding the latest `f64` observation (stored as raw bits).
#[derive(Debug, Clone)]
pub struct GaugeF64 {
    bits: Arc<AtomicU64>,
}

impl Default for GaugeF64 {
    fn default() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }
}

impl GaugeF64 {
    /// Creates a gauge starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation.
    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Latest observation.
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// A sum+count summary used for latency and message-age observations.
///
/// The sum is an `f64` accumulated with a compare-exchange loop; the count is
/// a plain counter. Buckets are intentionally absent in v1.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    sum_bits: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Summary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation.
    pub fn observe(&self, value: f64) {
        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let _ = self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Sum of all observations.
    #[must_use]
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    /// Number of observations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean observation, or zero when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new();
        let clone = c.clone();
        c.inc();
        clone.add(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn gauges_hold_latest() {
        let g = Gauge::new();
        g.set(7);
        g.set(3);
        assert_eq!(g.get(), 3);

        let f = GaugeF64::new();
        f.set(0.25);
        assert!((f.get() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_tracks_sum_and_count() {
        let s = Summary::new();
        s.observe(1.5);
        s.observe(2.5);
        assert_eq!(s.count(), 2);
        assert!((s.sum() - 4.0).abs() < f64::EPSILON);
        assert!((s.mean() - 2.0).abs() < f64::EPSILON);
    }
}
