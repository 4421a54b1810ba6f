// SPDX-License-Identifier: Apache-2.0

//! Telemetry SDK for the component runtime.
//!
//! Instruments are lock-free atomics shared by handle: the hot path updates a
//! counter or gauge without synchronization beyond the atomic itself, and the
//! process-wide [`registry::MetricsRegistry`] snapshots every registered
//! metric set on demand. Summaries are kept as pre-allocated sum+count pairs;
//! no histogram buckets are maintained in v1.

pub mod instrument;
pub mod registry;
