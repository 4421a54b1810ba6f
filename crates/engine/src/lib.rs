// SPDX-License-Identifier: Apache-2.0

//! Async component runtime.
//!
//! A port-based dataflow engine built from five primitives (source, sink,
//! transformer, splitter, merger), composed with a deterministic capability
//! kernel (schema validation, rate limiting, metrics) and executed by a
//! cooperative supervisor enforcing fail-fast boundaries, bounded
//! backpressure, and observable message flow.
//!
//! The runtime is single-threaded by design: components are `!Send`, channels
//! are `Rc`-based, and everything runs in one `LocalSet` task group. Tasks
//! suspend only at explicit points (channel send/receive, timers, external
//! I/O), and cancellation is delivered at the next suspension point.

pub mod capability;
pub mod component;
pub mod control;
pub mod envelope;
pub mod error;
pub mod harness;
pub mod ingress;
pub mod message;
pub mod metrics;
pub mod port;
pub mod primitive;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
