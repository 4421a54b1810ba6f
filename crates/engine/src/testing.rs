// SPDX-License-Identifier: Apache-2.0

//! Test utilities for exercising components and pipelines.
//!
//! Everything here is deterministic: sources derive their payloads from an
//! explicit seed, and the helpers run on a current-thread runtime inside a
//! `LocalSet`, mirroring the production scheduling model.

use crate::component::SourceContext;
use crate::error::Error;
use crate::message::Message;
use crate::primitive::{Sink, Source, Transformer};
use async_trait::async_trait;
use serde_json::json;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

/// Runs a future to completion on a fresh current-thread runtime inside a
/// `LocalSet`, panicking on task failure.
pub fn run_local<F>(fut: F)
where
    F: Future<Output = ()> + 'static,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime builds");
    let local = tokio::task::LocalSet::new();
    let handle = local.spawn_local(fut);
    rt.block_on(local);
    rt.block_on(handle).expect("test task failed");
}

/// A finite source emitting `{seq, value}` records derived from a seed.
/// Identical seeds produce identical output sequences.
pub struct SeededSource {
    count: u64,
    seed: u64,
}

impl SeededSource {
    /// Creates a source that emits `count` messages derived from `seed`.
    #[must_use]
    pub fn new(count: u64, seed: u64) -> Self {
        Self { count, seed }
    }
}

#[async_trait(?Send)]
impl Source for SeededSource {
    async fn produce(&mut self, ctx: &mut SourceContext<'_>) -> Result<(), Error> {
        let mut state = self.seed;
        for seq in 0..self.count {
            // xorshift64: cheap, deterministic, seed-derived.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let msg = Message::from_value(json!({
                "seq": seq,
                "value": state % 1_000,
            }))
            .ok_or_else(|| Error::InternalError {
                message: "literal is an object".to_owned(),
            })?;
            ctx.emit(msg).await?;
        }
        Ok(())
    }
}

/// A sink that collects every consumed message into a shared vector.
pub struct CollectingSink {
    collected: Rc<RefCell<Vec<Message>>>,
}

impl CollectingSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collected: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A handle to the collected messages, usable after the sink is moved
    /// into the pipeline.
    #[must_use]
    pub fn handle(&self) -> Rc<RefCell<Vec<Message>>> {
        self.collected.clone()
    }
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Sink for CollectingSink {
    async fn consume(&mut self, msg: Message) -> Result<(), Error> {
        self.collected.borrow_mut().push(msg);
        Ok(())
    }
}

/// A transformer wrapping a plain closure.
pub struct FnTransformer {
    #[allow(clippy::type_complexity)]
    f: Box<dyn FnMut(Message) -> Result<Option<Message>, Error>>,
}

impl FnTransformer {
    /// Wraps a closure as a transformer.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(Message) -> Result<Option<Message>, Error> + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait(?Send)]
impl Transformer for FnTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        (self.f)(msg)
    }
}

/// A transformer that fails transiently a fixed number of times before
/// passing messages through. For retry and circuit-breaker tests.
pub struct FlakyTransformer {
    remaining_failures: u32,
    attempts: Rc<RefCell<u32>>,
}

impl FlakyTransformer {
    /// Creates a transformer that fails the first `failures` hook calls.
    #[must_use]
    pub fn new(failures: u32) -> Self {
        Self {
            remaining_failures: failures,
            attempts: Rc::new(RefCell::new(0)),
        }
    }

    /// A handle to the total number of hook invocations.
    #[must_use]
    pub fn attempts(&self) -> Rc<RefCell<u32>> {
        self.attempts.clone()
    }
}

#[async_trait(?Send)]
impl Transformer for FlakyTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        *self.attempts.borrow_mut() += 1;
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Err(Error::Transient {
                component: "flaky".into(),
                error: "injected failure".to_owned(),
            });
        }
        Ok(Some(msg))
    }
}
