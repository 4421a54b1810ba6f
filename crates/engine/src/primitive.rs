// SPDX-License-Identifier: Apache-2.0

//! The five primitives every component is built from.
//!
//! Each primitive exposes a single pure hook; the component shell owns the
//! loop, the capability chain, and the ports. Implementations are `!Send` by
//! design: the runtime is a single-threaded cooperative task group.
//!
//! | Primitive   | Arity     | Hook                                   |
//! |-------------|-----------|----------------------------------------|
//! | Source      | 0 -> N    | `produce` (runs until shutdown)        |
//! | Sink        | N -> 0    | `consume` (one item at a time)         |
//! | Transformer | 1 -> 0..1 | `transform` (`None` = drop)            |
//! | Splitter    | 1 -> N    | `split` (map keyed by OUT port)        |
//! | Merger      | N -> 1    | `merge_step` (called in arrival order) |

use crate::component::SourceContext;
use crate::error::Error;
use crate::message::Message;
use autocoder_df_config::{PortName, PrimitiveKind};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A producer of messages (`0 -> N`).
#[async_trait(?Send)]
pub trait Source {
    /// Opens external resources. Called once before `produce`.
    async fn setup(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Produces messages through [`SourceContext::emit`] until the input is
    /// exhausted or the task is cancelled at a suspension point. Backpressure
    /// is delivered by the OUT port send inside `emit`.
    async fn produce(&mut self, ctx: &mut SourceContext<'_>) -> Result<(), Error>;

    /// Releases resources. Called once after `produce` returns or is
    /// cancelled.
    async fn cleanup(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A consumer of messages (`N -> 0`). A sink acknowledges processing by
/// returning from `consume` before the next receive.
#[async_trait(?Send)]
pub trait Sink {
    /// Opens external resources.
    async fn setup(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Consumes one message.
    async fn consume(&mut self, msg: Message) -> Result<(), Error>;

    /// Releases resources.
    async fn cleanup(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A pointwise function with optional drop (`1 -> 0..1`).
#[async_trait(?Send)]
pub trait Transformer {
    /// Opens external resources.
    async fn setup(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Transforms one message. Returning `None` drops the message; the shell
    /// rejects the drop with [`Error::DropForbidden`] when the component is
    /// configured with `require_output = true`.
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error>;

    /// Called on each `TimerTick` for batching/windowed transformers; emitted
    /// messages go straight to the OUT port.
    async fn on_timer(&mut self) -> Result<Vec<Message>, Error> {
        Ok(Vec::new())
    }

    /// Releases resources.
    async fn cleanup(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A structural router (`1 -> N`).
#[async_trait(?Send)]
pub trait Splitter {
    /// Opens external resources.
    async fn setup(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Routes one message to a subset of the declared OUT ports. Missing
    /// keys mean no emission on that port for this message; emitting to an
    /// undeclared port fails the item.
    async fn split(&mut self, msg: Message) -> Result<BTreeMap<PortName, Message>, Error>;

    /// Releases resources.
    async fn cleanup(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A structural interleaver (`N -> 1`).
#[async_trait(?Send)]
pub trait Merger {
    /// Opens external resources.
    async fn setup(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Handles one message arriving on the named input port, in arrival
    /// order. May emit zero or more messages on the single OUT port.
    /// Per-port FIFO is preserved; no ordering is promised across ports.
    async fn merge_step(
        &mut self,
        port: &PortName,
        msg: Message,
    ) -> Result<Vec<Message>, Error>;

    /// Called on each `TimerTick` for windowed mergers; emitted messages go
    /// straight to the OUT port.
    async fn on_timer(&mut self) -> Result<Vec<Message>, Error> {
        Ok(Vec::new())
    }

    /// Releases resources.
    async fn cleanup(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A component's business logic, one of the five primitives.
pub enum Primitive {
    /// `0 -> N` producer.
    Source(Box<dyn Source>),
    /// `N -> 0` consumer.
    Sink(Box<dyn Sink>),
    /// `1 -> 0..1` pointwise function.
    Transformer(Box<dyn Transformer>),
    /// `1 -> N` router.
    Splitter(Box<dyn Splitter>),
    /// `N -> 1` interleaver.
    Merger(Box<dyn Merger>),
}

impl Primitive {
    /// The primitive kind.
    #[must_use]
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Source(_) => PrimitiveKind::Source,
            Primitive::Sink(_) => PrimitiveKind::Sink,
            Primitive::Transformer(_) => PrimitiveKind::Transformer,
            Primitive::Splitter(_) => PrimitiveKind::Splitter,
            Primitive::Merger(_) => PrimitiveKind::Merger,
        }
    }
}

/// Checks the port arity invariants for a primitive kind.
///
/// # Errors
///
/// Returns [`Error::ComponentError`] (configuration kind) when the declared
/// port counts do not fit the primitive.
pub fn validate_arity(
    component: &autocoder_df_config::ComponentId,
    kind: PrimitiveKind,
    inputs: usize,
    outputs: usize,
) -> Result<(), Error> {
    let ok = match kind {
        PrimitiveKind::Source => inputs == 0 && outputs >= 1,
        PrimitiveKind::Sink => inputs >= 1 && outputs == 0,
        PrimitiveKind::Transformer => inputs == 1 && outputs <= 1,
        PrimitiveKind::Splitter => inputs == 1 && outputs >= 2,
        PrimitiveKind::Merger => inputs >= 2 && outputs == 1,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::ComponentError {
            component: component.clone(),
            kind: crate::error::ComponentErrorKind::Configuration,
            error: format!(
                "primitive {kind} cannot have {inputs} input port(s) and {outputs} output port(s)"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_invariants() {
        let id: autocoder_df_config::ComponentId = "c".into();
        assert!(validate_arity(&id, PrimitiveKind::Source, 0, 1).is_ok());
        assert!(validate_arity(&id, PrimitiveKind::Source, 1, 1).is_err());
        assert!(validate_arity(&id, PrimitiveKind::Sink, 2, 0).is_ok());
        assert!(validate_arity(&id, PrimitiveKind::Sink, 1, 1).is_err());
        assert!(validate_arity(&id, PrimitiveKind::Transformer, 1, 0).is_ok());
        assert!(validate_arity(&id, PrimitiveKind::Transformer, 1, 1).is_ok());
        assert!(validate_arity(&id, PrimitiveKind::Transformer, 2, 1).is_err());
        assert!(validate_arity(&id, PrimitiveKind::Splitter, 1, 2).is_ok());
        assert!(validate_arity(&id, PrimitiveKind::Splitter, 1, 1).is_err());
        assert!(validate_arity(&id, PrimitiveKind::Merger, 2, 1).is_ok());
        assert!(validate_arity(&id, PrimitiveKind::Merger, 1, 1).is_err());
    }
}
