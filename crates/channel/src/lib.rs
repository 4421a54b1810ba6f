// SPDX-License-Identifier: Apache-2.0

//! Channel implementations optimized for single-threaded async runtime.
//!
//! Every channel is a bounded FIFO connecting exactly one producing port to one
//! consuming port. What happens when the buffer is full is decided by an
//! [`OverflowPolicy`] chosen at creation time: suspend the producer, suspend it
//! for a bounded time, or deterministically drop the head or the incoming
//! element. Dropped elements are counted on the channel and are reported
//! separately from errors by the layers above.

use std::time::Duration;

pub mod error;
pub mod mpsc;

/// Policy applied when a message is offered to a channel whose buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the producer until capacity is available (backpressure).
    Block,
    /// Suspend the producer, but give up after the given duration.
    BlockWithTimeout(Duration),
    /// Remove the element at the head of the buffer, then enqueue.
    DropOldest,
    /// Discard the incoming element, leaving the buffer untouched.
    DropNewest,
}

/// Outcome of a successful offer to a channel.
///
/// An offer that drops an element (under [`OverflowPolicy::DropOldest`] or
/// [`OverflowPolicy::DropNewest`]) is still a success at the channel level; the
/// caller is told which element was sacrificed so it can account for the drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was enqueued without displacing anything.
    Enqueued,
    /// The head of the buffer was discarded to make room for the message.
    DroppedOldest,
    /// The incoming message itself was discarded.
    DroppedNewest,
}

impl SendOutcome {
    /// Returns `true` if the offer caused an element to be discarded.
    #[must_use]
    pub const fn is_drop(&self) -> bool {
        matches!(self, SendOutcome::DroppedOldest | SendOutcome::DroppedNewest)
    }
}
