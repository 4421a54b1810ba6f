// SPDX-License-Identifier: Apache-2.0

//! Multiple-producer, single-consumer bounded channel for single-threaded async.
//!
//! The channel owns its depth counter: both endpoints observe the same buffer
//! length, high-water mark and drop count, which the port layer surfaces as
//! gauges. The overflow behavior is fixed at creation time via
//! [`OverflowPolicy`] and never changes for the lifetime of the channel.

use crate::error::{RecvError, SendError};
use crate::{OverflowPolicy, SendOutcome};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tokio::time::{Instant, Sleep, sleep_until};

struct ChannelState<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    is_closed: bool,
    senders: usize,
    has_receiver: bool,
    receiver_waker: Option<Waker>,
    sender_wakers: VecDeque<Waker>,
    high_water: usize,
    dropped: u64,
}

/// A single-threaded bounded MPSC channel with an explicit overflow policy.
pub struct Channel<T> {
    state: RefCell<ChannelState<T>>,
}

impl<T> Channel<T> {
    /// Creates a new channel with the given capacity and overflow policy.
    ///
    /// The capacity must be at least 1; smaller values are clamped.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> (Sender<T>, Receiver<T>) {
        let capacity = capacity.max(1);
        let channel = Rc::new(Channel {
            state: RefCell::new(ChannelState {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                policy,
                is_closed: false,
                senders: 1,
                has_receiver: true,
                receiver_waker: None,
                sender_wakers: VecDeque::new(),
                high_water: 0,
                dropped: 0,
            }),
        });

        (
            Sender {
                channel: channel.clone(),
            },
            Receiver { channel },
        )
    }

    fn depth(&self) -> usize {
        self.state.borrow().buffer.len()
    }

    fn capacity(&self) -> usize {
        self.state.borrow().capacity
    }

    fn high_water_mark(&self) -> usize {
        self.state.borrow().high_water
    }

    fn dropped_total(&self) -> u64 {
        self.state.borrow().dropped
    }
}

/// A sender for the channel.
pub struct Sender<T> {
    channel: Rc<Channel<T>>,
}

/// A receiver for the channel.
pub struct Receiver<T> {
    channel: Rc<Channel<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        {
            let mut state = self.channel.state.borrow_mut();
            state.senders += 1;
        }
        Sender {
            channel: self.channel.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.channel.state.borrow_mut();
        state.senders -= 1;

        if state.senders == 0 {
            state.is_closed = true;
            if let Some(waker) = state.receiver_waker.take() {
                waker.wake();
            }
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.channel.state.borrow_mut();
        state.has_receiver = false;
        state.is_closed = true;
        // Wake all senders to handle the closure
        for waker in state.sender_wakers.drain(..) {
            waker.wake();
        }
    }
}

impl<T> Sender<T> {
    /// Offers a value to the channel without suspending.
    ///
    /// Under the drop policies a full buffer resolves the offer immediately by
    /// discarding the head or the incoming value; under the blocking policies a
    /// full buffer yields [`SendError::Full`] and the caller is expected to
    /// retry via [`Sender::send`].
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] if the channel is closed or full.
    pub fn try_send(&self, value: T) -> Result<SendOutcome, SendError<T>> {
        let mut state = self.channel.state.borrow_mut();

        if state.is_closed || !state.has_receiver {
            return Err(SendError::Closed(value));
        }

        if state.buffer.len() >= state.capacity {
            match state.policy {
                OverflowPolicy::Block | OverflowPolicy::BlockWithTimeout(_) => {
                    return Err(SendError::Full(value));
                }
                OverflowPolicy::DropOldest => {
                    let _ = state.buffer.pop_front();
                    state.buffer.push_back(value);
                    state.dropped += 1;
                    if let Some(waker) = state.receiver_waker.take() {
                        waker.wake();
                    }
                    return Ok(SendOutcome::DroppedOldest);
                }
                OverflowPolicy::DropNewest => {
                    state.dropped += 1;
                    return Ok(SendOutcome::DroppedNewest);
                }
            }
        }

        state.buffer.push_back(value);
        if state.buffer.len() > state.high_water {
            state.high_water = state.buffer.len();
        }

        if let Some(waker) = state.receiver_waker.take() {
            waker.wake();
        }

        Ok(SendOutcome::Enqueued)
    }

    /// Sends a value to the channel, honoring the channel's overflow policy.
    ///
    /// Under [`OverflowPolicy::Block`] the returned future suspends until
    /// capacity is available. Under [`OverflowPolicy::BlockWithTimeout`] the
    /// suspension is bounded and expiry yields [`SendError::Timeout`] with the
    /// value returned to the caller; nothing is partially enqueued.
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] if the channel is closed or the bounded wait
    /// expired.
    pub async fn send(&self, value: T) -> Result<SendOutcome, SendError<T>> {
        let deadline = match self.channel.state.borrow().policy {
            OverflowPolicy::BlockWithTimeout(timeout) => {
                Some(Box::pin(sleep_until(Instant::now() + timeout)))
            }
            _ => None,
        };
        SendFuture {
            sender: self.clone(),
            value: Some(value),
            deadline,
        }
        .await
    }

    /// Closes the channel. The receiver can drain buffered values.
    pub fn close(&self) {
        let mut state = self.channel.state.borrow_mut();
        state.is_closed = true;
        // Wake the receiver if it's waiting
        if let Some(waker) = state.receiver_waker.take() {
            waker.wake();
        }
        // Wake all waiting senders
        for waker in state.sender_wakers.drain(..) {
            waker.wake();
        }
    }

    /// Current number of buffered values.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.channel.depth()
    }

    /// Maximum number of buffered values.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    /// Highest buffer depth observed since creation.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.channel.high_water_mark()
    }

    /// Number of values discarded by the drop policies since creation.
    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.channel.dropped_total()
    }
}

impl<T> Receiver<T> {
    /// Tries to receive a value from the channel.
    ///
    /// # Errors
    ///
    /// Returns a [`RecvError`] if the channel is empty or closed.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        let mut state = self.channel.state.borrow_mut();

        if let Some(value) = state.buffer.pop_front() {
            // Wake one sender if channel was full
            if state.buffer.len() == state.capacity - 1 {
                if let Some(waker) = state.sender_wakers.pop_front() {
                    waker.wake();
                }
            }
            Ok(value)
        } else if state.is_closed {
            Err(RecvError::Closed)
        } else {
            Err(RecvError::Empty)
        }
    }

    /// Receives a value from the channel asynchronously.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Closed`] once the channel is closed and drained.
    pub async fn recv(&self) -> Result<T, RecvError> {
        RecvFuture { receiver: self }.await
    }

    /// Current number of buffered values.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.channel.depth()
    }

    /// Maximum number of buffered values.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    /// Highest buffer depth observed since creation.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.channel.high_water_mark()
    }

    /// Number of values discarded by the drop policies since creation.
    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.channel.dropped_total()
    }
}

struct SendFuture<T> {
    sender: Sender<T>,
    value: Option<T>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<T> Unpin for SendFuture<T> {}

impl<T> Future for SendFuture<T> {
    type Output = Result<SendOutcome, SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(deadline) = self.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                let value = self
                    .value
                    .take()
                    .expect("SendFuture polled after completion");
                return Poll::Ready(Err(SendError::Timeout(value)));
            }
        }

        let value = self
            .value
            .take()
            .expect("SendFuture polled after completion");

        match self.sender.try_send(value) {
            Ok(outcome) => Poll::Ready(Ok(outcome)),
            Err(SendError::Full(value)) => {
                self.value = Some(value);
                let mut state = self.sender.channel.state.borrow_mut();
                state.sender_wakers.push_back(cx.waker().clone());
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

struct RecvFuture<'a, T> {
    receiver: &'a Receiver<T>,
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T, RecvError>> {
        match self.receiver.try_recv() {
            Ok(value) => Poll::Ready(Ok(value)),
            Err(RecvError::Empty) => {
                let mut state = self.receiver.channel.state.borrow_mut();
                state.receiver_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn create_test_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn run_local<F>(fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let rt = create_test_runtime();
        let local = tokio::task::LocalSet::new();
        let handle = local.spawn_local(fut);
        rt.block_on(local);
        rt.block_on(handle).expect("Test task failed");
    }

    #[test]
    fn test_basic_channel_operations() {
        run_local(async {
            let (tx, rx) = Channel::new(2, OverflowPolicy::Block);

            assert!(matches!(tx.try_send(1), Ok(SendOutcome::Enqueued)));
            assert!(matches!(tx.try_send(2), Ok(SendOutcome::Enqueued)));
            assert_eq!(rx.try_recv().unwrap(), 1);
            assert_eq!(rx.try_recv().unwrap(), 2);

            assert!(matches!(rx.try_recv(), Err(RecvError::Empty)));
        });
    }

    #[test]
    fn test_channel_capacity() {
        run_local(async {
            let (tx, _rx) = Channel::new(1, OverflowPolicy::Block);

            assert!(tx.try_send(1).is_ok());
            match tx.try_send(2) {
                Err(SendError::Full(2)) => (),
                _ => panic!("Expected Full error"),
            }
        });
    }

    #[test]
    fn test_multiple_producers_preserve_fifo() {
        run_local(async {
            let (tx1, rx) = Channel::new(4, OverflowPolicy::Block);
            let tx2 = tx1.clone();

            assert!(tx1.try_send(1).is_ok());
            assert!(tx2.try_send(2).is_ok());

            assert_eq!(rx.try_recv().unwrap(), 1);
            assert_eq!(rx.try_recv().unwrap(), 2);
        });
    }

    #[test]
    fn test_channel_closing() {
        run_local(async {
            let (tx, rx) = Channel::new(1, OverflowPolicy::Block);

            assert!(tx.try_send(1).is_ok());
            tx.close();

            // Buffered value survives the close.
            assert_eq!(rx.try_recv().unwrap(), 1);
            assert!(matches!(rx.try_recv(), Err(RecvError::Closed)));

            match tx.try_send(2) {
                Err(SendError::Closed(2)) => (),
                _ => panic!("Expected Closed error"),
            }
        });
    }

    #[test]
    fn test_sender_drop_closes() {
        run_local(async {
            let (tx, rx) = Channel::new(1, OverflowPolicy::Block);

            assert!(tx.try_send(1).is_ok());
            drop(tx);

            assert_eq!(rx.recv().await.unwrap(), 1);
            assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        });
    }

    #[test]
    fn test_backpressure_suspends_producer() {
        run_local(async {
            let (tx, rx) = Channel::new(1, OverflowPolicy::Block);
            let send_completed = Rc::new(RefCell::new(false));
            let send_completed_clone = send_completed.clone();

            let producer = tokio::task::spawn_local(async move {
                assert!(tx.try_send(1).is_ok());
                assert!(tx.send(2).await.is_ok());
                *send_completed_clone.borrow_mut() = true;
            });

            tokio::task::yield_now().await;
            assert!(!*send_completed.borrow());

            assert_eq!(rx.recv().await.unwrap(), 1);

            timeout(Duration::from_millis(100), producer)
                .await
                .expect("producer should complete")
                .unwrap();

            assert!(*send_completed.borrow());
            assert_eq!(rx.recv().await.unwrap(), 2);
        });
    }

    #[test]
    fn test_blocked_senders_wake_in_fifo_order() {
        run_local(async {
            let (tx, rx) = Channel::new(1, OverflowPolicy::Block);
            let received = Rc::new(RefCell::new(vec![]));
            let received_clone = received.clone();

            assert!(tx.send(1).await.is_ok());

            let sender_clone1 = tx.clone();
            let sender_clone2 = tx.clone();

            let pending_sender_1 = tokio::task::spawn_local(async move {
                assert!(sender_clone1.send(2).await.is_ok());
            });
            let pending_sender_2 = tokio::task::spawn_local(async move {
                assert!(sender_clone2.send(3).await.is_ok());
            });

            let consumer = tokio::task::spawn_local(async move {
                let mut count = 0;
                while let Ok(value) = rx.recv().await {
                    received_clone.borrow_mut().push(value);
                    count += 1;
                    if count >= 3 {
                        break;
                    }
                }
            });

            pending_sender_1.await.unwrap();
            pending_sender_2.await.unwrap();
            consumer.await.unwrap();
            assert_eq!(*received.borrow(), vec![1, 2, 3]);
        });
    }

    #[test]
    fn test_drop_oldest_replaces_head() {
        run_local(async {
            let (tx, rx) = Channel::new(2, OverflowPolicy::DropOldest);

            assert!(matches!(tx.try_send(1), Ok(SendOutcome::Enqueued)));
            assert!(matches!(tx.try_send(2), Ok(SendOutcome::Enqueued)));
            assert!(matches!(tx.try_send(3), Ok(SendOutcome::DroppedOldest)));

            assert_eq!(tx.dropped_total(), 1);
            assert_eq!(rx.try_recv().unwrap(), 2);
            assert_eq!(rx.try_recv().unwrap(), 3);
        });
    }

    #[test]
    fn test_drop_newest_discards_incoming() {
        run_local(async {
            let (tx, rx) = Channel::new(2, OverflowPolicy::DropNewest);

            assert!(matches!(tx.try_send(1), Ok(SendOutcome::Enqueued)));
            assert!(matches!(tx.try_send(2), Ok(SendOutcome::Enqueued)));
            assert!(matches!(tx.try_send(3), Ok(SendOutcome::DroppedNewest)));

            assert_eq!(rx.dropped_total(), 1);
            assert_eq!(rx.try_recv().unwrap(), 1);
            assert_eq!(rx.try_recv().unwrap(), 2);
            assert!(matches!(rx.try_recv(), Err(RecvError::Empty)));
        });
    }

    #[test]
    fn test_send_timeout_returns_value() {
        run_local(async {
            let (tx, rx) =
                Channel::new(1, OverflowPolicy::BlockWithTimeout(Duration::from_millis(20)));

            assert!(tx.try_send(1).is_ok());
            match tx.send(2).await {
                Err(SendError::Timeout(2)) => (),
                other => panic!("Expected Timeout(2), got {other:?}"),
            }

            // No partial enqueue: only the first value is buffered.
            assert_eq!(rx.depth(), 1);
            assert_eq!(rx.try_recv().unwrap(), 1);
        });
    }

    #[test]
    fn test_depth_and_high_water_observable_from_both_ends() {
        run_local(async {
            let (tx, rx) = Channel::new(4, OverflowPolicy::Block);

            assert!(tx.try_send(1).is_ok());
            assert!(tx.try_send(2).is_ok());
            assert!(tx.try_send(3).is_ok());
            assert_eq!(tx.depth(), 3);
            assert_eq!(rx.depth(), 3);
            assert_eq!(tx.capacity(), 4);

            let _ = rx.try_recv().unwrap();
            let _ = rx.try_recv().unwrap();
            assert_eq!(tx.depth(), 1);
            assert_eq!(rx.high_water_mark(), 3);
        });
    }
}
