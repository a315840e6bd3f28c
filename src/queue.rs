//! FIFO wait queue with direct hand-off.
//!
//! A caller that finds nothing free enqueues itself and gets a
//! [`WaitTicket`]. Whoever frees a resource calls [`WaitQueue::hand_off`],
//! which sends it straight to the oldest live waiter. Nobody polls and a late
//! arrival can never overtake an earlier waiter.
//!
//! When the resource a waiter was counting on cannot be produced, the owner
//! calls [`WaitQueue::reject`] and the oldest waiter gets the error instead.
//!
//! Dropping a ticket (timeout, or the acquiring future being cancelled)
//! removes it from the queue. If a resource was handed to the ticket just
//! before it was dropped, the owner gets it back through [`Abandon`] and
//! passes it on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{PoolError, Result};

/// Owner of a wait queue, told when a ticket is given up.
pub(crate) trait Abandon<T>: Send + Sync + 'static {
    /// Remove `ticket` from the queue. Anything already sent on `rx` must be
    /// returned to the pool by the implementation.
    ///
    /// Called without the owner's lock held.
    fn abandon(&self, ticket: u64, rx: &mut HandOff<T>);
}

/// Receiving end of a queued acquisition.
pub(crate) type HandOff<T> = oneshot::Receiver<Result<T>>;

/// Ordered queue of pending acquisitions.
pub(crate) struct WaitQueue<T> {
    next_ticket: u64,
    waiters: VecDeque<(u64, oneshot::Sender<Result<T>>)>,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_ticket: 0,
            waiters: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Join the back of the queue.
    pub(crate) fn enqueue(&mut self) -> (u64, HandOff<T>) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back((ticket, tx));
        (ticket, rx)
    }

    /// Drop `ticket` from the queue. Returns whether it was still queued.
    pub(crate) fn remove(&mut self, ticket: u64) -> bool {
        match self.waiters.iter().position(|(t, _)| *t == ticket) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Give `value` to the oldest live waiter.
    ///
    /// Returns the value back when nobody is waiting.
    pub(crate) fn hand_off(&mut self, value: T) -> Option<T> {
        self.send_to_head(Ok(value)).and_then(Result::ok)
    }

    /// Fail the oldest live waiter with `error`.
    ///
    /// Returns `false` when nobody is waiting.
    pub(crate) fn reject(&mut self, error: PoolError) -> bool {
        self.send_to_head(Err(error)).is_none()
    }

    fn send_to_head(&mut self, mut message: Result<T>) -> Option<Result<T>> {
        while let Some((ticket, tx)) = self.waiters.pop_front() {
            match tx.send(message) {
                Ok(()) => {
                    log::trace!("Answered waiter #{}", ticket);
                    return None;
                }
                Err(returned) => message = returned,
            }
        }
        Some(message)
    }

    /// Drop every waiter; their tickets resolve with
    /// [`PoolError::ShuttingDown`]. Returns how many were dropped.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }
}

/// A place in a [`WaitQueue`].
pub(crate) struct WaitTicket<T, O: Abandon<T>> {
    ticket: u64,
    rx: Option<HandOff<T>>,
    owner: Arc<O>,
}

impl<T, O: Abandon<T>> WaitTicket<T, O> {
    pub(crate) fn new(ticket: u64, rx: HandOff<T>, owner: Arc<O>) -> Self {
        Self {
            ticket,
            rx: Some(rx),
            owner,
        }
    }

    /// Wait for a hand-off, at most `timeout` if given.
    ///
    /// # Errors
    ///
    /// - [`PoolError::AcquireTimeout`] when the timeout elapses
    /// - [`PoolError::ShuttingDown`] when the queue was cleared
    /// - whatever error the owner passed to [`WaitQueue::reject`]
    pub(crate) async fn wait(mut self, timeout: Option<Duration>) -> Result<T> {
        let received = {
            let Some(rx) = self.rx.as_mut() else {
                return Err(PoolError::ShuttingDown);
            };
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(received) => received,
                    // Ticket is dropped on return, which leaves the queue.
                    Err(_) => return Err(PoolError::AcquireTimeout(limit)),
                },
                None => rx.await,
            }
        };

        self.rx = None;
        received.unwrap_or(Err(PoolError::ShuttingDown))
    }
}

impl<T, O: Abandon<T>> Drop for WaitTicket<T, O> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            log::debug!("Waiter #{} gave up its place in the queue", self.ticket);
            self.owner.abandon(self.ticket, &mut rx);
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
