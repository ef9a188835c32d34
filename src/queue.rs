//! Thread-safe FIFO buffering between the receive loop and callers.
//!
//! The receive loop pushes frames as they arrive off the wire; callers pop
//! them out, optionally waiting up to a deadline for one to show up. The
//! queue is unbounded and never blocks producers. Arrival order is preserved
//! exactly.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::frame::Frame;

// ============================================================================
// FrameQueue
// ============================================================================

/// Unbounded FIFO of received frames, shared between the receive loop and
/// any number of waiters.
///
/// `push` and `try_pop` are synchronous and lock-only; [`pop_within`] is the
/// async entry point that parks the caller until a frame arrives or the
/// deadline passes, whichever comes first.
///
/// [`pop_within`]: FrameQueue::pop_within
#[derive(Debug, Default)]
pub struct FrameQueue {
    inner: Mutex<VecDeque<Frame>>,
    notify: Notify,
}

impl FrameQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame at the tail and wakes one waiter, if any.
    pub fn push(&self, frame: Frame) {
        self.inner.lock().push_back(frame);
        self.notify.notify_one();
    }

    /// Removes and returns the head frame without waiting.
    pub fn try_pop(&self) -> Option<Frame> {
        self.inner.lock().pop_front()
    }

    /// Removes and returns the head frame, waiting up to `timeout` for one
    /// to arrive.
    ///
    /// Returns `None` only once the full timeout has elapsed with the queue
    /// still empty. A frame that lands exactly at the deadline is still
    /// delivered. A `timeout` too large to place on the clock (such as
    /// `Duration::MAX`) waits indefinitely.
    pub async fn pop_within(&self, timeout: Duration) -> Option<Frame> {
        if let Some(frame) = self.try_pop() {
            return Some(frame);
        }

        // Timeouts past the end of the clock get no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = self.notify.notified();

            // Re-check after registering interest so a push racing with the
            // miss above cannot be lost. This also claims the frame when a
            // wake below lost the race to another popper and looped back.
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }

            match deadline {
                Some(deadline) => {
                    if time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_pop();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Discards every queued frame, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.len();
        inner.clear();
        dropped
    }

    /// Returns the number of frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
