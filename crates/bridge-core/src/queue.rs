//! Bounded producer/consumer queue with a drop-oldest overflow policy.
//!
//! Every pipeline stage in the bridge couples a fast producer (an OS
//! callback) to a slower consumer (an encode/send worker) through one of
//! these. When the consumer falls behind, the queue evicts the *oldest*
//! item so the consumer always sees a fresh suffix of the stream; end to
//! end latency is capped at `capacity` items regardless of network speed.
//!
//! The evicted item is handed back to the producer so owned resources
//! (pooled pixel buffers) can be released immediately.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

/// A bounded MPMC queue that evicts the oldest item when full.
pub struct DropOldestQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> DropOldestQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Pushes an item. When the queue is full the oldest item is evicted,
    /// counted, and returned so the caller can release its resources.
    /// Pushing into a closed queue returns the item itself unqueued.
    pub fn push(&self, item: T) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Some(item);
        }
        let evicted = if inner.items.len() == self.capacity {
            inner.dropped += 1;
            inner.items.pop_front()
        } else {
            None
        };
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
        evicted
    }

    /// Blocks until an item is available or the queue is closed and
    /// drained. Returns `None` only after close.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .available
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }

    /// Closes the queue: pending items remain poppable, further pushes are
    /// rejected, and blocked consumers wake up.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    /// Drains and returns everything currently queued (used at teardown so
    /// owned buffers can be released).
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.drain(..).collect()
    }

    /// Number of items evicted by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dropped
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
