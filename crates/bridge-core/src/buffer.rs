//! Shared byte-buffer pool with paired rent/return accounting.
//!
//! Frame and packet buffers are rented for the duration of one
//! capture → encode → send hop. [`PooledBuf`] returns its storage to the
//! pool on `Drop`, so every exit path (send, skip, error) pairs the rent
//! with exactly one return. The rent/return counters exist so tests can
//! assert the pairing across a whole session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Retain at most this many idle buffers; beyond that, returned storage is
/// simply freed.
const MAX_IDLE_BUFFERS: usize = 16;

/// A thread-safe pool of reusable byte buffers.
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    rented: AtomicU64,
    returned: AtomicU64,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::new()),
            rented: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        })
    }

    /// Rents a buffer of exactly `len` bytes, zero-filled.
    pub fn rent(self: &Arc<Self>, len: usize) -> PooledBuf {
        self.rented.fetch_add(1, Ordering::Relaxed);
        let mut data = {
            let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.pop().unwrap_or_default()
        };
        data.clear();
        data.resize(len, 0);
        PooledBuf {
            data,
            pool: Arc::clone(self),
        }
    }

    /// Total rents since creation.
    pub fn rented(&self) -> u64 {
        self.rented.load(Ordering::Relaxed)
    }

    /// Total returns since creation. Equal to [`rented`](Self::rented) when
    /// no buffer is outstanding.
    pub fn returned(&self) -> u64 {
        self.returned.load(Ordering::Relaxed)
    }

    /// Outstanding (rented, not yet returned) buffer count.
    pub fn outstanding(&self) -> u64 {
        self.rented() - self.returned()
    }

    fn give_back(&self, mut data: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        if idle.len() < MAX_IDLE_BUFFERS {
            data.clear();
            idle.push(data);
        }
    }
}

/// A rented buffer. Dereferences to `Vec<u8>`; storage goes back to the
/// pool when dropped.
pub struct PooledBuf {
    data: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    /// The pool this buffer came from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.data
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.data));
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.data.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
