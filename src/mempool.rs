//! Packet buffer pool.
//!
//! Stands in for the driver-side mempool: fixed buffer geometry, bounded
//! capacity, and alloc/release accounting so quiescence checks can assert
//! that every buffer handed out was returned or transmitted.

use crate::{Mbuf, Result};
use failure::Fail;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Buffers per pool, matching the driver defaults the node is deployed with.
pub const NUM_MBUFS: usize = 8191;

/// Default data room of a single buffer segment.
pub const DEFAULT_BUF_SIZE: usize = 2048 + EXTRA_SPACE;

/// Headroom reserved in front of the frame for extension headers.
pub const EXTRA_SPACE: usize = 128;

#[derive(Debug, Fail)]
#[fail(display = "Mempool '{}' depleted.", _0)]
pub struct MempoolDepleted(String);

pub(crate) struct PoolInner {
    name: String,
    buf_size: usize,
    capacity: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    created: AtomicUsize,
    in_use: AtomicUsize,
}

/// A pool of fixed-size packet buffers.
///
/// The pool is cheap to clone; clones share the same freelist and counters.
#[derive(Clone)]
pub struct Mempool {
    inner: Arc<PoolInner>,
}

impl Mempool {
    pub fn new(name: &str, capacity: usize, buf_size: usize) -> Mempool {
        Mempool {
            inner: Arc::new(PoolInner {
                name: name.to_owned(),
                buf_size,
                capacity,
                free: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes a buffer from the pool.
    ///
    /// Backing storage is created lazily up to the pool capacity; beyond
    /// that the pool reports itself depleted until buffers are returned.
    pub fn alloc(&self) -> Result<Mbuf> {
        let storage = {
            let mut free = self.inner.free.lock().unwrap();
            free.pop()
        };

        let storage = match storage {
            Some(storage) => storage,
            None => {
                if self.inner.created.fetch_add(1, Ordering::Relaxed) >= self.inner.capacity {
                    self.inner.created.fetch_sub(1, Ordering::Relaxed);
                    return Err(MempoolDepleted(self.inner.name.clone()).into());
                }
                vec![0u8; self.inner.buf_size].into_boxed_slice()
            }
        };

        self.inner.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(Mbuf::from_parts(
            storage,
            EXTRA_SPACE,
            Arc::clone(&self.inner),
        ))
    }

    /// Number of buffers currently held by the application or a queue.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("mempool")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("buf_size", &self.inner.buf_size)
            .field("in_use", &self.in_use())
            .finish()
    }
}

pub(crate) fn release(pool: &PoolInner, storage: Box<[u8]>) {
    if !storage.is_empty() {
        let mut free = pool.free.lock().unwrap();
        free.push(storage);
    }
    pool.in_use.fetch_sub(1, Ordering::Relaxed);
}

thread_local! {
    static MEMPOOL: RefCell<Option<Mempool>> = RefCell::new(None);
}

/// Assigns a pool to the current thread; `Mbuf::new` allocates from it.
pub fn set_thread_pool(pool: &Mempool) {
    MEMPOOL.with(|tls| tls.replace(Some(pool.clone())));
}

pub(crate) fn thread_pool() -> Mempool {
    MEMPOOL.with(|tls| {
        let mut slot = tls.borrow_mut();
        slot.get_or_insert_with(|| Mempool::new("default", NUM_MBUFS, DEFAULT_BUF_SIZE))
            .clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_release_accounting() {
        let pool = Mempool::new("acct", 4, 256);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(2, pool.in_use());

        drop(a);
        assert_eq!(1, pool.in_use());
        drop(b);
        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn depleted_pool_errors() {
        let pool = Mempool::new("small", 2, 256);

        let _a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        assert!(pool.alloc().is_err());
    }

    #[test]
    fn returned_buffers_are_reissued() {
        let pool = Mempool::new("reuse", 1, 256);

        let a = pool.alloc().unwrap();
        drop(a);
        assert!(pool.alloc().is_ok());
    }
}
