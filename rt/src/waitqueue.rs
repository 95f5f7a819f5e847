//! A blocking multi-producer queue, one per worker.
//!
//! Grounded on `wdk::ioqueue::IOQueue` (a `Mutex<VecDeque<_>>` paired with a
//! wait primitive the kernel provides) — reimplemented here over
//! `parking_lot::Mutex` + `Condvar` since userspace has no equivalent of the
//! Windows Driver Kit's dedicated queue object. Each per-CPU worker owns
//! one ingress and one egress queue of this shape.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// FIFO queue with a blocking pop, closable so a worker can be told to
/// stop waiting and drain out.
pub struct WaitQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        WaitQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes an item and wakes one waiting consumer. Returns `false` if
    /// the queue is closed, in which case the item was not enqueued.
    pub fn push(&self, item: T) -> bool {
        let mut guard = self.inner.lock();
        if guard.closed {
            return false;
        }
        guard.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Blocks until an item is available, the queue is closed, or
    /// `timeout` elapses — whichever comes first.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut guard = self.inner.lock();
        loop {
            if let Some(item) = guard.items.pop_front() {
                return Some(item);
            }
            if guard.closed {
                return None;
            }
            let result = self.not_empty.wait_for(&mut guard, timeout);
            if result.timed_out() && guard.items.is_empty() {
                return None;
            }
        }
    }

    /// Closes the queue and wakes every waiter; subsequent `push`es fail.
    pub fn close(&self) {
        let mut guard = self.inner.lock();
        guard.closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        WaitQueue::new()
    }
}
