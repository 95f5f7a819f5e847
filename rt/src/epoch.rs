//! Epoch-based reclamation for the binding/event core.
//!
//! Epoch-based RCU reclaims an FB's old private data after REPLACE/RM:
//! readers (workers
//! on the data path) enter a guarded section before dereferencing a
//! binding, and a retired object is only actually freed once every
//! participant has been seen outside any section that started before the
//! retirement. This mirrors the *intent* of the kernel's `rcu_read_lock`/
//! `call_rcu` pairing used throughout `original_source/` (e.g. the
//! `rcu_dereference`/`rcu_read_lock` calls in `fb_eth.c`), reimplemented
//! without a kernel to defer actual frees to a grace-period sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

const QUIESCENT: u64 = u64::MAX;

/// A single thread's (or worker's) participation token.
struct Participant {
    local_epoch: AtomicU64,
}

type Garbage = Box<dyn FnOnce() + Send>;

/// Shared epoch state: one per engine, registered into by every worker
/// thread that walks FB bindings on the data path.
pub struct Epoch {
    global: AtomicU64,
    participants: Mutex<Vec<Arc<Participant>>>,
    garbage: Mutex<Vec<(u64, Garbage)>>,
}

impl Epoch {
    pub fn new() -> Self {
        Epoch {
            global: AtomicU64::new(0),
            participants: Mutex::new(Vec::new()),
            garbage: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new participant (one per worker thread). Keep the
    /// returned handle for the worker's lifetime and call `enter` on it
    /// around every data-path binding traversal.
    pub fn register(&self) -> ParticipantHandle {
        let participant = Arc::new(Participant {
            local_epoch: AtomicU64::new(QUIESCENT),
        });
        self.participants.lock().push(Arc::clone(&participant));
        ParticipantHandle { participant }
    }

    /// Enters a read-side critical section for `participant`, returning a
    /// guard that exits it on drop.
    pub fn enter<'a>(&'a self, participant: &'a ParticipantHandle) -> Guard<'a> {
        let now = self.global.load(Ordering::Acquire);
        participant.participant.local_epoch.store(now, Ordering::Release);
        Guard { epoch: self, participant }
    }

    /// Schedules `f` to run once no reader could still be observing the
    /// object it frees — i.e. once every participant's local epoch has
    /// advanced past the epoch current at retirement.
    pub fn retire(&self, f: impl FnOnce() + Send + 'static) {
        let tag = self.global.load(Ordering::Acquire);
        self.garbage.lock().push((tag, Box::new(f)));
    }

    /// Advances the global epoch and frees any garbage that is now safe
    /// to drop. Call periodically from the control path (e.g. after every
    /// RM/REPLACE, or on a timer) — this is not done automatically.
    pub fn collect(&self) {
        self.global.fetch_add(1, Ordering::AcqRel);
        let min_active = self
            .participants
            .lock()
            .iter()
            .map(|p| p.local_epoch.load(Ordering::Acquire))
            .filter(|&e| e != QUIESCENT)
            .min();
        let Some(min_active) = min_active else {
            // No active readers at all: everything retired so far is safe.
            self.garbage.lock().drain(..).for_each(|(_, f)| f());
            return;
        };
        let mut garbage = self.garbage.lock();
        let mut still_pending = Vec::new();
        for (tag, f) in garbage.drain(..) {
            if tag < min_active {
                f();
            } else {
                still_pending.push((tag, f));
            }
        }
        *garbage = still_pending;
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch::new()
    }
}

/// A worker's registration with an `Epoch`. Long-lived; reused across many
/// `enter` calls.
pub struct ParticipantHandle {
    participant: Arc<Participant>,
}

/// An active read-side critical section. Dropping it marks the
/// participant quiescent again.
pub struct Guard<'a> {
    epoch: &'a Epoch,
    participant: &'a ParticipantHandle,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        let _ = self.epoch;
        self.participant
            .participant
            .local_epoch
            .store(QUIESCENT, Ordering::Release);
    }
}
