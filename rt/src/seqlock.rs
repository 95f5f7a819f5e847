//! A reader-writer-of-one seqlock: writers never block, readers retry.
//!
//! Grounded on the read-side usage in `original_source/src/fb_eth.c`
//! (`read_seqbegin`/`read_seqretry` wrapping a read of per-CPU port state)
//! and the write side in `fb_eth_event` (`write_seqlock`/`write_sequnlock`
//! around a single `idp_t` update). The sequence is a plain 2×`u32` pair:
//! one `AtomicU32` counter plus the guarded value, with the counter's
//! parity marking "write in progress".

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Guards a small `Copy` value that is read far more often than written —
/// exactly the per-port next-hop IDP state each functional block port
/// holds, read on every packet and written only on BIND/UNBIND/REPLACE.
pub struct SeqLock<T: Copy> {
    sequence: AtomicU32,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only ever done through `read`/`write`, which
// synchronize via `sequence`; `T: Copy + Send` makes sharing it across
// threads sound.
unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    pub fn new(value: T) -> Self {
        SeqLock {
            sequence: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Reads the guarded value, retrying if a write was in flight.
    pub fn read(&self) -> T {
        loop {
            let seq1 = self.sequence.load(Ordering::Acquire);
            if seq1 & 1 != 0 {
                std::hint::spin_loop();
                continue;
            }
            // SAFETY: no writer can be mutating `value` while `seq1` is
            // even and unchanged across this read, checked below.
            let value = unsafe { *self.value.get() };
            let seq2 = self.sequence.load(Ordering::Acquire);
            if seq1 == seq2 {
                return value;
            }
        }
    }

    /// Overwrites the guarded value. Callers must already hold whatever
    /// lock serializes writers (the control lock, in this engine) — a
    /// seqlock only protects readers from a writer, not writers from each
    /// other.
    pub fn write(&self, value: T) {
        let seq = self.sequence.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(seq & 1, 0, "concurrent seqlock writers");
        // SAFETY: the sequence is now odd, so `read` will spin rather than
        // observe a partial write.
        unsafe {
            *self.value.get() = value;
        }
        self.sequence.fetch_add(1, Ordering::Release);
    }
}

impl<T: Copy + Default> Default for SeqLock<T> {
    fn default() -> Self {
        SeqLock::new(T::default())
    }
}
