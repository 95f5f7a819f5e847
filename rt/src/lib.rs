//! Small concurrency primitives the engine is built on.
//!
//! Each one is hand-rolled rather than pulled from a crate, mirroring
//! `wdk`'s own texture: a driver can't always reach for `crossbeam`, so it
//! carries its own spinlock, wait queue, and reclamation scheme. This
//! crate keeps that texture even though nothing here forces userspace code
//! away from the ecosystem equivalents — the point is to show the
//! primitives the rest of the engine is actually built from.

pub mod cpu;
pub mod epoch;
pub mod seqlock;
pub mod waitqueue;

pub use cpu::{current_cpu_count, online_cpus, pin_current_thread, CpuId};
pub use epoch::{Epoch, Guard};
pub use seqlock::SeqLock;
pub use waitqueue::WaitQueue;
