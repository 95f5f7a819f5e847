//! Bulk read-only replies: FB listings and per-worker counters.
//!
//! Unlike `command::CommandEnvelope` these are variable-length, so they go
//! over the wire as JSON (via `serde`) rather than as a fixed `repr(C)`
//! struct — there is no hot-path requirement on the control plane's replies.

use serde::{Deserialize, Serialize};

/// One functional block, as shown by `fbctl dump`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FbSnapshot {
    pub name: String,
    pub fb_type: String,
    pub idp: u32,
    pub refcount: u32,
    pub ingress: Option<u32>,
    pub egress: Option<u32>,
}

/// One worker's counters, as shown by `fbctl dump`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub packets: u64,
    pub bytes: u64,
    pub errors: u64,
    pub drops: u64,
    pub timer_fires: u64,
    pub timer_cpu_miss: u64,
    pub last_latency_micros: u64,
}

/// Whole-engine snapshot returned by `fbctl dump`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub blocks: Vec<FbSnapshot>,
    pub worker_count: usize,
    pub packets_processed: u64,
    pub packets_dropped: u64,
    pub workers: Vec<WorkerSnapshot>,
}
