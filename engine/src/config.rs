//! Engine configuration, loaded from JSON or built programmatically.
//!
//! The `release` crate's own config is `serde`-derived
//! (`windows_kext/release/Cargo.toml`); this follows the same shape rather
//! than inventing a bespoke config format.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Defaults to `std::thread::available_parallelism()` when absent.
    pub workers: Option<usize>,
    /// One of "single-cpu" or "random-cpu".
    #[serde(default = "default_policy")]
    pub scheduler_policy: String,
    /// `single-cpu`'s fixed CPU index.
    #[serde(default)]
    pub single_cpu: usize,
    /// How long an idle worker sleeps before re-checking its queues.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Cyclic-graph traversal cap.
    #[serde(default = "default_hop_budget")]
    pub hop_budget: u32,
}

fn default_policy() -> String {
    "single-cpu".to_owned()
}

fn default_queue_timeout_ms() -> u64 {
    10
}

fn default_hop_budget() -> u32 {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: None,
            scheduler_policy: default_policy(),
            single_cpu: 0,
            queue_timeout_ms: default_queue_timeout_ms(),
            hop_budget: default_hop_budget(),
        }
    }
}

impl EngineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = fs::read_to_string(path).map_err(|_| EngineError::NotFound)?;
        serde_json::from_str(&text).map_err(|_| EngineError::Invalid)
    }
}
