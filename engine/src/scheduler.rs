//! Scheduler policies: mapping a packet to a worker CPU.
//!
//! Grounded on `original_source/src/sd_single.c` (`single-cpu`) and
//! `sd_rand.c` (`random-cpu`). The source's `random-cpu` uses
//! `net_random() & (num_online_cpus() - 1)`, uniform only when the online
//! count is a power of two; this implementation instead draws a uniform
//! index over `[0, online_count)` via `rand::Rng::gen_range`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::{EngineError, EngineResult};
use crate::packet::{Direction, Packet};

/// A named strategy mapping a packet to a worker index. `select` must
/// return an index in `[0, worker_count)`.
pub trait SchedulerPolicy: Send + Sync {
    fn select(&self, packet: &Packet, direction: Direction, worker_count: usize) -> usize;
    fn name(&self) -> &'static str;
}

/// Always the same configurable CPU.
pub struct SingleCpu {
    cpu: AtomicUsize,
}

impl SingleCpu {
    pub fn new(cpu: usize) -> Arc<Self> {
        Arc::new(SingleCpu {
            cpu: AtomicUsize::new(cpu),
        })
    }

    /// Rejected at configuration time if `cpu` is outside
    /// `[0, online_count)`.
    pub fn set_cpu(&self, cpu: usize, online_count: usize) -> EngineResult<()> {
        if cpu >= online_count {
            return Err(EngineError::Invalid);
        }
        self.cpu.store(cpu, Ordering::Release);
        Ok(())
    }

    pub fn cpu(&self) -> usize {
        self.cpu.load(Ordering::Acquire)
    }
}

impl SchedulerPolicy for SingleCpu {
    fn select(&self, _packet: &Packet, _direction: Direction, worker_count: usize) -> usize {
        self.cpu().min(worker_count.saturating_sub(1))
    }

    fn name(&self) -> &'static str {
        "single-cpu"
    }
}

/// Uniform pseudo-random choice over online CPUs.
#[derive(Default)]
pub struct RandomCpu;

impl SchedulerPolicy for RandomCpu {
    fn select(&self, _packet: &Packet, _direction: Direction, worker_count: usize) -> usize {
        if worker_count <= 1 {
            return 0;
        }
        rand::thread_rng().gen_range(0..worker_count)
    }

    fn name(&self) -> &'static str {
        "random-cpu"
    }
}

/// Named policy table with one active policy: policies are stored in a
/// small map and one is active at a time after `init()`. `single_cpu` is
/// kept as a concrete handle (rather than only
/// through the trait object map) so the control dispatcher can validate
/// and update its configured CPU without downcasting.
pub struct SchedulerRegistry {
    policies: HashMap<&'static str, Arc<dyn SchedulerPolicy>>,
    single_cpu: Arc<SingleCpu>,
    active: RwLock<&'static str>,
}

impl SchedulerRegistry {
    /// Registers the two required policies and activates `single-cpu`.
    pub fn init(single_cpu_default: usize) -> Self {
        let single_cpu = SingleCpu::new(single_cpu_default);
        let mut policies: HashMap<&'static str, Arc<dyn SchedulerPolicy>> = HashMap::new();
        policies.insert("single-cpu", single_cpu.clone());
        policies.insert("random-cpu", Arc::new(RandomCpu));
        SchedulerRegistry {
            policies,
            single_cpu,
            active: RwLock::new("single-cpu"),
        }
    }

    pub fn set_active(&self, name: &str) -> EngineResult<()> {
        let key = *self.policies.keys().find(|k| **k == name).ok_or(EngineError::NotFound)?;
        *self.active.write() = key;
        Ok(())
    }

    pub fn active_name(&self) -> &'static str {
        *self.active.read()
    }

    pub fn single_cpu(&self) -> &SingleCpu {
        &self.single_cpu
    }

    pub fn schedule(&self, packet: &Packet, direction: Direction, worker_count: usize) -> usize {
        let active = self.active_name();
        self.policies[active].select(packet, direction, worker_count)
    }
}
