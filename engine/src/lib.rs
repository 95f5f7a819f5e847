//! The engine: a process-wide context tying the registry, scheduler, worker
//! pool, control dispatcher, and virtual-link subsystem together.
//!
//! Grounded on `original_source/src/xt_engine.c`'s module init/exit (builds
//! the registry and worker pool at `insmod` time, tears them down at
//! `rmmod`). Kept as a small, explicit process-wide context object,
//! initialized once at startup and torn down in reverse order, rather than
//! scattering global statics.

pub mod binding;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fb;
pub mod fblocks;
pub mod idp;
pub mod packet;
pub mod registry;
pub mod scheduler;
pub mod vlink;
pub mod worker;

use std::sync::Arc;

use rt::{CpuId, Epoch};

pub use config::EngineConfig;
pub use dispatcher::{Command, Dispatcher};
pub use error::{EngineError, EngineResult};
pub use fb::{Fb, FunctionalBlock, RxOutcome, WorkerContext};
pub use packet::{Direction, Packet};
pub use registry::Registry;
pub use scheduler::SchedulerRegistry;
pub use vlink::VlinkRegistry;
pub use worker::WorkerHandle;

/// Everything a running engine needs, owned in one place. Fields are listed
/// in construction order; `shutdown` tears them down in the reverse order,
/// matching the module's own init/exit symmetry.
pub struct Context {
    pub config: EngineConfig,
    epoch: Arc<Epoch>,
    pub registry: Arc<Registry>,
    pub scheduler: Arc<SchedulerRegistry>,
    pub dispatcher: Dispatcher,
    pub vlink: Arc<VlinkRegistry>,
    workers: Vec<WorkerHandle>,
}

impl Context {
    /// Builds the registry, scheduler, and worker pool, registers the two
    /// reference FB types, and spawns one pinned thread per configured
    /// worker. Nothing is listening on any transport yet -- that's
    /// `fbengined`'s job, driving `submit`/`dispatcher.handle` from a
    /// socket.
    pub fn start(config: EngineConfig) -> EngineResult<Self> {
        let epoch = Arc::new(Epoch::new());
        let registry = Arc::new(Registry::new(Arc::clone(&epoch)));
        let worker_count = config.worker_count();

        let scheduler = Arc::new(SchedulerRegistry::init(config.single_cpu));
        scheduler.set_active(&config.scheduler_policy)?;

        let online = rt::online_cpus();
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let cpu = online.get(id % online.len().max(1)).copied().unwrap_or(CpuId(id));
            workers.push(worker::spawn_worker(
                id,
                cpu,
                Arc::clone(&registry),
                Arc::clone(&epoch),
                config.hop_budget,
                config.queue_timeout(),
            ));
        }

        let vlink = Arc::new(VlinkRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), worker_count, Arc::clone(&vlink));
        dispatcher.register_factory("linklayer", fblocks::LinkLayerFb::factory)?;
        dispatcher.register_factory("tee", fblocks::TeeFb::factory)?;
        dispatcher.register_factory("test", fblocks::TestFb::factory)?;

        Ok(Context {
            config,
            epoch,
            registry,
            scheduler,
            dispatcher,
            vlink,
            workers,
        })
    }

    /// Hands a packet to whichever worker the active scheduler policy
    /// selects. This is the entry point `fbengined`'s rx callback (or an
    /// FB's own `ingest`-style helper) calls once a packet already carries
    /// its first IDP.
    pub fn submit(&self, packet: Packet) -> bool {
        let worker_count = self.workers.len();
        if worker_count == 0 {
            return false;
        }
        let index = self.scheduler.schedule(&packet, packet.direction, worker_count);
        self.workers[index].enqueue(packet)
    }

    pub fn worker_stats(&self) -> Vec<protocol::info::WorkerSnapshot> {
        self.workers
            .iter()
            .map(|w| {
                let c = w.stats.snapshot();
                protocol::info::WorkerSnapshot {
                    id: w.id,
                    packets: c.packets,
                    bytes: c.bytes,
                    errors: c.errors,
                    drops: c.drops,
                    timer_fires: c.timer_fires,
                    timer_cpu_miss: c.timer_cpu_miss,
                    last_latency_micros: c.last_latency_micros,
                }
            })
            .collect()
    }

    pub fn collect_garbage(&self) {
        self.registry.collect_garbage();
    }

    /// `DUMP`: a whole-engine snapshot for `fbctl dump`. Read-only and
    /// never touches the control lock's mutation paths, so it is served
    /// directly here rather than through `Dispatcher::handle`.
    pub fn snapshot(&self) -> protocol::info::EngineSnapshot {
        let workers = self.worker_stats();
        let packets = workers.iter().map(|w| w.packets).sum();
        let drops = workers.iter().map(|w| w.drops).sum();
        protocol::info::EngineSnapshot {
            blocks: self.registry.snapshot(),
            worker_count: self.workers.len(),
            packets_processed: packets,
            packets_dropped: drops,
            workers,
        }
    }

    /// Stops and joins every worker, then runs a final collection so
    /// anything retired during shutdown is actually freed before the
    /// process exits -- the reverse of `start`'s construction order.
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            worker.stop();
        }
        for worker in &mut self.workers {
            worker.join();
        }
        self.epoch.collect();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}
