//! CPU topology and pinning.
//!
//! The scheduler policies (`single-cpu`, `random-cpu`) need to enumerate
//! online CPUs and pin a worker thread to one. `core_affinity` is
//! the crate the wider corpus reaches for here — see the comment naming it
//! directly in `other_examples/…SASE-SDWAN…core.rs.rs`'s worker spawn path.

/// Opaque CPU identifier, matching `core_affinity::CoreId`'s role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuId(pub usize);

/// Lists the CPUs considered "online" for scheduling purposes.
pub fn online_cpus() -> Vec<CpuId> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|core| CpuId(core.id))
        .collect()
}

pub fn current_cpu_count() -> usize {
    online_cpus().len().max(1)
}

/// Pins the calling thread to `cpu`. Best-effort: a platform that can't
/// report core ids (or whose affinity call fails) leaves the thread
/// unpinned rather than panicking — a worker still functions without
/// pinning, just without the cache-locality guarantee.
pub fn pin_current_thread(cpu: CpuId) -> bool {
    core_affinity::set_for_current(core_affinity::CoreId { id: cpu.0 })
}
