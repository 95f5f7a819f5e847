//! The functional block object model: the central entity of the engine.
//!
//! Grounded on `original_source/src/xt_fblock.h`'s `struct fblock` (name,
//! idp, flags, refcount, factory, private, `netfb_rx`, `event_rx`,
//! subscribers) and its registration/lifecycle in `xt_engine.c`. Reference
//! counting is Rust's own `Arc` rather than a hand-rolled atomic counter —
//! `Arc::strong_count` gives exactly the "current lookup holds one; the
//! caller holds one" accounting `RM` needs to refuse removing a bound or
//! otherwise-referenced FB, without reimplementing what the standard
//! library already does correctly.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::binding::{Event, PortSet};
use crate::error::{EngineError, EngineResult};
use crate::packet::{Direction, Packet};

/// `Fb::flags` bits. Matches `xt_fblock.h`'s "has-been-registered" /
/// "is-exiting" pair; a plain bitmask rather than a crate since the set
/// never grows beyond these two.
mod flags {
    pub const HAS_BEEN_REGISTERED: u8 = 0b01;
    pub const IS_EXITING: u8 = 0b10;
}

/// Outcome of a `netfb_rx` call. Ownership of the packet travels with the
/// outcome: `Continue` hands it back to the worker loop, the other two
/// variants mean the callback already consumed (and is responsible for
/// having freed) it.
pub enum RxOutcome {
    Continue(Packet),
    Dropped,
    Error,
}

/// What a `netfb_rx` call sees of the worker running it: which per-CPU
/// port set to read, and a place to push a duplicated packet (the tee FB's
/// clone: enqueue the copy onto the current worker's own backlog instead
/// of recursing into `netfb_rx`).
pub trait WorkerContext {
    fn worker_id(&self) -> usize;
    fn push_backlog(&mut self, packet: Packet);
}

/// Per-type behavior an FB instance is built from. `netfb_rx` is the data
/// path; `set_opt` is the only control-path behavior that varies by type —
/// bind/unbind are handled generically by `Fb::handle_event` since every FB
/// shares the same port-state shape.
pub trait FunctionalBlock: Send + Sync {
    fn netfb_rx(&self, fb: &Fb, packet: Packet, ctx: &mut dyn WorkerContext) -> RxOutcome;

    fn set_opt(&self, fb: &Fb, key: &str, value: &str) -> EngineResult<()> {
        let _ = (fb, key, value);
        Err(EngineError::Invalid)
    }

    /// Whether this FB type has a genuine secondary ("clone") port, like
    /// tee's `port_clone`. Gates `PortSet::bind`'s clone-port fallback:
    /// `fb_eth.c`'s non-tee BIND handler returns `NOTIFY_BAD` outright when
    /// the primary port is already taken, it never falls back to a second
    /// slot. Defaults to `false` so adding a new FB type opts into the
    /// fallback deliberately rather than inheriting it by accident.
    fn has_secondary_port(&self) -> bool {
        false
    }
}

/// Constructs a `FunctionalBlock` instance for a named type. Registered
/// factories back the control dispatcher's `ADD <name> <type>` command. A
/// factory can fail (e.g. the link-layer source FB is a singleton and
/// refuses a second instantiation), hence the `EngineResult`.
pub type Factory = fn(worker_count: usize) -> EngineResult<Box<dyn FunctionalBlock>>;

/// Maps FB type names to constructors. Grounded on `original_source/src/
/// xt_builder.c`'s type table (there, a critbit tree; a `BTreeMap` serves
/// the same ordered-lookup purpose without a hand-rolled trie).
#[derive(Default)]
pub struct FactoryRegistry {
    factories: std::collections::BTreeMap<String, Factory>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: &str, factory: Factory) -> EngineResult<()> {
        if self.factories.contains_key(type_name) {
            return Err(EngineError::InUse);
        }
        self.factories.insert(type_name.to_owned(), factory);
        Ok(())
    }

    pub fn build(&self, type_name: &str, worker_count: usize) -> EngineResult<Box<dyn FunctionalBlock>> {
        let factory = self.factories.get(type_name).ok_or(EngineError::NotFound)?;
        factory(worker_count)
    }
}

/// A published or about-to-be-published functional block.
pub struct Fb {
    pub name: String,
    idp: AtomicU32,
    pub fb_type: String,
    flags: AtomicU8,
    ports: Vec<PortSet>,
    behavior: Box<dyn FunctionalBlock>,
    subscribers: Mutex<Vec<Weak<Fb>>>,
}

impl Fb {
    pub fn new(name: String, idp: u32, fb_type: String, worker_count: usize, behavior: Box<dyn FunctionalBlock>) -> Self {
        let mut ports = Vec::with_capacity(worker_count);
        ports.resize_with(worker_count, PortSet::new);
        Fb {
            name,
            idp: AtomicU32::new(idp),
            fb_type,
            flags: AtomicU8::new(0),
            ports,
            behavior,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn idp(&self) -> u32 {
        self.idp.load(Ordering::Acquire)
    }

    /// Reassigns this FB's own identity to `idp`. Only `Registry::replace`
    /// calls this, when a replacement FB takes over the identity of the FB
    /// it is replacing -- every other path treats an FB's idp as fixed for
    /// its lifetime.
    pub(crate) fn set_idp(&self, idp: u32) {
        self.idp.store(idp, Ordering::Release);
    }

    pub fn mark_registered(&self) {
        self.flags.fetch_or(flags::HAS_BEEN_REGISTERED, Ordering::Release);
    }

    pub fn mark_exiting(&self) {
        self.flags.fetch_or(flags::IS_EXITING, Ordering::Release);
    }

    pub fn is_exiting(&self) -> bool {
        self.flags.load(Ordering::Acquire) & flags::IS_EXITING != 0
    }

    pub fn ports(&self) -> &[PortSet] {
        &self.ports
    }

    pub fn read_port(&self, worker: usize, dir: Direction) -> u32 {
        self.ports[worker].read(dir)
    }

    /// Copies `other`'s per-worker port bindings onto `self`, worker for
    /// worker. Backs REPLACE's optional private-state transfer when the
    /// caller's `drop_priv` flag is false and the two FBs share a type.
    pub fn copy_ports_from(&self, other: &Fb) {
        for (mine, theirs) in self.ports.iter().zip(other.ports.iter()) {
            mine.force_write(Direction::Ingress, theirs.read(Direction::Ingress));
            mine.force_write(Direction::Egress, theirs.read(Direction::Egress));
            mine.force_write_clone(theirs.read_clone());
        }
    }

    pub fn netfb_rx(&self, packet: Packet, ctx: &mut dyn WorkerContext) -> RxOutcome {
        self.behavior.netfb_rx(self, packet, ctx)
    }

    pub fn subscribe(self: &Arc<Self>, sink: &Arc<Fb>) {
        self.subscribers.lock().push(Arc::downgrade(sink));
    }

    pub fn unsubscribe(&self, sink: &Arc<Fb>) {
        self.subscribers.lock().retain(|w| !w.ptr_eq(&Arc::downgrade(sink)));
    }

    /// Applies a control event to every per-CPU port instance (BIND/UNBIND
    /// converge across all workers under the caller's control lock) or to
    /// the type-specific option handler (SET_OPT), then notifies
    /// subscribers. Subscriber delivery is a snapshot taken before
    /// this function returns and invoked by the caller outside the control
    /// lock — see `deliver_to_subscribers`. Refuses once `mark_exiting` has
    /// been called: an FB mid-removal shouldn't pick up new bindings only
    /// to have them torn down a moment later.
    pub fn handle_event(&self, event: &Event) -> EngineResult<()> {
        if self.is_exiting() {
            return Err(EngineError::Busy);
        }
        match event {
            Event::Bind { direction, idp } => {
                let allow_clone_fallback = self.behavior.has_secondary_port();
                for port_set in &self.ports {
                    port_set.bind(*direction, *idp, allow_clone_fallback)?;
                }
                Ok(())
            }
            Event::Unbind { direction, idp } => {
                for port_set in &self.ports {
                    port_set.unbind(*direction, *idp)?;
                }
                Ok(())
            }
            Event::SetOpt { key, value } => self.behavior.set_opt(self, key, value),
        }
    }

    /// Snapshots the subscriber list without holding any lock during the
    /// actual delivery; order across subscribers is unspecified, but the
    /// control lock must never be held while delivering.
    pub fn subscriber_snapshot(&self) -> Vec<Arc<Fb>> {
        self.subscribers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn deliver_to_subscribers(&self, event: &Event) {
        for sink in self.subscriber_snapshot() {
            let _ = sink.handle_event(event);
        }
    }
}
