//! FB registry: allocation, publication, lookup, replace, and removal.
//!
//! Grounded on `original_source/src/xt_engine.c`'s `register_fblock_namespace`
//! / `unregister_fblock_namespace` / `__fblock_lookup`.
//! Publication and lookup are guarded by a `parking_lot::RwLock` (many
//! concurrent readers, a single writer for control operations) rather than
//! a literal lock-free hash table — true wait-free resolution would need a
//! lock-free map that's out of reach without pulling in a new dependency
//! for it; the `RwLock` still gives readers non-blocking
//! concurrent access to each other, which is the property the data path
//! actually depends on. Freeing a removed or replaced FB is deferred
//! through `rt::Epoch` so a traversal that resolved the old entry before a
//! RM/REPLACE keeps a live object for the rest of its hop budget.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rt::Epoch;

use crate::binding::Event;
use crate::error::{EngineError, EngineResult};
use crate::fb::{Fb, FunctionalBlock};
use crate::idp::{IdpAllocator, NameIndex, IDP_SENTINEL};
use crate::packet::Direction;

struct Inner {
    by_idp: HashMap<u32, Arc<Fb>>,
    names: NameIndex,
    allocator: IdpAllocator,
}

/// The IDP table and name index, plus the reclamation scheme that frees a
/// removed FB's registry handle only after a grace period.
pub struct Registry {
    inner: RwLock<Inner>,
    epoch: Arc<Epoch>,
}

impl Registry {
    pub fn new(epoch: Arc<Epoch>) -> Self {
        Registry {
            inner: RwLock::new(Inner {
                by_idp: HashMap::new(),
                names: NameIndex::new(),
                allocator: IdpAllocator::new(),
            }),
            epoch,
        }
    }

    /// Allocates an IDP and constructs an unpublished `Fb`. Matches
    /// `alloc_fb`/`init_fb`: refcount starts at 1 (the `Arc` itself), name
    /// is set, but the FB is not yet visible to lookups.
    pub fn init_fb(&self, name: &str, fb_type: &str, worker_count: usize, behavior: Box<dyn FunctionalBlock>) -> EngineResult<Arc<Fb>> {
        let mut inner = self.inner.write();
        if inner.names.lookup(name).is_some() {
            return Err(EngineError::InUse);
        }
        let idp = inner.allocator.allocate()?;
        Ok(Arc::new(Fb::new(name.to_owned(), idp, fb_type.to_owned(), worker_count, behavior)))
    }

    /// Publishes `fb`, making it resolvable by IDP and by name in one step
    /// from the fast path's perspective.
    pub fn publish(&self, fb: Arc<Fb>) -> EngineResult<()> {
        let mut inner = self.inner.write();
        inner.names.register(&fb.name, fb.idp())?;
        fb.mark_registered();
        inner.by_idp.insert(fb.idp(), fb);
        Ok(())
    }

    pub fn lookup_by_idp(&self, idp: u32) -> Option<Arc<Fb>> {
        if idp == IDP_SENTINEL {
            return None;
        }
        self.inner.read().by_idp.get(&idp).cloned()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Fb>> {
        let inner = self.inner.read();
        let idp = inner.names.lookup(name)?;
        inner.by_idp.get(&idp).cloned()
    }

    /// `RM`: unpublishes `name` if nothing beyond the table's own reference
    /// and this lookup holds a handle. Refuses with `Busy` if the strong
    /// count exceeds 2 (the current lookup holds one; the caller holds one):
    /// the clone taken for `lookup` plus the registry's own entry puts the
    /// baseline at 2, so anything higher means a third party (a binding, a
    /// subscriber) is still referencing it.
    pub fn remove(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let idp = inner.names.lookup(name).ok_or(EngineError::NotFound)?;
        let fb = inner.by_idp.get(&idp).cloned().ok_or(EngineError::NotFound)?;
        if Arc::strong_count(&fb) > 2 {
            return Err(EngineError::Busy);
        }
        inner.names.unregister(name);
        inner.by_idp.remove(&idp);
        fb.mark_exiting();
        // Freeing is deferred to the next grace-period collection so an
        // in-flight traversal that already resolved `idp` keeps a live
        // object; the id itself is not recycled back into the allocator,
        // trading id-space reuse for not needing a second deferred step.
        self.epoch.retire(move || {
            drop(fb);
        });
        Ok(())
    }

    /// `REPLACE`: `new_fb` takes over `old_name`'s identity outright -- the
    /// table slot at `old_name`'s IDP is repointed at `new_fb` *and*
    /// `new_fb`'s own `idp` field is reassigned to that same IDP, so a
    /// packet already carrying the old IDP in its next-hop slot resolves
    /// to the new FB without anyone rewriting in-flight packets, and
    /// `new_fb.idp()` itself now agrees with where it lives in the table.
    /// `new_fb` arrives already published under its own prior name (the
    /// dispatcher's `REPLACE name1 name2` looks `name2` up first), so that
    /// prior name/idp registration is retired here too -- leaving it in
    /// place would dual-register the same `Arc<Fb>` under two names and
    /// two table slots, inflating `Arc::strong_count` by one and making a
    /// later `RM` on either name spuriously report `Busy`.
    /// `original_source/src/xt_user.c`'s `#if 0`-gated REPLACE block shows
    /// the intended shape even disabled: `fb2->idp = fb1->idp` plus
    /// renaming, i.e. full identity takeover, not dual registration.
    /// In-flight lookups that already cloned the old `Arc` keep it alive
    /// until they finish; both retired handles' drops are deferred to the
    /// next `collect`.
    pub fn replace(&self, old_name: &str, new_fb: Arc<Fb>) -> EngineResult<()> {
        let mut inner = self.inner.write();
        let old_idp = inner.names.lookup(old_name).ok_or(EngineError::NotFound)?;
        let old_fb = inner.by_idp.get(&old_idp).cloned().ok_or(EngineError::NotFound)?;
        let new_idp = new_fb.idp();
        let new_name = new_fb.name.clone();

        old_fb.mark_exiting();
        new_fb.mark_registered();

        // Retire new_fb's own prior registration before repointing old_idp
        // at it, so the table never holds the same Arc under two keys.
        let stale_new_entry = if new_idp != old_idp {
            inner.names.unregister(&new_name);
            inner.by_idp.remove(&new_idp)
        } else {
            None
        };
        new_fb.set_idp(old_idp);
        inner.by_idp.insert(old_idp, new_fb);

        self.epoch.retire(move || {
            drop(old_fb);
            drop(stale_new_entry);
        });
        Ok(())
    }

    /// Runs a grace-period collection pass, freeing any retired FB whose
    /// readers have all moved on. Call this periodically (e.g. after a
    /// burst of control operations) from the control path.
    pub fn collect_garbage(&self) {
        self.epoch.collect();
    }

    /// `subscribe(source, sink)`.
    pub fn subscribe(&self, source: &str, sink: &str) -> EngineResult<()> {
        let source_fb = self.lookup_by_name(source).ok_or(EngineError::NotFound)?;
        let sink_fb = self.lookup_by_name(sink).ok_or(EngineError::NotFound)?;
        source_fb.subscribe(&sink_fb);
        Ok(())
    }

    pub fn unsubscribe(&self, source: &str, sink: &str) -> EngineResult<()> {
        let source_fb = self.lookup_by_name(source).ok_or(EngineError::NotFound)?;
        let sink_fb = self.lookup_by_name(sink).ok_or(EngineError::NotFound)?;
        source_fb.unsubscribe(&sink_fb);
        Ok(())
    }

    /// Applies a bind/unbind/set-opt event to `name`'s FB, then delivers
    /// the same event to its subscribers outside any registry lock.
    pub fn apply_event(&self, name: &str, event: Event) -> EngineResult<()> {
        let fb = self.lookup_by_name(name).ok_or(EngineError::NotFound)?;
        fb.handle_event(&event)?;
        fb.deliver_to_subscribers(&event);
        Ok(())
    }

    /// One `FbSnapshot` per published FB, as shown by `fbctl dump`. Port
    /// state is read from worker 0 — every worker converges to the same
    /// value under `handle_event`, so any one of them is representative.
    pub fn snapshot(&self) -> Vec<protocol::info::FbSnapshot> {
        let inner = self.inner.read();
        inner
            .by_idp
            .values()
            .map(|fb| protocol::info::FbSnapshot {
                name: fb.name.clone(),
                fb_type: fb.fb_type.clone(),
                idp: fb.idp(),
                refcount: Arc::strong_count(fb) as u32,
                ingress: non_sentinel(fb.read_port(0, Direction::Ingress)),
                egress: non_sentinel(fb.read_port(0, Direction::Egress)),
            })
            .collect()
    }
}

fn non_sentinel(idp: u32) -> Option<u32> {
    (idp != IDP_SENTINEL).then_some(idp)
}
