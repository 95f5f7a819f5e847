//! Per-port binding state and the events that mutate it.
//!
//! Grounded on `original_source/src/fb_eth.c`'s `fb_eth_event` (BIND/UNBIND
//! handling over `for_each_online_cpu`, each CPU's port guarded by its own
//! seqlock) and `fb_tee.c` (the extra `port_clone` secondary port). BIND
//! and UNBIND on a single FB are serialized by the control lock across
//! every per-CPU instance so all CPUs converge on the same
//! value; the seqlock only protects a fast-path *reader* against a
//! mid-flight write, not writers against each other.

use rt::SeqLock;

use crate::error::{EngineError, EngineResult};
use crate::packet::{Direction, IDP_SENTINEL};

/// One worker's view of an FB's ports: the ingress/egress next-hop pair
/// plus an optional secondary ("clone") port for multi-port FBs like tee.
pub struct PortSet {
    port: [SeqLock<u32>; 2],
    port_clone: SeqLock<u32>,
}

impl PortSet {
    pub fn new() -> Self {
        PortSet {
            port: [SeqLock::new(IDP_SENTINEL), SeqLock::new(IDP_SENTINEL)],
            port_clone: SeqLock::new(IDP_SENTINEL),
        }
    }

    pub fn read(&self, dir: Direction) -> u32 {
        self.port[dir.index()].read()
    }

    pub fn read_clone(&self) -> u32 {
        self.port_clone.read()
    }

    /// Overwrites a port unconditionally, bypassing the "only if sentinel"
    /// negotiation `bind` does. Used only for REPLACE's `drop_priv`-gated
    /// private-state copy, never from the control dispatcher's BIND path.
    pub fn force_write(&self, dir: Direction, idp: u32) {
        self.port[dir.index()].write(idp);
    }

    pub fn force_write_clone(&self, idp: u32) {
        self.port_clone.write(idp);
    }

    /// Binds `idp` to `dir` if that port is currently the sentinel. When
    /// `allow_clone_fallback` is set (FB types with a genuine secondary
    /// port, e.g. tee), falls back to the clone port if the primary is
    /// taken but the clone is free; other FB types get `Invalid` ("BAD")
    /// straight away, matching `fb_eth.c`'s non-tee BIND handler.
    pub fn bind(&self, dir: Direction, idp: u32, allow_clone_fallback: bool) -> EngineResult<()> {
        if self.port[dir.index()].read() == IDP_SENTINEL {
            self.port[dir.index()].write(idp);
            return Ok(());
        }
        if allow_clone_fallback && self.port_clone.read() == IDP_SENTINEL {
            self.port_clone.write(idp);
            return Ok(());
        }
        Err(EngineError::Invalid)
    }

    /// Unbinds `idp` from `dir` only if it is the exact value currently
    /// bound there (checking the clone port too), restoring the sentinel.
    pub fn unbind(&self, dir: Direction, idp: u32) -> EngineResult<()> {
        if self.port[dir.index()].read() == idp {
            self.port[dir.index()].write(IDP_SENTINEL);
            return Ok(());
        }
        if self.port_clone.read() == idp {
            self.port_clone.write(IDP_SENTINEL);
            return Ok(());
        }
        Err(EngineError::Invalid)
    }
}

impl Default for PortSet {
    fn default() -> Self {
        PortSet::new()
    }
}

/// The three control-path event kinds: port (re)binding and option changes.
#[derive(Clone, Debug)]
pub enum Event {
    Bind { direction: Direction, idp: u32 },
    Unbind { direction: Direction, idp: u32 },
    SetOpt { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_unbind_restores_sentinel() {
        let ports = PortSet::new();
        ports.bind(Direction::Ingress, 7, false).unwrap();
        assert_eq!(ports.read(Direction::Ingress), 7);
        ports.unbind(Direction::Ingress, 7).unwrap();
        assert_eq!(ports.read(Direction::Ingress), IDP_SENTINEL);
    }

    #[test]
    fn bind_without_secondary_port_rejects_an_already_bound_primary_outright() {
        // Matches `fb_eth.c`'s non-tee BIND handler: no clone fallback at
        // all, so a second bind on an occupied port is BAD immediately.
        let ports = PortSet::new();
        ports.bind(Direction::Ingress, 7, false).unwrap();
        assert_eq!(ports.bind(Direction::Ingress, 8, false), Err(EngineError::Invalid));
        assert_eq!(ports.read_clone(), IDP_SENTINEL);
    }

    #[test]
    fn bind_with_secondary_port_falls_back_to_the_clone_slot() {
        let ports = PortSet::new();
        ports.bind(Direction::Ingress, 7, true).unwrap();
        ports.bind(Direction::Ingress, 8, true).unwrap();
        assert_eq!(ports.read_clone(), 8);
        // Both primary and clone are now occupied -- a third bind is BAD
        // even with the fallback allowed.
        assert_eq!(ports.bind(Direction::Ingress, 9, true), Err(EngineError::Invalid));
    }

    #[test]
    fn unbind_rejects_mismatched_idp() {
        let ports = PortSet::new();
        ports.bind(Direction::Egress, 5, false).unwrap();
        assert_eq!(ports.unbind(Direction::Egress, 6), Err(EngineError::Invalid));
        assert_eq!(ports.read(Direction::Egress), 5);
    }
}
