//! Link-layer source FB: the entry and exit point to the OS network stack.
//!
//! Grounded on `original_source/src/fb_eth.c`. The original hooks an OS rx
//! handler per device and a notifier for BIND/UNBIND; the OS hook itself
//! (`fb_eth_handle_frame`) is a specific link-layer adapter out of scope
//! here — what's in scope is the contract between that hook and the
//! engine: stamp the frame with its own idp as source and the bound
//! ingress IDP as next hop, matching `write_next_idp_to_skb(skb, fb->idp,
//! next_idp)`, and hand it to the worker loop, and on the way out, hand the frame back
//! to the OS and tell the engine the packet is no longer its concern.
//! `fbengined` plays the role of "the OS": `ingest` stands in for the rx
//! handler, and `take_transmitted` stands in for the OS transmit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::fb::{Fb, FunctionalBlock, RxOutcome, WorkerContext};
use crate::packet::{Direction, Packet};

static INSTANTIATED: AtomicBool = AtomicBool::new(false);

/// At most one instance may exist at a time, enforced here with a
/// process-wide flag rather than in the registry, since "singleton" is a
/// property of this FB type, not of FBs in general.
pub struct LinkLayerFb {
    /// Frames the egress path has handed to "the OS"; `fbengined` drains
    /// this to actually deliver them (there being no real NIC here).
    transmitted: Mutex<Vec<Vec<u8>>>,
}

impl LinkLayerFb {
    pub fn factory(_worker_count: usize) -> EngineResult<Box<dyn FunctionalBlock>> {
        if INSTANTIATED.swap(true, Ordering::AcqRel) {
            return Err(EngineError::InUse);
        }
        Ok(Box::new(LinkLayerFb {
            transmitted: Mutex::new(Vec::new()),
        }))
    }

    /// Stands in for the OS rx handler: stamps `payload` with the bound
    /// ingress next-hop and hands back a packet ready to enqueue, or
    /// `None` if nothing is bound on ingress yet (frame is dropped, as the
    /// original does for an unbound port).
    pub fn ingest(fb: &Fb, worker: usize, payload: Vec<u8>) -> Option<Packet> {
        let next_idp = fb.read_port(worker, Direction::Ingress);
        if next_idp == crate::idp::IDP_SENTINEL {
            return None;
        }
        let mut packet = Packet::new(payload, Direction::Ingress, next_idp);
        packet.stamp_source(fb.idp());
        Some(packet)
    }

    /// Drains frames queued for OS transmit by `netfb_rx`.
    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.transmitted.lock().unwrap())
    }
}

impl Drop for LinkLayerFb {
    fn drop(&mut self) {
        INSTANTIATED.store(false, Ordering::Release);
    }
}

impl FunctionalBlock for LinkLayerFb {
    fn netfb_rx(&self, _fb: &Fb, packet: Packet, _ctx: &mut dyn WorkerContext) -> RxOutcome {
        // Egress: hand the frame to "the OS" and release the engine's
        // interest in it, exactly as `fb_eth_netrx` returns `PPE_DROPPED`
        // after `dev_queue_xmit`.
        self.transmitted.lock().unwrap().push(packet.payload);
        RxOutcome::Dropped
    }
}
