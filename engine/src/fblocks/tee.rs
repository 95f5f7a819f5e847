//! Tee FB: duplicates traffic onto a second, independently bound port.
//!
//! Grounded on `original_source/src/fb_tee.c`'s `fb_tee_netrx` (read the
//! primary and clone ports under their seqlocks, `skb_clone` onto the clone
//! port's IDP if bound, rewrite the original's next hop to the primary).
//! Here the clone doesn't recurse into `process_packet` — it's pushed onto
//! the calling worker's backlog (`WorkerContext::push_backlog`) and drained
//! by the outer loop once the original finishes, keeping tee chains from
//! blowing the call stack.

use crate::error::EngineResult;
use crate::fb::{Fb, FunctionalBlock, RxOutcome, WorkerContext};
use crate::idp::IDP_SENTINEL;
use crate::packet::Packet;

pub struct TeeFb;

impl TeeFb {
    pub fn factory(_worker_count: usize) -> EngineResult<Box<dyn FunctionalBlock>> {
        Ok(Box::new(TeeFb))
    }
}

impl FunctionalBlock for TeeFb {
    fn has_secondary_port(&self) -> bool {
        true
    }

    fn netfb_rx(&self, fb: &Fb, mut packet: Packet, ctx: &mut dyn WorkerContext) -> RxOutcome {
        let worker = ctx.worker_id();
        let direction = packet.direction;
        let primary = fb.read_port(worker, direction);
        let clone_idp = fb.ports()[worker].read_clone();

        if clone_idp != IDP_SENTINEL {
            let mut clone = Packet::new(packet.payload.clone(), direction, clone_idp);
            clone.first_mark = packet.first_mark;
            clone.source_idp = packet.source_idp;
            ctx.push_backlog(clone);
        }

        if primary == IDP_SENTINEL {
            return RxOutcome::Dropped;
        }
        packet.set_next_idp(primary);
        RxOutcome::Continue(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Event;
    use crate::packet::Direction;
    use crate::registry::Registry;
    use rt::Epoch;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct TestCtx<'a> {
        worker_id: usize,
        backlog: &'a mut VecDeque<Packet>,
    }
    impl WorkerContext for TestCtx<'_> {
        fn worker_id(&self) -> usize {
            self.worker_id
        }
        fn push_backlog(&mut self, packet: Packet) {
            self.backlog.push_back(packet);
        }
    }

    fn registry_with_tee() -> (Registry, Arc<Fb>) {
        let registry = Registry::new(Arc::new(Epoch::new()));
        let fb = registry.init_fb("tee0", "tee", 1, TeeFb::factory(1).unwrap()).unwrap();
        (registry, fb)
    }

    #[test]
    fn clone_port_unset_only_forwards_to_primary() {
        let (_registry, fb) = registry_with_tee();
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: 55 }).unwrap();

        let mut backlog = VecDeque::new();
        let mut ctx = TestCtx { worker_id: 0, backlog: &mut backlog };
        let packet = Packet::new(vec![1, 2, 3], Direction::Ingress, 999);
        match fb.netfb_rx(packet, &mut ctx) {
            RxOutcome::Continue(p) => assert_eq!(p.peek_next_idp(), 55),
            _ => panic!("expected Continue"),
        }
        assert!(backlog.is_empty());
    }

    #[test]
    fn bound_clone_port_produces_a_byte_identical_duplicate_on_the_backlog() {
        let (_registry, fb) = registry_with_tee();
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: 55 }).unwrap();
        // Second bind on the same (direction, port-set) falls into the clone slot.
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: 77 }).unwrap();

        let mut backlog = VecDeque::new();
        let mut ctx = TestCtx { worker_id: 0, backlog: &mut backlog };
        let payload = vec![9, 8, 7, 6];
        let packet = Packet::new(payload.clone(), Direction::Ingress, 999);
        match fb.netfb_rx(packet, &mut ctx) {
            RxOutcome::Continue(p) => {
                assert_eq!(p.peek_next_idp(), 55);
                assert_eq!(p.payload, payload);
            }
            _ => panic!("expected Continue"),
        }

        let cloned = backlog.pop_front().expect("clone was queued");
        assert_eq!(cloned.payload, payload);
        assert_eq!(cloned.peek_next_idp(), 77);
        assert!(backlog.is_empty());
    }

    #[test]
    fn unbound_primary_drops_but_still_queues_the_clone() {
        let (_registry, fb) = registry_with_tee();
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: IDP_SENTINEL }).unwrap_err();
        // Bind only the clone slot directly via two binds where the first is
        // immediately unbound, leaving the primary sentinel and the clone set.
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: 1 }).unwrap();
        fb.handle_event(&Event::Unbind { direction: Direction::Ingress, idp: 1 }).unwrap();
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: 1 }).unwrap();
        fb.handle_event(&Event::Bind { direction: Direction::Ingress, idp: 42 }).unwrap();
        fb.handle_event(&Event::Unbind { direction: Direction::Ingress, idp: 1 }).unwrap();

        let mut backlog = VecDeque::new();
        let mut ctx = TestCtx { worker_id: 0, backlog: &mut backlog };
        let packet = Packet::new(vec![0], Direction::Ingress, 999);
        match fb.netfb_rx(packet, &mut ctx) {
            RxOutcome::Dropped => {}
            _ => panic!("expected Dropped"),
        }
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].peek_next_idp(), 42);
    }
}
