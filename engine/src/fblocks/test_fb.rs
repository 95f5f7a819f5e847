//! Dummy capture FB used as a traffic sink in integration tests.
//!
//! Grounded on `original_source/src/fb_test.c`'s `fb_test_netrx`, which
//! just logs "Got skb!" and returns — here it records the packet instead of
//! printing, so tests can assert on what actually arrived.

use parking_lot::Mutex;

use crate::error::EngineResult;
use crate::fb::{Fb, FunctionalBlock, RxOutcome, WorkerContext};
use crate::packet::Packet;

#[derive(Default)]
pub struct TestFb {
    captured: Mutex<Vec<Vec<u8>>>,
}

impl TestFb {
    pub fn factory(_worker_count: usize) -> EngineResult<Box<dyn FunctionalBlock>> {
        Ok(Box::new(TestFb::default()))
    }

    pub fn take_captured(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.captured.lock())
    }

    pub fn captured_count(&self) -> usize {
        self.captured.lock().len()
    }
}

impl FunctionalBlock for TestFb {
    fn netfb_rx(&self, _fb: &Fb, packet: Packet, _ctx: &mut dyn WorkerContext) -> RxOutcome {
        self.captured.lock().push(packet.payload);
        RxOutcome::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Direction;
    use crate::registry::Registry;
    use rt::Epoch;
    use std::sync::Arc;

    struct Ctx<'a>(&'a mut std::collections::VecDeque<Packet>);
    impl WorkerContext for Ctx<'_> {
        fn worker_id(&self) -> usize {
            0
        }
        fn push_backlog(&mut self, packet: Packet) {
            self.0.push_back(packet);
        }
    }

    #[test]
    fn captures_every_delivered_packet_in_arrival_order() {
        // The trait method doesn't use `fb`, so any published FB will do as
        // the required reference -- what's under test is `TestFb` itself,
        // kept outside the registry so the test can read its state back.
        let registry = Registry::new(Arc::new(Epoch::new()));
        let placeholder = registry.init_fb("anchor", "test", 1, TestFb::factory(1).unwrap()).unwrap();
        registry.publish(placeholder.clone()).unwrap();

        let sink = TestFb::default();
        let mut backlog = std::collections::VecDeque::new();
        let mut ctx = Ctx(&mut backlog);

        sink.netfb_rx(&placeholder, Packet::new(vec![1], Direction::Ingress, 0), &mut ctx);
        sink.netfb_rx(&placeholder, Packet::new(vec![2], Direction::Ingress, 0), &mut ctx);

        assert_eq!(sink.take_captured(), vec![vec![1], vec![2]]);
        assert_eq!(sink.captured_count(), 0);
    }
}
