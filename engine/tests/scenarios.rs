//! Integration tests implementing the concrete scenarios named in the
//! engine's testable-properties list, run against a real `Context` with
//! its own worker threads -- no mocked scheduler or registry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine::binding::Event;
use engine::fb::{Fb, FunctionalBlock, RxOutcome, WorkerContext};
use engine::packet::{Direction, Packet};
use engine::{Command, Context, EngineConfig, EngineError};

fn settle() {
    std::thread::sleep(Duration::from_millis(80));
}

struct DropFb;
impl FunctionalBlock for DropFb {
    fn netfb_rx(&self, _fb: &Fb, _packet: Packet, _ctx: &mut dyn WorkerContext) -> RxOutcome {
        RxOutcome::Dropped
    }
}
fn drop_factory(_n: usize) -> engine::EngineResult<Box<dyn FunctionalBlock>> {
    Ok(Box::new(DropFb))
}

/// Passes through to whatever IDP it's told to via `set_opt("next", "<idp>")`.
struct ForwardFb {
    next: AtomicU32,
    hits: AtomicU32,
}
impl Default for ForwardFb {
    fn default() -> Self {
        ForwardFb {
            next: AtomicU32::new(0),
            hits: AtomicU32::new(0),
        }
    }
}
impl FunctionalBlock for ForwardFb {
    fn netfb_rx(&self, _fb: &Fb, mut packet: Packet, _ctx: &mut dyn WorkerContext) -> RxOutcome {
        self.hits.fetch_add(1, Ordering::SeqCst);
        packet.set_next_idp(self.next.load(Ordering::SeqCst));
        RxOutcome::Continue(packet)
    }
    fn set_opt(&self, _fb: &Fb, key: &str, value: &str) -> engine::EngineResult<()> {
        if key != "next" {
            return Err(EngineError::Invalid);
        }
        self.next.store(value.parse().map_err(|_| EngineError::Invalid)?, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn single_hop_drop_frees_the_packet_and_counts_it() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();

    ctx.dispatcher.handle(Command::Add { name: "a".into(), fb_type: "drop".into() }).unwrap();
    let a = ctx.registry.lookup_by_name("a").unwrap();

    assert!(ctx.submit(Packet::new(vec![0u8; 64], Direction::Ingress, a.idp())));
    settle();

    let stats = ctx.worker_stats();
    assert_eq!(stats[0].packets, 1, "one packet processed");
    assert_eq!(stats[0].bytes, 64, "64 bytes counted");
    assert_eq!(stats[0].drops, 1, "one drop counted");
}

#[test]
fn two_hop_pass_through_visits_both_fbs_and_succeeds() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher
        .register_factory("forward", |_n| Ok(Box::new(ForwardFb::default()) as Box<dyn FunctionalBlock>))
        .unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();

    ctx.dispatcher.handle(Command::Add { name: "a".into(), fb_type: "forward".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "b".into(), fb_type: "drop".into() }).unwrap();
    let a = ctx.registry.lookup_by_name("a").unwrap();
    let b = ctx.registry.lookup_by_name("b").unwrap();
    ctx.dispatcher
        .handle(Command::Set { name: "a".into(), key: "next".into(), value: b.idp().to_string() })
        .unwrap();

    assert!(ctx.submit(Packet::new(vec![1, 2, 3], Direction::Ingress, a.idp())));
    settle();

    let stats = ctx.worker_stats();
    assert_eq!(stats[0].packets, 1, "one packet completed the traversal");
    assert_eq!(stats[0].errors, 0, "no errors");
    assert_eq!(stats[0].drops, 1, "B drops it on arrival");
}

#[test]
fn tee_delivers_a_byte_identical_duplicate_without_double_freeing() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();

    ctx.dispatcher.handle(Command::Add { name: "b".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "c".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher
        .handle(Command::Add { name: "t".into(), fb_type: "tee".into() })
        .unwrap();
    let b = ctx.registry.lookup_by_name("b").unwrap();
    let c = ctx.registry.lookup_by_name("c").unwrap();
    let t = ctx.registry.lookup_by_name("t").unwrap();
    t.handle_event(&Event::Bind { direction: Direction::Ingress, idp: b.idp() }).unwrap();
    t.handle_event(&Event::Bind { direction: Direction::Ingress, idp: c.idp() }).unwrap();

    let payload = vec![9u8, 8, 7, 6, 5];
    assert!(ctx.submit(Packet::new(payload.clone(), Direction::Ingress, t.idp())));
    settle();

    // Both B and C received exactly one packet, and the engine-wide drop
    // count is two (one per sink) with no panics along the way -- the
    // backlog mechanism never re-entered `process_packet`.
    let stats = ctx.worker_stats();
    assert_eq!(stats[0].packets, 2, "two packets completed (original + clone)");
    assert_eq!(stats[0].drops, 2, "both sinks drop their copy");
}

#[test]
fn bind_race_never_observes_a_torn_or_freed_port_value() {
    let mut config = EngineConfig::default();
    config.workers = Some(8);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "x".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "old".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "new".into(), fb_type: "drop".into() }).unwrap();
    let x = ctx.registry.lookup_by_name("x").unwrap();
    let old_idp = ctx.registry.lookup_by_name("old").unwrap().idp();
    let new_idp = ctx.registry.lookup_by_name("new").unwrap().idp();

    let flipper = {
        let x = Arc::clone(&x);
        std::thread::spawn(move || {
            for i in 0..500 {
                let target = if i % 2 == 0 { old_idp } else { new_idp };
                x.handle_event(&Event::Bind { direction: Direction::Ingress, idp: target }).ok();
                x.handle_event(&Event::Unbind { direction: Direction::Ingress, idp: target }).ok();
            }
        })
    };

    let reader = {
        let x = Arc::clone(&x);
        std::thread::spawn(move || {
            for _ in 0..5000 {
                let value = x.read_port(0, Direction::Ingress);
                assert!(value == 0 || value == old_idp || value == new_idp, "saw a bogus port value {value}");
            }
        })
    };

    flipper.join().unwrap();
    reader.join().unwrap();
}

/// Increments a process-wide counter when the behavior itself is dropped,
/// so the test can observe the moment the replaced-out FB is actually
/// freed rather than merely unreachable. A plain `fn` factory (like
/// `LinkLayerFb`'s) rather than a capturing closure, since `Factory` is a
/// bare function pointer -- a faithful match for the type-table-of-
/// constructors the original builds, not a stateful closure registry.
static COUNTING_DROP_FREED: AtomicU32 = AtomicU32::new(0);

struct CountingDropFb;
impl FunctionalBlock for CountingDropFb {
    fn netfb_rx(&self, _fb: &Fb, _packet: Packet, _ctx: &mut dyn WorkerContext) -> RxOutcome {
        RxOutcome::Dropped
    }
}
impl Drop for CountingDropFb {
    fn drop(&mut self) {
        COUNTING_DROP_FREED.fetch_add(1, Ordering::SeqCst);
    }
}
fn counting_drop_factory(_n: usize) -> engine::EngineResult<Box<dyn FunctionalBlock>> {
    Ok(Box::new(CountingDropFb))
}

#[test]
fn replace_keeps_in_flight_traversals_on_a_live_object_and_frees_the_old_one_afterward() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("counting-drop", counting_drop_factory).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();

    ctx.dispatcher.handle(Command::Add { name: "v1".into(), fb_type: "counting-drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "u".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Bind { name1: "v1".into(), name2: "u".into() }).unwrap();
    let v1_idp = ctx.registry.lookup_by_name("v1").unwrap().idp();
    let before = COUNTING_DROP_FREED.load(Ordering::SeqCst);

    ctx.dispatcher.handle(Command::Add { name: "v2".into(), fb_type: "counting-drop".into() }).unwrap();
    ctx.dispatcher
        .handle(Command::Replace { name1: "v1".into(), name2: "v2".into(), drop_priv: false })
        .unwrap();

    // Old traffic still carrying v1's idp resolves to a live object (now v2).
    let resolved = ctx.registry.lookup_by_idp(v1_idp).expect("old idp still routes somewhere live");
    assert_eq!(resolved.name, "v2");
    assert_eq!(COUNTING_DROP_FREED.load(Ordering::SeqCst), before, "v1 must not be freed while still reachable");
    drop(resolved);

    ctx.collect_garbage();
    settle();
    assert_eq!(COUNTING_DROP_FREED.load(Ordering::SeqCst), before + 1, "v1 is freed once the grace period passes");
}

#[test]
fn rm_after_replace_never_reports_busy_for_the_replacements_own_former_name() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();

    ctx.dispatcher.handle(Command::Add { name: "v1".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "v2".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher
        .handle(Command::Replace { name1: "v1".into(), name2: "v2".into(), drop_priv: true })
        .unwrap();

    // v2 is not left dual-registered under both its own former name and
    // v1's: it fully took over v1's identity, so nothing external holds a
    // reference and RM under either name must never spuriously be Busy.
    assert_eq!(ctx.dispatcher.handle(Command::Rm { name: "v2".into() }), Err(EngineError::NotFound));
    ctx.dispatcher.handle(Command::Rm { name: "v1".into() }).unwrap();
    assert!(ctx.registry.lookup_by_name("v1").is_none());
}

#[test]
fn remove_while_bound_is_busy_and_leaves_the_fb_published() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();

    ctx.dispatcher.handle(Command::Add { name: "a".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "b".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Bind { name1: "a".into(), name2: "b".into() }).unwrap();

    // `b` now holds `a`'s idp bound into its egress port; the bind itself
    // doesn't pin an `Arc`, so force external pressure with a held lookup,
    // matching the scenario's "refcount > 2" setup directly.
    let _held = ctx.registry.lookup_by_name("a").unwrap();
    assert_eq!(ctx.dispatcher.handle(Command::Rm { name: "a".into() }), Err(EngineError::Busy));
    assert!(ctx.registry.lookup_by_name("a").is_some());
}

/// BIND-then-UNBIND round trip restores the sentinel (universal property).
#[test]
fn bind_then_unbind_restores_sentinel_through_the_dispatcher() {
    let mut config = EngineConfig::default();
    config.workers = Some(1);
    let ctx = Context::start(config).unwrap();
    ctx.dispatcher.register_factory("drop", drop_factory).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "a".into(), fb_type: "drop".into() }).unwrap();
    ctx.dispatcher.handle(Command::Add { name: "b".into(), fb_type: "drop".into() }).unwrap();

    ctx.dispatcher.handle(Command::Bind { name1: "a".into(), name2: "b".into() }).unwrap();
    ctx.dispatcher.handle(Command::Unbind { name1: "a".into(), name2: "b".into() }).unwrap();

    let a = ctx.registry.lookup_by_name("a").unwrap();
    let b = ctx.registry.lookup_by_name("b").unwrap();
    assert_eq!(a.read_port(0, Direction::Ingress), engine::packet::IDP_SENTINEL);
    assert_eq!(b.read_port(0, Direction::Egress), engine::packet::IDP_SENTINEL);
}

