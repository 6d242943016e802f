//! End-to-end scenarios from spec §8.

mod support;

use std::sync::Arc;
use std::time::Duration;

use corelib::{HashRing, Node, NodeId};
use ownership::{CoordinatorConfig, Key, Recover, Release};
use support::InMemoryBackend;

fn recover_always_true() -> Arc<dyn Recover> {
    Arc::new(|_key: Key| async move { Ok(true) })
}

fn release_noop() -> Arc<dyn Release> {
    Arc::new(|_key: Key| async move { Ok(()) })
}

#[tokio::test]
async fn store_failure_on_capture_is_transient_and_self_heals() {
    // Scenario 5: a failed `add_key` inside the lookup interceptor must
    // not affect the synchronous `lookup` result, and a later lookup of
    // the same key must still succeed in persisting it.
    let ring = Arc::new(HashRing::with_identity(NodeId(1)));
    ring.add_node(Node::new(NodeId(1), "a"), 16);
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_next_add();

    let coordinator = ownership::Coordinator::new(
        ring,
        backend.clone(),
        recover_always_true(),
        release_noop(),
        CoordinatorConfig {
            total_vnodes: 4,
            ..Default::default()
        },
    )
    .unwrap();

    let node = coordinator.lookup(b"k1");
    assert_eq!(node, Some(NodeId(1)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let vnode = ownership::vnode_for_key(b"k1", 4);
    assert!(!backend.snapshot(vnode).contains(&b"k1".to_vec()));

    // Retry: same key, same process, should now persist cleanly.
    let node = coordinator.lookup(b"k1");
    assert_eq!(node, Some(NodeId(1)));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(backend.snapshot(vnode).contains(&b"k1".to_vec()));
}

#[tokio::test]
async fn debounce_fires_once_after_a_burst_quiesces() {
    // Scenario 4: five changed events within 100ms, calm_threshold=500,
    // exactly one reconciliation fan-out fires.
    let ring = Arc::new(HashRing::with_identity(NodeId(1)));
    ring.add_node(Node::new(NodeId(1), "a"), 16);
    let backend = Arc::new(InMemoryBackend::new());

    let coordinator = ownership::Coordinator::new(
        ring.clone(),
        backend,
        recover_always_true(),
        release_noop(),
        CoordinatorConfig {
            total_vnodes: 4,
            calm_threshold_ms: 200,
            ..Default::default()
        },
    )
    .unwrap();
    coordinator.run();
    ring.mark_ready();
    // Let the run loop's background task observe `ready` and subscribe to
    // `changed` before the burst starts, so no event in the burst is lost.
    tokio::time::sleep(Duration::from_millis(20)).await;

    for _ in 0..5 {
        ring.add_node(Node::new(NodeId(99), "flap"), 1);
        ring.remove_node(&NodeId(99));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Burst spans ~100ms; nothing should have fired yet at 150ms (< 200ms
    // calm threshold after the last event).
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(coordinator.owned_vnodes().len(), 0, "no recover calls expected yet");

    // Once the calm threshold elapses, exactly one reconciliation should
    // have run (there were no vnodes to actually recover here, so we
    // assert indirectly: ownership was computed, i.e. is non-empty now
    // that this process is still sole owner across all vnodes).
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(coordinator.owned_vnodes().len(), 4);

    coordinator.shutdown();
}

#[tokio::test]
async fn cache_eviction_follows_release() {
    // Scenario 6: after a vnode transitions from owned to not-owned and
    // its keys are released, the cache entry is dropped.
    let ring = Arc::new(HashRing::with_identity(NodeId(1)));
    ring.add_node(Node::new(NodeId(1), "a"), 16);
    let backend = Arc::new(InMemoryBackend::new());

    let coordinator = ownership::Coordinator::new(
        ring.clone(),
        backend.clone(),
        recover_always_true(),
        release_noop(),
        CoordinatorConfig {
            total_vnodes: 4,
            calm_threshold_ms: 50,
            ..Default::default()
        },
    )
    .unwrap();

    coordinator.lookup(b"k1");
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.run();
    ring.mark_ready();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A no-op membership event (0 vnodes) still fires `changed` and
    // drives the first reconciliation, establishing the initial owned set.
    ring.add_node(Node::new(NodeId(100), "nop"), 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(coordinator.owned_vnodes().len(), 4);

    // Node 1 now loses every vnode to a new arrival with overwhelming
    // vnode share; this process's ring view shows it owns nothing.
    ring.add_node(Node::new(NodeId(2), "b"), 4096);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(coordinator.owned_vnodes().len() < 4);
    coordinator.shutdown();
}
