//! Debounced diff reconciliation (spec §4.4, §4.7).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corelib::Ring as RingCapability;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::hash::VNodeId;
use crate::store::{CacheStore, Key, PersistenceBackend};
use crate::tracker::compute_owned_vnodes;

/// Host callback invoked when this process takes over a vnode's key.
/// `true` means the key was durably handled and may be removed from the
/// persisted index; `false` (or an error, which is logged and treated as
/// `false`) leaves it for the next reconciliation to retry.
#[async_trait]
pub trait Recover: Send + Sync + 'static {
    async fn recover(&self, key: &Key) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Host callback invoked when this process gives up a vnode's key. Errors
/// are logged and swallowed; the key is never removed here — the new
/// owner's `recover` path is authoritative for that.
#[async_trait]
pub trait Release: Send + Sync + 'static {
    async fn release(&self, key: &Key) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl<F, Fut> Recover for F
where
    F: Fn(Key) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<bool, Box<dyn std::error::Error + Send + Sync>>>
        + Send
        + 'static,
{
    async fn recover(&self, key: &Key) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        (self)(key.clone()).await
    }
}

#[async_trait]
impl<F, Fut> Release for F
where
    F: Fn(Key) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>
        + Send
        + 'static,
{
    async fn release(&self, key: &Key) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self)(key.clone()).await
    }
}

/// `Idle | Debouncing | Reconciling`, per spec §4.7. Tracked only for
/// observability (tests, metrics) — the actual debounce/fan-out logic is
/// driven by the generation counter below, not by matching on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Debouncing,
    Reconciling,
}

struct Shared<R, B>
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    ring: Arc<R>,
    store: Arc<CacheStore<B>>,
    recover: Arc<dyn Recover>,
    release: Arc<dyn Release>,
    total_vnodes: u32,
    max_parallel_tasks: usize,
    owned: Mutex<BTreeSet<VNodeId>>,
    generation: std::sync::atomic::AtomicU64,
    state: Mutex<ReconcilerState>,
    /// Serializes `execute()` invocations: spec §5 "the reconciler runs
    /// at most one fan-out at a time per process". A generation whose
    /// debounce timer fires while a prior fan-out is still running waits
    /// here rather than launching a second concurrent fan-out, so it
    /// always samples `owned`/the ring fresh, after the prior one committed.
    execution_lock: tokio::sync::Mutex<()>,
}

/// Drives reconciliation for one process. Construct once per
/// [`crate::Coordinator`]; `on_ring_changed` is called from the ring's
/// `changed` subscription loop.
pub struct Reconciler<R, B>
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    shared: Arc<Shared<R, B>>,
}

impl<R, B> Clone for Reconciler<R, B>
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R, B> Reconciler<R, B>
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    pub fn new(
        ring: Arc<R>,
        store: Arc<CacheStore<B>>,
        recover: Arc<dyn Recover>,
        release: Arc<dyn Release>,
        total_vnodes: u32,
        max_parallel_tasks: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ring,
                store,
                recover,
                release,
                total_vnodes,
                max_parallel_tasks,
                owned: Mutex::new(BTreeSet::new()),
                generation: std::sync::atomic::AtomicU64::new(0),
                state: Mutex::new(ReconcilerState::Idle),
                execution_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The set of vnodes this process owned as of the most recently
    /// *completed* reconciliation (spec §3: "derived, never stored... not
    /// the instantaneous ring state").
    pub fn owned_vnodes(&self) -> BTreeSet<VNodeId> {
        self.shared.owned.lock().clone()
    }

    pub fn state(&self) -> ReconcilerState {
        *self.shared.state.lock()
    }

    /// Cancel any pending calm-timer and schedule a fresh one
    /// `calm_threshold` out. Call this from the ring's `changed` event
    /// loop. Debouncing is implemented with a monotonic generation counter
    /// rather than an explicit timer handle: bumping the generation makes
    /// any in-flight sleep that wakes up with a stale generation a no-op,
    /// which gives "cancel and restart" without needing cancellation
    /// plumbing, and naturally allows `Reconciling + Debouncing`
    /// concurrently (spec §4.7) since the in-flight fan-out doesn't hold
    /// the generation it was launched under.
    pub fn on_ring_changed(&self, calm_threshold: Duration) {
        use std::sync::atomic::Ordering;

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.shared.state.lock();
            if *state != ReconcilerState::Reconciling {
                *state = ReconcilerState::Debouncing;
            }
        }
        tracing::debug!(generation, "ring changed, (re)starting calm timer");

        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(calm_threshold).await;
            if shared.generation.load(Ordering::SeqCst) != generation {
                // Superseded by a later change; let that one fire instead.
                return;
            }
            execute(shared).await;
        });
    }
}

async fn execute<R, B>(shared: Arc<Shared<R, B>>)
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    // Only one fan-out runs at a time per process (spec §5). A generation
    // whose timer fires while an earlier one's fan-out is still in flight
    // blocks here until that fan-out completes and commits `owned`, then
    // proceeds with a fresh snapshot rather than racing it.
    let _guard = shared.execution_lock.lock().await;

    {
        let mut state = shared.state.lock();
        *state = ReconcilerState::Reconciling;
    }

    let old_owned = shared.owned.lock().clone();
    let new_owned = compute_owned_vnodes(shared.ring.as_ref(), shared.total_vnodes);

    let to_release: Vec<VNodeId> = old_owned.difference(&new_owned).copied().collect();
    let to_recover: Vec<VNodeId> = new_owned.difference(&old_owned).copied().collect();

    tracing::info_span!(
        "reconcile",
        released = to_release.len(),
        recovered = to_recover.len()
    )
    .in_scope(|| {
        tracing::info!("reconciliation starting");
    });

    let semaphore = Arc::new(Semaphore::new(shared.max_parallel_tasks.max(1)));

    let release_fut = fan_out_release(shared.clone(), to_release.clone(), semaphore.clone());
    let recover_fut = fan_out_recover(shared.clone(), to_recover.clone(), semaphore);
    tokio::join!(release_fut, recover_fut);

    for vnode in &to_release {
        shared.store.release_from_cache(*vnode);
    }

    *shared.owned.lock() = new_owned;

    let mut state = shared.state.lock();
    // A ring change that arrived mid-fan-out already flipped this back to
    // Debouncing (and armed its own timer); only drop to Idle if nothing
    // else is pending.
    if *state == ReconcilerState::Reconciling {
        *state = ReconcilerState::Idle;
    }
}

async fn fan_out_release<R, B>(shared: Arc<Shared<R, B>>, vnodes: Vec<VNodeId>, sem: Arc<Semaphore>)
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    let mut tasks = Vec::new();
    for vnode in vnodes {
        let shared = shared.clone();
        let sem = sem.clone();
        tasks.push(tokio::spawn(async move {
            let keys = {
                let _permit = sem.acquire().await.expect("semaphore not closed");
                match shared.store.load_keys(vnode).await {
                    Ok(keys) => keys,
                    Err(err) => {
                        tracing::warn!(vnode, error = %err, "transient store error loading keys for release");
                        return;
                    }
                }
            };

            let mut key_tasks = Vec::new();
            for key in keys {
                let shared = shared.clone();
                let sem = sem.clone();
                key_tasks.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore not closed");
                    if let Err(err) = shared.release.release(&key).await {
                        tracing::warn!(
                            vnode,
                            key = %String::from_utf8_lossy(&key),
                            error = %err,
                            "host release callback failed"
                        );
                    }
                }));
            }
            for t in key_tasks {
                let _ = t.await;
            }
        }));
    }
    for t in tasks {
        let _ = t.await;
    }
}

async fn fan_out_recover<R, B>(shared: Arc<Shared<R, B>>, vnodes: Vec<VNodeId>, sem: Arc<Semaphore>)
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    let mut tasks = Vec::new();
    for vnode in vnodes {
        let shared = shared.clone();
        let sem = sem.clone();
        tasks.push(tokio::spawn(async move {
            let keys = {
                let _permit = sem.acquire().await.expect("semaphore not closed");
                match shared.store.load_keys(vnode).await {
                    Ok(keys) => keys,
                    Err(err) => {
                        tracing::warn!(vnode, error = %err, "transient store error loading keys for recovery");
                        return;
                    }
                }
            };

            let mut key_tasks = Vec::new();
            for key in keys {
                let shared = shared.clone();
                let sem = sem.clone();
                key_tasks.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore not closed");
                    let handled = match shared.recover.recover(&key).await {
                        Ok(handled) => handled,
                        Err(err) => {
                            tracing::warn!(
                                vnode,
                                key = %String::from_utf8_lossy(&key),
                                error = %err,
                                "host recover callback failed"
                            );
                            false
                        }
                    };
                    if handled {
                        if let Err(err) = shared.store.remove_key(vnode, key.clone()).await {
                            tracing::warn!(
                                vnode,
                                key = %String::from_utf8_lossy(&key),
                                error = %err,
                                "transient store error removing recovered key"
                            );
                        }
                    }
                }));
            }
            for t in key_tasks {
                let _ = t.await;
            }
        }));
    }
    for t in tasks {
        let _ = t.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::InMemoryBackend;
    use corelib::{HashRing, Node, NodeId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRecover {
        handled: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Recover for CountingRecover {
        async fn recover(
            &self,
            _key: &Key,
        ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.handled)
        }
    }

    struct CountingRelease {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Release for CountingRelease {
        async fn release(&self, _key: &Key) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn recover_removes_key_when_handled() {
        let ring = Arc::new(HashRing::with_identity(NodeId(1)));
        ring.add_node(Node::new(NodeId(1), "a"), 16);
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend));
        store.add_key(0, b"k1".to_vec()).await.unwrap();

        let recover_calls = Arc::new(AtomicUsize::new(0));
        let release_calls = Arc::new(AtomicUsize::new(0));
        let recon = Reconciler::new(
            ring,
            store.clone(),
            Arc::new(CountingRecover {
                handled: true,
                calls: recover_calls.clone(),
            }),
            Arc::new(CountingRelease {
                calls: release_calls.clone(),
            }),
            4,
            10,
        );

        execute(recon.shared.clone()).await;

        assert_eq!(recover_calls.load(Ordering::SeqCst), 1);
        assert_eq!(release_calls.load(Ordering::SeqCst), 0);
        assert!(recon.owned_vnodes().contains(&0));
        let keys = store.load_keys(0).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn recover_refusal_keeps_key() {
        let ring = Arc::new(HashRing::with_identity(NodeId(1)));
        ring.add_node(Node::new(NodeId(1), "a"), 16);
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend));
        store.add_key(0, b"k1".to_vec()).await.unwrap();

        let recover_calls = Arc::new(AtomicUsize::new(0));
        let release_calls = Arc::new(AtomicUsize::new(0));
        let recon = Reconciler::new(
            ring,
            store.clone(),
            Arc::new(CountingRecover {
                handled: false,
                calls: recover_calls.clone(),
            }),
            Arc::new(CountingRelease {
                calls: release_calls.clone(),
            }),
            4,
            10,
        );

        execute(recon.shared.clone()).await;

        let keys = store.load_keys(0).await.unwrap();
        assert!(keys.contains(&b"k1".to_vec()));
    }

    #[tokio::test]
    async fn release_does_not_remove_key_and_evicts_cache() {
        let ring = Arc::new(HashRing::with_identity(NodeId(1)));
        // No nodes at all -> this process owns nothing, so a previously
        // owned vnode is released.
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend));
        store.add_key(2, b"k2".to_vec()).await.unwrap();

        let recover_calls = Arc::new(AtomicUsize::new(0));
        let release_calls = Arc::new(AtomicUsize::new(0));
        let recon = Reconciler::new(
            ring,
            store.clone(),
            Arc::new(CountingRecover {
                handled: true,
                calls: recover_calls.clone(),
            }),
            Arc::new(CountingRelease {
                calls: release_calls.clone(),
            }),
            4,
            10,
        );
        *recon.shared.owned.lock() = [2u32].into_iter().collect();

        execute(recon.shared.clone()).await;

        assert_eq!(release_calls.load(Ordering::SeqCst), 1);
        assert!(!recon.owned_vnodes().contains(&2));
        assert_eq!(store.cached_vnode_count(), 0);

        let keys = store.load_keys(2).await.unwrap();
        assert!(keys.contains(&b"k2".to_vec()));
    }

    #[tokio::test]
    async fn debounce_coalesces_a_burst_into_one_reconciliation() {
        let ring = Arc::new(HashRing::with_identity(NodeId(1)));
        ring.add_node(Node::new(NodeId(1), "a"), 16);
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend));
        let recover_calls = Arc::new(AtomicUsize::new(0));
        let release_calls = Arc::new(AtomicUsize::new(0));
        let recon = Reconciler::new(
            ring,
            store,
            Arc::new(CountingRecover {
                handled: true,
                calls: recover_calls.clone(),
            }),
            Arc::new(CountingRelease {
                calls: release_calls,
            }),
            4,
            10,
        );

        for _ in 0..5 {
            recon.on_ring_changed(Duration::from_millis(50));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // At this point only ~25ms have elapsed since the first event and
        // ~0ms since the last; nothing should have fired yet.
        assert_eq!(recon.owned_vnodes().len(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recon.owned_vnodes().len(), 4);
    }

    struct SlowRelease {
        active: Arc<AtomicUsize>,
        peak_active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Release for SlowRelease {
        async fn release(&self, _key: &Key) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_active.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_execute_invocations_are_serialized() {
        // Spec §5: "the reconciler runs at most one fan-out at a time per
        // process". Two `execute()` calls launched concurrently (as would
        // happen if a debounce timer for a later generation fired while an
        // earlier generation's fan-out was still running a slow host
        // callback) must not overlap.
        let ring = Arc::new(HashRing::with_identity(NodeId(1)));
        // No nodes: this process owns nothing, so a pre-seeded `owned` set
        // produces a release-only diff against the (always empty) current
        // ring view. A single key means at most one release call is ever
        // in flight for a *correctly serialized* pair of invocations: by
        // the time the second invocation acquires the lock, the first has
        // already committed `owned` back to empty, so the second sees an
        // empty diff and calls `release` zero times. Without serialization
        // both invocations can race to read the stale `owned = {0}` before
        // either commits, each calling `release("k0")` concurrently.
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend));
        store.add_key(0, b"k0".to_vec()).await.unwrap();

        let active = Arc::new(AtomicUsize::new(0));
        let peak_active = Arc::new(AtomicUsize::new(0));
        let recon = Reconciler::new(
            ring,
            store,
            Arc::new(CountingRecover {
                handled: true,
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Arc::new(SlowRelease {
                active: active.clone(),
                peak_active: peak_active.clone(),
            }),
            4,
            10,
        );
        *recon.shared.owned.lock() = [0u32].into_iter().collect();

        let shared_a = recon.shared.clone();
        let shared_b = recon.shared.clone();
        let a = tokio::spawn(async move { execute(shared_a).await });
        let b = tokio::spawn(async move { execute(shared_b).await });

        let _ = tokio::join!(a, b);

        assert_eq!(
            peak_active.load(Ordering::SeqCst),
            1,
            "two fan-outs ran release callbacks concurrently"
        );
    }
}
