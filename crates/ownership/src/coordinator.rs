//! Construction root and public API (spec §4.6).

use std::sync::Arc;

use corelib::{NodeId, Ring as RingCapability};

use crate::config::CoordinatorConfig;
use crate::error::{ConfigurationError, StoreError};
use crate::hash::vnode_for_key;
use crate::lookup::InterceptingRing;
use crate::reconciler::{Reconciler, ReconcilerState, Recover, Release};
use crate::store::{CacheStore, Key, PersistenceBackend};

/// The durable-key ownership coordinator. Owns the persisted key index,
/// the intercepting ring, and the reconciler task; this is the type a host
/// application constructs and keeps alive for the process's lifetime.
pub struct Coordinator<R, B>
where
    R: RingCapability,
    B: PersistenceBackend,
{
    ring: Arc<InterceptingRing<R, B>>,
    store: Arc<CacheStore<B>>,
    reconciler: Reconciler<R, B>,
    config: CoordinatorConfig,
    run_handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<R, B> Coordinator<R, B>
where
    R: RingCapability + 'static,
    B: PersistenceBackend,
{
    /// Construct a coordinator around `ring` and `store`, with host-supplied
    /// `recover`/`release` callbacks. The only fallible, caller-visible
    /// constructor (spec §7: `ConfigurationError` is fatal at construction).
    pub fn new(
        ring: Arc<R>,
        store: Arc<B>,
        recover: Arc<dyn Recover>,
        release: Arc<dyn Release>,
        config: CoordinatorConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let cache_store = Arc::new(CacheStore::new(store));
        let intercepting = Arc::new(InterceptingRing::new(
            ring.clone(),
            cache_store.clone(),
            config.total_vnodes,
        ));
        let reconciler = Reconciler::new(
            ring,
            cache_store.clone(),
            recover,
            release,
            config.total_vnodes,
            config.max_parallel_tasks,
        );

        Ok(Self {
            ring: intercepting,
            store: cache_store,
            reconciler,
            config,
            run_handle: parking_lot::Mutex::new(None),
        })
    }

    /// Resolve `key`'s owning node, persisting the observation if it
    /// belongs to this process (spec §4.5). Synchronous w.r.t. the caller;
    /// persistence is fire-and-forget.
    pub fn lookup(&self, key: &[u8]) -> Option<NodeId> {
        self.ring.lookup(key)
    }

    /// Remove `key` from its vnode's persisted index (spec §4.6). The
    /// host declares the key's work done; idempotent, and the only public
    /// operation whose store error is surfaced to the caller (spec §7).
    pub async fn work_complete_on_key(&self, key: &[u8]) -> Result<(), StoreError> {
        let vnode = vnode_for_key(key, self.config.total_vnodes);
        self.store
            .remove_key(vnode, key.to_vec())
            .await
            .map_err(|source| StoreError {
                vnode,
                source: Box::new(source),
            })
    }

    /// The vnodes this process owned as of the most recently completed
    /// reconciliation.
    pub fn owned_vnodes(&self) -> std::collections::BTreeSet<u32> {
        self.reconciler.owned_vnodes()
    }

    pub fn reconciler_state(&self) -> ReconcilerState {
        self.reconciler.state()
    }

    /// Start driving reconciliation off the ring's `ready`/`changed`
    /// events. Spawns a background task; call [`Coordinator::shutdown`] to
    /// stop it. Idempotent: a second call is a no-op while a run loop is
    /// already active.
    pub fn run(&self) {
        let mut handle = self.run_handle.lock();
        if handle.is_some() {
            return;
        }

        let ring = self.ring.inner().clone();
        let reconciler = self.reconciler.clone();
        let calm_threshold = self.config.calm_threshold();

        *handle = Some(tokio::spawn(async move {
            let mut ready_rx = ring.subscribe_ready();
            if !*ready_rx.borrow() {
                let _ = ready_rx.changed().await;
            }

            let mut changed_rx = ring.subscribe_changed();
            loop {
                match changed_rx.recv().await {
                    Ok(_event) => reconciler.on_ring_changed(calm_threshold),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        // Missed events during a burst; a changed event was
                        // still observed, so still reconcile.
                        reconciler.on_ring_changed(calm_threshold);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Stop the background reconciliation loop started by [`run`](Self::run).
    /// Any in-flight reconciliation is allowed to finish; this only stops
    /// future `changed` events from scheduling new ones.
    pub fn shutdown(&self) {
        if let Some(handle) = self.run_handle.lock().take() {
            handle.abort();
        }
    }
}

impl<R, B> Drop for Coordinator<R, B>
where
    R: RingCapability,
    B: PersistenceBackend,
{
    fn drop(&mut self) {
        if let Some(handle) = self.run_handle.lock().take() {
            handle.abort();
        }
    }
}
