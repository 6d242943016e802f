//! Lookup interceptor (spec §4.5).
//!
//! Wraps any [`corelib::Ring`] so that a key routed to this process is
//! recorded into its owning vnode's persisted index before the caller gets
//! the answer back. This is a decorator, not a monkey-patch (spec §9): it
//! is itself a first-class `Ring`, so it composes with anything that takes
//! one, and the wrapped ring remains reachable (via `inner()`) for callers
//! — principally the ownership tracker — that must bypass the interception.

use std::sync::Arc;

use corelib::{NodeId, Ring as RingCapability};
use tokio::sync::broadcast;
use tokio::sync::watch;

use crate::hash::vnode_for_key;
use crate::store::{CacheStore, PersistenceBackend};

/// A [`corelib::Ring`] decorator that opportunistically persists keys
/// routed to this process.
pub struct InterceptingRing<R, B>
where
    R: RingCapability,
    B: PersistenceBackend,
{
    inner: Arc<R>,
    store: Arc<CacheStore<B>>,
    total_vnodes: u32,
}

impl<R, B> InterceptingRing<R, B>
where
    R: RingCapability,
    B: PersistenceBackend,
{
    pub fn new(inner: Arc<R>, store: Arc<CacheStore<B>>, total_vnodes: u32) -> Self {
        Self {
            inner,
            store,
            total_vnodes,
        }
    }

    /// The wrapped ring, for callers (the ownership tracker) that must
    /// bypass interception entirely.
    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    /// Resolve `key`'s owning node, opportunistically persisting the
    /// association if it belongs to this process. Always returns
    /// synchronously with respect to persistence: the `add_key` write is
    /// spawned and never awaited here (spec §4.5 step 4/5, §5 "the lookup
    /// interceptor MUST return synchronously").
    pub fn lookup(&self, key: &[u8]) -> Option<NodeId> {
        let vnode = vnode_for_key(key, self.total_vnodes);
        let node = self.inner.lookup_vnode(vnode);
        if node == Some(self.inner.whoami()) {
            let store = self.store.clone();
            let key = key.to_vec();
            tokio::spawn(async move {
                if let Err(err) = store.add_key(vnode, key.clone()).await {
                    tracing::warn!(
                        vnode,
                        key = %String::from_utf8_lossy(&key),
                        error = %err,
                        "transient store error persisting observed key"
                    );
                }
            });
        }
        node
    }
}

impl<R, B> RingCapability for InterceptingRing<R, B>
where
    R: RingCapability,
    B: PersistenceBackend,
{
    fn lookup_key(&self, key: &[u8]) -> Option<NodeId> {
        self.lookup(key)
    }

    fn lookup_vnode(&self, vnode: u32) -> Option<NodeId> {
        // Vnode-index lookups (used by the ownership tracker and
        // reconciler) never observe a "key" and must never be persisted;
        // they resolve straight through to the inner ring.
        self.inner.lookup_vnode(vnode)
    }

    fn whoami(&self) -> NodeId {
        self.inner.whoami()
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    fn subscribe_changed(&self) -> broadcast::Receiver<corelib::ring::ChangeEvent> {
        self.inner.subscribe_changed()
    }

    fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.subscribe_ready()
    }
}
