//! Persisted per-vnode key index with a read-through, write-back cache
//! (spec §4.2).

use std::collections::HashSet;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::hash::VNodeId;

/// An opaque byte-string key, cheap to clone and hash.
pub type Key = Vec<u8>;

/// The host-provided persistence contract (spec §6): a key-value or
/// document store keyed by vnode id, supporting load/add/remove of the
/// vnode's key set. Implementations are expected to be eventually
/// consistent across the cluster.
#[async_trait]
pub trait PersistenceBackend: Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    async fn load_keys(&self, vnode: VNodeId) -> Result<HashSet<Key>, Self::Error>;
    async fn add_key(&self, vnode: VNodeId, key: Key) -> Result<(), Self::Error>;
    async fn remove_key(&self, vnode: VNodeId, key: Key) -> Result<(), Self::Error>;
}

/// In-memory shadow of a vnode's persisted key set.
struct CacheEntry {
    keys: HashSet<Key>,
    loaded: bool,
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            keys: HashSet::new(),
            loaded: false,
        }
    }
}

/// Wraps a [`PersistenceBackend`] with a per-vnode in-memory cache.
///
/// Vnodes are sharded across a `DashMap` so operations on different vnodes
/// never contend; each entry carries its own `tokio::sync::Mutex` so
/// operations on the *same* vnode serialize and a subsequent `load_keys`
/// observes every prior completed mutation, per the concurrency contract in
/// §4.2.
pub struct CacheStore<B: PersistenceBackend> {
    backend: Arc<B>,
    cache: DashMap<VNodeId, Arc<Mutex<CacheEntry>>>,
}

impl<B: PersistenceBackend> CacheStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
        }
    }

    fn entry_for(&self, vnode: VNodeId) -> Arc<Mutex<CacheEntry>> {
        self.cache
            .entry(vnode)
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::empty())))
            .clone()
    }

    /// Returns the current key set for `vnode`, reading through to the
    /// backing store on a cache miss.
    pub async fn load_keys(&self, vnode: VNodeId) -> Result<HashSet<Key>, B::Error> {
        let entry = self.entry_for(vnode);
        let mut guard = entry.lock().await;
        if !guard.loaded {
            let keys = self.backend.load_keys(vnode).await?;
            guard.keys = keys;
            guard.loaded = true;
        }
        Ok(guard.keys.clone())
    }

    /// Adds `key` to `vnode`'s set (idempotent) and durably persists it.
    /// The cache is only updated after the backend write succeeds, so a
    /// failed write never leaves the cache claiming a key it doesn't have.
    /// If the entry isn't loaded yet, reads through to the backend first
    /// (same as `load_keys`) so marking it loaded doesn't shadow keys
    /// another process already persisted for this vnode.
    pub async fn add_key(&self, vnode: VNodeId, key: Key) -> Result<(), B::Error> {
        let entry = self.entry_for(vnode);
        let mut guard = entry.lock().await;
        if !guard.loaded {
            guard.keys = self.backend.load_keys(vnode).await?;
        }
        self.backend.add_key(vnode, key.clone()).await?;
        guard.keys.insert(key);
        guard.loaded = true;
        Ok(())
    }

    /// Removes `key` from `vnode`'s set. Idempotent on absent keys.
    pub async fn remove_key(&self, vnode: VNodeId, key: Key) -> Result<(), B::Error> {
        let entry = self.entry_for(vnode);
        let mut guard = entry.lock().await;
        self.backend.remove_key(vnode, key.clone()).await?;
        guard.keys.remove(&key);
        Ok(())
    }

    /// Drops the in-memory entry for `vnode` without touching persistence.
    /// Called once a vnode's keys have all been released to a new owner.
    pub fn release_from_cache(&self, vnode: VNodeId) {
        self.cache.remove(&vnode);
    }

    /// Number of vnodes currently resident in the cache. Exposed for tests
    /// and metrics, not part of the spec's public contract.
    pub fn cached_vnode_count(&self) -> usize {
        self.cache.len()
    }
}
