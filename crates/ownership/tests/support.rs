//! Shared in-memory persistence backend fixture for the ownership crate's
//! integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ownership::{Key, PersistenceBackend, VNodeId};
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("in-memory backend failure")]
pub struct MemBackendError;

/// A trivial in-memory [`PersistenceBackend`] used across the integration
/// tests, with a counter exposing how many writes were observed (used by
/// the concurrency-bound property test) and an injectable one-shot write
/// failure (used by the transient-store-error scenario).
pub struct InMemoryBackend {
    data: Mutex<HashMap<VNodeId, HashSet<Key>>>,
    inflight: Arc<AtomicUsize>,
    peak_inflight: Arc<AtomicUsize>,
    fail_next_add: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            inflight: Arc::new(AtomicUsize::new(0)),
            peak_inflight: Arc::new(AtomicUsize::new(0)),
            fail_next_add: AtomicBool::new(false),
        }
    }

    pub fn fail_next_add(&self) {
        self.fail_next_add.store(true, Ordering::SeqCst);
    }

    pub fn snapshot(&self, vnode: VNodeId) -> HashSet<Key> {
        self.data.lock().get(&vnode).cloned().unwrap_or_default()
    }

    pub fn peak_inflight(&self) -> usize {
        self.peak_inflight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let n = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inflight.fetch_max(n, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    type Error = MemBackendError;

    async fn load_keys(&self, vnode: VNodeId) -> Result<HashSet<Key>, Self::Error> {
        Ok(self.data.lock().get(&vnode).cloned().unwrap_or_default())
    }

    async fn add_key(&self, vnode: VNodeId, key: Key) -> Result<(), Self::Error> {
        if self.fail_next_add.swap(false, Ordering::SeqCst) {
            return Err(MemBackendError);
        }
        self.data.lock().entry(vnode).or_default().insert(key);
        Ok(())
    }

    async fn remove_key(&self, vnode: VNodeId, key: Key) -> Result<(), Self::Error> {
        self.enter();
        // A small, artificial amount of work so concurrent callers
        // actually overlap in time; exercises the semaphore bound.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        if let Some(set) = self.data.lock().get_mut(&vnode) {
            set.remove(&key);
        }
        self.exit();
        Ok(())
    }
}
