//! Durable-key ownership coordinator.
//!
//! Tracks which vnode-partitioned keys each cluster node has ever seen,
//! persists those associations through a read-through/write-back cache,
//! and drives bounded-concurrency recovery/release of keys when the
//! underlying hash ring's membership changes.
//!
//! The hash ring and persistence backend are external collaborators,
//! consumed here only through the [`corelib::Ring`] and
//! [`store::PersistenceBackend`] traits — this crate never assumes a
//! concrete ring or store implementation.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hash;
pub mod lookup;
pub mod reconciler;
pub mod store;
pub mod tracker;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{ConfigurationError, StoreError};
pub use hash::{vnode_for_key, VNodeId};
pub use lookup::InterceptingRing;
pub use reconciler::{Reconciler, ReconcilerState, Recover, Release};
pub use store::{CacheStore, Key, PersistenceBackend};
pub use tracker::compute_owned_vnodes;
