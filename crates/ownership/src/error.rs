//! Error kinds (spec §7).
//!
//! Only `ConfigurationError` and `StoreError` ever escape to a caller:
//! `ConfigurationError` from `Coordinator::new`, `StoreError` from
//! `work_complete_on_key`. Everything else (`TransientStoreError` inside the
//! reconciler/interceptor, `HostCallbackError`) is logged and swallowed at
//! the site it occurs, per the propagation policy in §7 — it never
//! constructs one of these public variants.

use thiserror::Error;

/// Fatal at construction: invalid `total_vnodes`, missing callbacks, or a
/// missing ring.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("total_vnodes must be greater than zero")]
    ZeroTotalVNodes,
    #[error("max_parallel_tasks must be greater than zero")]
    ZeroParallelism,
}

/// Surfaced only from `work_complete_on_key`; wraps the backing store's
/// error for that one key removal.
#[derive(Debug, Error)]
#[error("store error on vnode {vnode} key removal: {source}")]
pub struct StoreError {
    pub vnode: u32,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}
