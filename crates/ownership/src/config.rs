//! Coordinator configuration (spec §6, §9 "Configuration as a value").

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Default `TOTAL_VNODES` (spec §4.1). MUST NOT change over the lifetime
/// of a cluster's persisted state — doing so invalidates every existing
/// vnode-to-key association.
pub const DEFAULT_TOTAL_VNODES: u32 = 1024;

/// Default debounce window (spec §4.4).
pub const DEFAULT_CALM_THRESHOLD: Duration = Duration::from_millis(500);

/// Default bounded-concurrency fan-out cap (spec §5).
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 10;

/// The scalar knobs of spec.md §6's configuration value. `ring`, `store`,
/// `recover`, and `release` are supplied separately via
/// [`crate::Coordinator::new`] — they aren't `Deserialize` and don't
/// round-trip through a config file the way these do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of vnode partitions of the key space.
    pub total_vnodes: u32,
    /// Debounce window, in milliseconds, coalescing bursts of ring
    /// `changed` events into a single reconciliation.
    pub calm_threshold_ms: u64,
    /// Bounded-concurrency cap shared across both vnode and per-key
    /// fan-out within a single reconciliation.
    pub max_parallel_tasks: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            total_vnodes: DEFAULT_TOTAL_VNODES,
            calm_threshold_ms: DEFAULT_CALM_THRESHOLD.as_millis() as u64,
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
        }
    }
}

impl CoordinatorConfig {
    pub fn calm_threshold(&self) -> Duration {
        Duration::from_millis(self.calm_threshold_ms)
    }

    /// Fatal-at-construction validation (spec §7 `ConfigurationError`).
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.total_vnodes == 0 {
            return Err(ConfigurationError::ZeroTotalVNodes);
        }
        if self.max_parallel_tasks == 0 {
            return Err(ConfigurationError::ZeroParallelism);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.total_vnodes, 1024);
        assert_eq!(cfg.calm_threshold(), Duration::from_millis(500));
        assert_eq!(cfg.max_parallel_tasks, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_total_vnodes_is_fatal() {
        let cfg = CoordinatorConfig {
            total_vnodes: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigurationError::ZeroTotalVNodes));
    }

    #[test]
    fn zero_parallelism_is_fatal() {
        let cfg = CoordinatorConfig {
            max_parallel_tasks: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigurationError::ZeroParallelism));
    }
}
