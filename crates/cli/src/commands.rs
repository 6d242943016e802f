//! Subcommands wiring a `corelib::HashRing` + in-memory persistence
//! backend + `ownership::Coordinator` together for manual inspection and
//! demo purposes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Subcommand;
use corelib::{HashRing, Node, NodeId, Topology};
use ownership::{Coordinator, CoordinatorConfig, Key, PersistenceBackend, Recover, Release, VNodeId};
use parking_lot::Mutex;

use crate::config::CliConfig;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the seeded ring's node/vnode ownership breakdown.
    Topology,
    /// Resolve `key`'s owning node, persisting the observation if this
    /// process (per `--whoami`) is the owner.
    Lookup { key: String },
    /// Mark `key`'s outstanding work done, removing it from its vnode's
    /// persisted index.
    WorkComplete { key: String },
    /// Seed a handful of keys, then simulate a ring membership change and
    /// print which vnodes this process owned before/after reconciliation.
    Reconcile {
        /// Keys to seed into the index before the simulated change.
        #[arg(long = "seed-key")]
        seed_keys: Vec<String>,
        /// An additional node (`id:name:vnodes`) to introduce to trigger
        /// reconciliation.
        #[arg(long = "join", value_name = "ID:NAME:VNODES")]
        join: Option<crate::config::NodeSpec>,
    },
}

/// Trivial in-memory `PersistenceBackend`, standing in for a real store so
/// this CLI is runnable without external infrastructure.
struct InMemoryPersistenceBackend {
    data: Mutex<std::collections::HashMap<VNodeId, HashSet<Key>>>,
}

impl InMemoryPersistenceBackend {
    fn new() -> Self {
        Self {
            data: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("in-memory backend failure")]
struct InMemoryBackendError;

#[async_trait]
impl PersistenceBackend for InMemoryPersistenceBackend {
    type Error = InMemoryBackendError;

    async fn load_keys(&self, vnode: VNodeId) -> Result<HashSet<Key>, Self::Error> {
        Ok(self.data.lock().get(&vnode).cloned().unwrap_or_default())
    }

    async fn add_key(&self, vnode: VNodeId, key: Key) -> Result<(), Self::Error> {
        self.data.lock().entry(vnode).or_default().insert(key);
        Ok(())
    }

    async fn remove_key(&self, vnode: VNodeId, key: Key) -> Result<(), Self::Error> {
        if let Some(set) = self.data.lock().get_mut(&vnode) {
            set.remove(&key);
        }
        Ok(())
    }
}

fn logging_recover() -> Arc<dyn Recover> {
    Arc::new(|key: Key| async move {
        tracing::info!(key = %String::from_utf8_lossy(&key), "recovered key");
        Ok(true)
    })
}

fn logging_release() -> Arc<dyn Release> {
    Arc::new(|key: Key| async move {
        tracing::info!(key = %String::from_utf8_lossy(&key), "released key");
        Ok(())
    })
}

fn build_ring(config: &CliConfig) -> Arc<HashRing> {
    let ring = Arc::new(HashRing::with_identity(NodeId(config.whoami)));
    for spec in &config.nodes {
        ring.add_node(Node::new(NodeId(spec.id), spec.name.clone()), spec.vnodes);
    }
    ring.mark_ready();
    ring
}

fn build_coordinator(
    config: &CliConfig,
    ring: Arc<HashRing>,
) -> anyhow::Result<Coordinator<HashRing, InMemoryPersistenceBackend>> {
    let store = Arc::new(InMemoryPersistenceBackend::new());
    let cfg = CoordinatorConfig {
        total_vnodes: config.total_vnodes,
        calm_threshold_ms: config.calm_threshold_ms,
        max_parallel_tasks: config.max_parallel_tasks,
    };
    Coordinator::new(ring, store, logging_recover(), logging_release(), cfg)
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))
}

pub async fn execute(config: CliConfig) -> anyhow::Result<()> {
    let ring = build_ring(&config);

    match &config.command {
        Command::Topology => {
            let topology = Topology::new((*ring).clone());
            println!("{}", topology.describe());
        }
        Command::Lookup { key } => {
            let coordinator = build_coordinator(&config, ring)?;
            match coordinator.lookup(key.as_bytes()) {
                Some(node) => println!("{key} -> {node}"),
                None => println!("{key} -> <no nodes in ring>"),
            }
            // Give the fire-and-forget persistence write a moment so the
            // operator sees the effect immediately in a one-shot CLI run.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Command::WorkComplete { key } => {
            let coordinator = build_coordinator(&config, ring)?;
            coordinator.work_complete_on_key(key.as_bytes()).await?;
            println!("{key} marked complete");
        }
        Command::Reconcile { seed_keys, join } => {
            let coordinator = build_coordinator(&config, ring.clone())?;
            for key in seed_keys {
                coordinator.lookup(key.as_bytes());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;

            let before = coordinator.owned_vnodes();
            println!("owned before: {} vnode(s)", before.len());

            coordinator.run();
            if let Some(spec) = join {
                ring.add_node(Node::new(NodeId(spec.id), spec.name.clone()), spec.vnodes);
            } else {
                // No-op membership event, so a reconciliation runs even
                // without an explicit --join.
                ring.add_node(Node::new(NodeId(u128::MAX), "nop"), 0);
            }
            tokio::time::sleep(config.calm_threshold() + Duration::from_millis(100)).await;

            let after = coordinator.owned_vnodes();
            println!("owned after: {} vnode(s)", after.len());
            coordinator.shutdown();
        }
    }

    Ok(())
}
