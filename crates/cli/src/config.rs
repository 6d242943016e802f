//! `clap`-derived CLI configuration: the scalar knobs of
//! `ownership::CoordinatorConfig` exposed as flags/env vars, plus the ring
//! membership this one-shot invocation should start from.

use clap::Parser;
use thiserror::Error;

use crate::commands::Command;

/// A node specification of the form `id:name:vnodes`, e.g. `1:a:16`.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: u128,
    pub name: String,
    pub vnodes: usize,
}

#[derive(Debug, Error)]
pub enum NodeSpecParseError {
    #[error("missing node id")]
    MissingId,
    #[error("invalid node id: {0}")]
    InvalidId(std::num::ParseIntError),
    #[error("missing node name")]
    MissingName,
    #[error("invalid vnode count: {0}")]
    InvalidVNodes(std::num::ParseIntError),
}

impl std::str::FromStr for NodeSpec {
    type Err = NodeSpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let id = parts
            .next()
            .ok_or(NodeSpecParseError::MissingId)?
            .parse::<u128>()
            .map_err(NodeSpecParseError::InvalidId)?;
        let name = parts
            .next()
            .ok_or(NodeSpecParseError::MissingName)?
            .to_string();
        let vnodes = parts
            .next()
            .unwrap_or("256")
            .parse::<usize>()
            .map_err(NodeSpecParseError::InvalidVNodes)?;
        Ok(NodeSpec { id, name, vnodes })
    }
}

/// Operator-facing CLI for the durable-key ownership coordinator: seeds a
/// ring with the given membership, wires it to an in-memory persistence
/// backend and a `Coordinator`, then runs exactly one subcommand against
/// that process.
#[derive(Debug, Parser)]
#[command(name = "ownership-ctl", version, about)]
pub struct CliConfig {
    /// The node id this process presents as (`whoami()`).
    #[arg(long, env = "OWNERSHIP_WHOAMI", default_value_t = 1)]
    pub whoami: u128,

    /// Ring membership to seed before running the subcommand, each as
    /// `id:name:vnodes` (vnodes defaults to 256). May be repeated.
    #[arg(long = "node", value_name = "ID:NAME:VNODES")]
    pub nodes: Vec<NodeSpec>,

    /// Number of vnode partitions of the key space.
    #[arg(long, env = "OWNERSHIP_TOTAL_VNODES", default_value_t = 1024)]
    pub total_vnodes: u32,

    /// Debounce window, in milliseconds.
    #[arg(long, env = "OWNERSHIP_CALM_THRESHOLD_MS", default_value_t = 500)]
    pub calm_threshold_ms: u64,

    /// Bounded-concurrency fan-out cap.
    #[arg(long, env = "OWNERSHIP_MAX_PARALLEL_TASKS", default_value_t = 10)]
    pub max_parallel_tasks: usize,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn calm_threshold(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.calm_threshold_ms)
    }

    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(crate::commands::execute(self))
    }
}
