//! Operator CLI for the durable-key ownership coordinator.
//!
//! Seeds a `corelib::HashRing` from `--node` flags, wires it to an
//! in-memory `ownership::PersistenceBackend` and `ownership::Coordinator`,
//! and runs one subcommand: inspecting ring topology, simulating a key
//! lookup, marking work complete, or simulating a reconciliation.

pub mod commands;
pub mod config;

pub use commands::Command;
pub use config::CliConfig;
