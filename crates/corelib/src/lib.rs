//! Core library for consistent hashing implementation.
//!
//! This crate provides the fundamental abstractions for consistent hashing:
//! - Token types and implementations
//! - Partitioner algorithms
//! - Node and virtual node abstractions
//! - Ring topology and routing
//! - The `Ring` capability (`lookup`/`whoami`/`ready`/`changed`) that the
//!   `ownership` crate's reconciliation engine is built against

pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod topology;
pub mod vnode;

pub use error::{Error, Result};
pub use node::{Node, NodeId};
pub use partitioner::Partitioner;
pub use ring::{ChangeEvent, HashRing, Ring, RingBuilder};
pub use token::Token;
pub use topology::Topology;
pub use vnode::VirtualNode;
