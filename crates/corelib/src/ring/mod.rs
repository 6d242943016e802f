//! Consistent hash ring implementation.
//!
//! The ring manages token positions and provides efficient lookup
//! operations for finding nodes responsible for keys, plus the
//! membership-change notifications that ownership reconciliation
//! depends on.

pub mod ring;

pub use ring::{ChangeEvent, HashRing, Ring, RingBuilder};
