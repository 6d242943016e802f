//! Hash ring data structure.
//!
//! Holds a `BTreeMap<Murmur3Token, VirtualNode>` under a read-write lock and
//! provides the lookup/membership operations a consistent-hash ring needs,
//! plus the `whoami`/`ready`/`changed` surface an ownership coordinator
//! built on top of the ring depends on (see `Ring` below).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

use crate::node::{Node, NodeId};
use crate::token::murmur3::Murmur3Token;
use crate::token::Token;
use crate::vnode::VirtualNode;

const DEFAULT_CHANGED_CAPACITY: usize = 64;

/// A membership change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    NodeAdded(NodeId),
    NodeRemoved(NodeId),
}

/// The capability surface a ring must expose to whatever sits on top of it.
///
/// `lookup_key` resolves an arbitrary byte string; `lookup_vnode` resolves
/// one of the ring's own fixed-size partitions by index. Both are total
/// functions over an empty ring (`None`), otherwise always return a node
/// that currently holds membership.
pub trait Ring: Send + Sync {
    /// Resolve an arbitrary key to the node responsible for it.
    fn lookup_key(&self, key: &[u8]) -> Option<NodeId>;

    /// Resolve a vnode index (`[0, total_vnodes)`) to the node responsible
    /// for it. Deterministic and stable for a given `vnode`.
    fn lookup_vnode(&self, vnode: u32) -> Option<NodeId>;

    /// The identity this process presents to the ring.
    fn whoami(&self) -> NodeId;

    /// Whether the ring has completed its initial membership sync.
    fn is_ready(&self) -> bool;

    /// Subscribe to membership-change events (fired on every add/remove).
    fn subscribe_changed(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Subscribe to the ready transition (fires once, then holds `true`).
    fn subscribe_ready(&self) -> watch::Receiver<bool>;
}

#[derive(Default)]
struct Inner {
    ring: BTreeMap<Murmur3Token, VirtualNode>,
    nodes: HashMap<NodeId, Node>,
    vnode_counts: HashMap<NodeId, usize>,
}

/// The main hash ring type: vnode-aware, thread-safe, cheap to clone.
///
/// Cloning a `HashRing` clones the handle, not the ring — all clones share
/// the same underlying state (the same pattern the teacher's `Topology`
/// wrapper assumes when it takes a `HashRing` by value).
#[derive(Clone)]
pub struct HashRing {
    inner: Arc<RwLock<Inner>>,
    whoami: NodeId,
    changed_tx: broadcast::Sender<ChangeEvent>,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("whoami", &self.whoami)
            .field("node_count", &self.node_count())
            .field("token_count", &self.token_count())
            .finish()
    }
}

impl HashRing {
    /// Create an empty ring whose own identity is `NodeId(0)`.
    pub fn new() -> Self {
        Self::with_identity(NodeId(0))
    }

    /// Create an empty ring presenting as `id`.
    pub fn with_identity(id: NodeId) -> Self {
        let (changed_tx, _) = broadcast::channel(DEFAULT_CHANGED_CAPACITY);
        let (ready_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            whoami: id,
            changed_tx,
            ready_tx: Arc::new(ready_tx),
        }
    }

    /// Mark the ring as having completed its initial membership sync.
    /// Idempotent; only the first call actually flips the watch.
    pub fn mark_ready(&self) {
        let _ = self.ready_tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    /// Add `vnode_count` new virtual nodes for `node`. Calling this again
    /// for a node already present adds more vnodes on top of its existing
    /// ones rather than replacing them.
    pub fn add_node(&self, node: Node, vnode_count: usize) {
        let mut inner = self.inner.write();
        let start = *inner.vnode_counts.get(&node.id).unwrap_or(&0);
        for i in start..start + vnode_count {
            let vnode = VirtualNode::from_index(node.id, i);
            inner.ring.insert(vnode.token(), vnode);
        }
        inner.vnode_counts.insert(node.id, start + vnode_count);
        inner.nodes.insert(node.id, node.clone());
        drop(inner);
        let _ = self.changed_tx.send(ChangeEvent::NodeAdded(node.id));
    }

    /// Remove every vnode owned by `id`. Returns `false` if the node wasn't
    /// present.
    pub fn remove_node(&self, id: &NodeId) -> bool {
        let mut inner = self.inner.write();
        if inner.nodes.remove(id).is_none() {
            return false;
        }
        inner.vnode_counts.remove(id);
        inner.ring.retain(|_, vnode| vnode.node_id() != *id);
        drop(inner);
        let _ = self.changed_tx.send(ChangeEvent::NodeRemoved(*id));
        true
    }

    /// Resolve the node responsible for `key` (clockwise search, wrapping
    /// around the ring).
    pub fn lookup(&self, key: &[u8]) -> Option<NodeId> {
        let token = Murmur3Token::from_bytes(key);
        self.lookup_token(token)
    }

    /// Same as [`lookup`](Self::lookup) but returns the full node metadata.
    pub fn lookup_node(&self, key: &[u8]) -> Option<Node> {
        let id = self.lookup(key)?;
        self.get_node(&id)
    }

    fn lookup_token(&self, token: Murmur3Token) -> Option<NodeId> {
        let inner = self.inner.read();
        if inner.ring.is_empty() {
            return None;
        }
        inner
            .ring
            .range(token..)
            .next()
            .or_else(|| inner.ring.iter().next())
            .map(|(_, vnode)| vnode.node_id())
    }

    pub fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.inner.read().nodes.get(id).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    pub fn tokens(&self) -> Vec<(Murmur3Token, NodeId)> {
        self.inner
            .read()
            .ring
            .iter()
            .map(|(token, vnode)| (*token, vnode.node_id()))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn token_count(&self) -> usize {
        self.inner.read().ring.len()
    }

    pub fn partitioner_name(&self) -> &'static str {
        "Murmur3Partitioner"
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Ring for HashRing {
    fn lookup_key(&self, key: &[u8]) -> Option<NodeId> {
        self.lookup(key)
    }

    fn lookup_vnode(&self, vnode: u32) -> Option<NodeId> {
        self.lookup_token(Murmur3Token::from_bytes(&vnode.to_be_bytes()))
    }

    fn whoami(&self) -> NodeId {
        self.whoami
    }

    fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    fn subscribe_changed(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changed_tx.subscribe()
    }

    fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }
}

/// Builder for assembling a ring with a chosen default vnode count, and
/// per-node overrides where needed.
pub struct RingBuilder {
    default_vnodes: usize,
    identity: Option<NodeId>,
    pending: Vec<(Node, Option<usize>)>,
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            default_vnodes: 256,
            identity: None,
            pending: Vec::new(),
        }
    }

    /// Set the default vnode count used by `add_node` (not
    /// `add_node_with_vnodes`).
    pub fn with_vnodes(mut self, n: usize) -> Self {
        self.default_vnodes = n;
        self
    }

    /// Set the identity the built ring will present via `whoami()`.
    pub fn with_identity(mut self, id: NodeId) -> Self {
        self.identity = Some(id);
        self
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.pending.push((node, None));
        self
    }

    pub fn add_node_with_vnodes(mut self, node: Node, vnode_count: usize) -> Self {
        self.pending.push((node, Some(vnode_count)));
        self
    }

    pub fn build(self) -> HashRing {
        let ring = match self.identity {
            Some(id) => HashRing::with_identity(id),
            None => HashRing::new(),
        };
        for (node, vnode_count) in self.pending {
            ring.add_node(node, vnode_count.unwrap_or(self.default_vnodes));
        }
        ring
    }
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whoami_default() {
        let ring = HashRing::new();
        assert_eq!(ring.whoami(), NodeId(0));
    }

    #[test]
    fn test_whoami_with_identity() {
        let ring = HashRing::with_identity(NodeId(7));
        assert_eq!(ring.whoami(), NodeId(7));
    }

    #[test]
    fn test_ready_transition() {
        let ring = HashRing::new();
        assert!(!ring.is_ready());
        ring.mark_ready();
        assert!(ring.is_ready());
    }

    #[test]
    fn test_changed_event_on_add_and_remove() {
        let ring = HashRing::new();
        let mut rx = ring.subscribe_changed();
        ring.add_node(Node::new(NodeId(1), "node1"), 4);
        assert_eq!(rx.try_recv().unwrap(), ChangeEvent::NodeAdded(NodeId(1)));
        ring.remove_node(&NodeId(1));
        assert_eq!(rx.try_recv().unwrap(), ChangeEvent::NodeRemoved(NodeId(1)));
    }

    #[test]
    fn test_lookup_vnode_is_deterministic() {
        let ring = HashRing::new();
        ring.add_node(Node::new(NodeId(1), "node1"), 8);
        ring.add_node(Node::new(NodeId(2), "node2"), 8);

        let first = ring.lookup_vnode(42);
        let second = ring.lookup_vnode(42);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn test_lookup_vnode_spans_total_vnodes() {
        let ring = HashRing::new();
        ring.add_node(Node::new(NodeId(1), "node1"), 16);

        for v in 0..1024u32 {
            assert_eq!(ring.lookup_vnode(v), Some(NodeId(1)));
        }
    }
}
