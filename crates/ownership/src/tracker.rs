//! Ownership tracker (spec §4.3).

use std::collections::BTreeSet;

use corelib::Ring as RingCapability;

use crate::hash::VNodeId;

/// Computes the sorted set of vnodes this process currently owns by asking
/// the ring, for every `v` in `[0, total_vnodes)`, whether `ring.lookup(v)
/// == ring.whoami()`.
///
/// Must only ever be called with the *unwrapped* ring (never
/// `InterceptingRing`) — reconciliation has to be free of side effects on
/// the key index, and routing vnode-id lookups through the interceptor
/// would otherwise attempt to persist a non-existent "key".
pub fn compute_owned_vnodes<R: RingCapability + ?Sized>(
    ring: &R,
    total_vnodes: u32,
) -> BTreeSet<VNodeId> {
    let me = ring.whoami();
    (0..total_vnodes)
        .filter(|&v| ring.lookup_vnode(v) == Some(me))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{HashRing, Node, NodeId};

    #[test]
    fn owned_set_matches_lookup_vnode() {
        let ring = HashRing::with_identity(NodeId(1));
        ring.add_node(Node::new(NodeId(1), "a"), 8);
        ring.add_node(Node::new(NodeId(2), "b"), 8);

        let owned = compute_owned_vnodes(&ring, 64);
        for v in owned.iter() {
            assert_eq!(ring.lookup_vnode(*v), Some(NodeId(1)));
        }
        for v in 0..64u32 {
            if !owned.contains(&v) {
                assert_ne!(ring.lookup_vnode(v), Some(NodeId(1)));
            }
        }
    }

    #[test]
    fn empty_ring_owns_nothing() {
        let ring = HashRing::with_identity(NodeId(1));
        let owned = compute_owned_vnodes(&ring, 16);
        assert!(owned.is_empty());
    }

    #[test]
    fn sole_node_owns_everything() {
        let ring = HashRing::with_identity(NodeId(9));
        ring.add_node(Node::new(NodeId(9), "solo"), 4);
        let owned = compute_owned_vnodes(&ring, 32);
        assert_eq!(owned.len(), 32);
    }
}
