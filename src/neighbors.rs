//! Neighbor & path table (C9, §4.6).
//!
//! Grounded on `netrajaal/main.py`'s `possible_paths` and `device.py`'s
//! `propogate_spath`: a monotonic neighbor set learned from beacons, and a
//! next-hop path to the command center that only ever shrinks (accepts a
//! strictly shorter announce, never grows spontaneously).

use crate::address::NodeAddr;
use std::collections::BTreeSet;

/// Neighbor set and path-to-command-center table for one node.
#[derive(Debug, Default)]
pub struct NeighborTable {
    neighbors: BTreeSet<NodeAddr>,
    /// Ordered `[next_hop, ..., cc]`. Empty means "no known route".
    path_to_cc: Vec<NodeAddr>,
    /// When true, §4.6's adoption rule is disabled and `path_to_cc` is
    /// fixed at whatever `initial_path` provisioned it with.
    fixed_route: bool,
}

impl NeighborTable {
    pub fn new(initial_path: Vec<NodeAddr>, fixed_route: bool) -> Self {
        NeighborTable {
            neighbors: BTreeSet::new(),
            path_to_cc: initial_path,
            fixed_route,
        }
    }

    /// Learns `addr` as a neighbor if not already known. Returns `true`
    /// if this was a new neighbor.
    pub fn learn_neighbor(&mut self, addr: NodeAddr) -> bool {
        self.neighbors.insert(addr)
    }

    /// Explicit eviction by the validation sweep (§4.11): the only way a
    /// neighbor ever leaves the monotonic set.
    pub fn evict_neighbor(&mut self, addr: NodeAddr) -> bool {
        self.neighbors.remove(&addr)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &NodeAddr> {
        self.neighbors.iter()
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_neighbor(&self, addr: NodeAddr) -> bool {
        self.neighbors.contains(&addr)
    }

    pub fn path_to_cc(&self) -> &[NodeAddr] {
        &self.path_to_cc
    }

    /// Returns the next hop toward the command center, if a route is
    /// known.
    pub fn next_hop(&self) -> Option<NodeAddr> {
        self.path_to_cc.first().copied()
    }

    pub fn has_route(&self) -> bool {
        !self.path_to_cc.is_empty()
    }

    /// Clears the path (§4.11: when the next hop is validated away).
    pub fn clear_path(&mut self) {
        self.path_to_cc.clear();
    }

    /// Attempts to adopt `candidate` as a new path to the command center,
    /// per §4.6's three conditions. `self_addr` is this node's own
    /// address, used for the no-cycle check. `is_command_center` disables
    /// adoption entirely (CC nodes ignore inbound `S`, §4.6).
    ///
    /// Returns `true` if the candidate was adopted.
    pub fn try_adopt_path(&mut self, self_addr: NodeAddr, is_command_center: bool, candidate: &[NodeAddr]) -> bool {
        if is_command_center || self.fixed_route {
            return false;
        }
        if candidate.contains(&self_addr) {
            return false;
        }
        if !self.path_to_cc.is_empty() && candidate.len() >= self.path_to_cc.len() {
            return false;
        }
        self.path_to_cc = candidate.to_vec();
        true
    }

    /// Neighbors that should receive a re-emitted `S` announce after this
    /// node adopts `candidate`: every known neighbor not already present
    /// in the candidate path (§4.6), each seeing themselves prepended so
    /// their own next hop is this node.
    pub fn fanout_targets_for(&self, candidate: &[NodeAddr]) -> Vec<NodeAddr> {
        self.neighbors.iter().filter(|n| !candidate.contains(n)).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_neighbor_once() {
        let mut t = NeighborTable::new(vec![], false);
        assert!(t.learn_neighbor(5));
        assert!(!t.learn_neighbor(5));
        assert_eq!(t.neighbor_count(), 1);
    }

    #[test]
    fn adopts_strictly_shorter_path_only() {
        let mut t = NeighborTable::new(vec![], false);
        assert!(t.try_adopt_path(1, false, &[9]));
        assert_eq!(t.path_to_cc(), &[9]);
        // equal length: rejected
        assert!(!t.try_adopt_path(1, false, &[8]));
        assert_eq!(t.path_to_cc(), &[9]);
        // strictly shorter than current requires len < 1, impossible here,
        // but a longer path from scratch after clearing must still work
        t.clear_path();
        assert!(t.try_adopt_path(1, false, &[8, 9]));
        assert_eq!(t.path_to_cc(), &[8, 9]);
        assert!(t.try_adopt_path(1, false, &[9]));
        assert_eq!(t.path_to_cc(), &[9]);
    }

    #[test]
    fn rejects_cycle_through_self() {
        let mut t = NeighborTable::new(vec![], false);
        assert!(!t.try_adopt_path(5, false, &[3, 5, 9]));
        assert!(!t.has_route());
    }

    #[test]
    fn command_center_never_adopts() {
        let mut t = NeighborTable::new(vec![], false);
        assert!(!t.try_adopt_path(1, true, &[9]));
        assert!(!t.has_route());
    }

    #[test]
    fn fixed_route_disables_adoption() {
        let mut t = NeighborTable::new(vec![9], true);
        assert!(!t.try_adopt_path(1, false, &[2, 9]));
        assert_eq!(t.path_to_cc(), &[9]);
    }

    #[test]
    fn fanout_excludes_nodes_already_in_candidate() {
        let mut t = NeighborTable::new(vec![], false);
        t.learn_neighbor(2);
        t.learn_neighbor(3);
        t.learn_neighbor(9);
        let targets = t.fanout_targets_for(&[9]);
        assert_eq!(targets, vec![2, 3]);
    }
}
