//! Slot ownership tables.

use crate::error::TopologyError;
use crate::node_id::NodeId;
use crate::slot::{SLOT_COUNT, Slot};

/// An inclusive range of hash slots.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SlotRange {
    start: Slot,
    end: Slot,
}

impl SlotRange {
    /// Create a range covering `start..=end`.
    ///
    /// # Errors
    /// Returns `TopologyError::InvalidRange` if `start > end` or `end` is not a valid slot.
    pub const fn new(start: Slot, end: Slot) -> Result<Self, TopologyError> {
        if start > end || end >= SLOT_COUNT {
            return Err(TopologyError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// First slot in the range
    #[must_use]
    pub const fn start(&self) -> Slot {
        self.start
    }

    /// Last slot in the range
    #[must_use]
    pub const fn end(&self) -> Slot {
        self.end
    }

    /// Whether `slot` falls inside the range
    #[must_use]
    pub const fn contains(&self, slot: Slot) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Number of slots covered
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Ranges are never empty; provided for clippy's `len_without_is_empty`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Maps every hash slot to the node that owns it.
///
/// Nodes are kept in insertion order so that `nodes()` is stable for one view.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SlotMap {
    nodes: Vec<NodeId>,
    owners: Vec<Option<usize>>,
}

impl Default for SlotMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotMap {
    /// Create a map with no nodes and no assigned slots
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            owners: vec![None; SLOT_COUNT as usize],
        }
    }

    /// Spread all slots over `nodes` in contiguous, near-equal ranges.
    ///
    /// The first `SLOT_COUNT % n` nodes receive one extra slot.
    #[must_use]
    pub fn split_evenly(nodes: &[NodeId]) -> Self {
        let mut map = Self::new();
        if nodes.is_empty() {
            return map;
        }

        let per_node = SLOT_COUNT as usize / nodes.len();
        let remainder = SLOT_COUNT as usize % nodes.len();
        let mut start = 0usize;

        for (i, node) in nodes.iter().enumerate() {
            let len = per_node + usize::from(i < remainder);
            let index = map.node_index(node);
            for owner in &mut map.owners[start..start + len] {
                *owner = Some(index);
            }
            start += len;
        }

        map
    }

    /// Register a node without giving it any slots
    pub fn add_node(&mut self, node: NodeId) {
        self.node_index(&node);
    }

    /// Assign every slot in `range` to `node`, replacing previous owners.
    pub fn assign(&mut self, range: SlotRange, node: &NodeId) {
        let index = self.node_index(node);
        for owner in &mut self.owners[range.start as usize..=range.end as usize] {
            *owner = Some(index);
        }
    }

    /// Remove the owner of every slot in `range`
    pub fn unassign(&mut self, range: SlotRange) {
        for owner in &mut self.owners[range.start as usize..=range.end as usize] {
            *owner = None;
        }
    }

    /// The node owning `slot`, if any
    #[must_use]
    pub fn owner(&self, slot: Slot) -> Option<&NodeId> {
        self.owners
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|index| &self.nodes[index])
    }

    /// All known nodes, in the order they were first registered
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Contiguous ranges owned by `node`, in ascending order
    #[must_use]
    pub fn ranges_for(&self, node: &NodeId) -> Vec<SlotRange> {
        let Some(index) = self.nodes.iter().position(|n| n == node) else {
            return Vec::new();
        };

        let mut ranges = Vec::new();
        let mut open: Option<Slot> = None;

        for (slot, owner) in self.owners.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let slot = slot as Slot;
            match (owner == &Some(index), open) {
                (true, None) => open = Some(slot),
                (false, Some(start)) => {
                    ranges.push(SlotRange { start, end: slot - 1 });
                    open = None;
                }
                _ => {}
            }
        }

        if let Some(start) = open {
            ranges.push(SlotRange {
                start,
                end: SLOT_COUNT - 1,
            });
        }

        ranges
    }

    /// Whether every slot has an owner
    #[must_use]
    pub fn is_fully_covered(&self) -> bool {
        self.owners.iter().all(Option::is_some)
    }

    fn node_index(&mut self, node: &NodeId) -> usize {
        if let Some(index) = self.nodes.iter().position(|n| n == node) {
            return index;
        }
        self.nodes.push(node.clone());
        self.nodes.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Topology, key_slot};

    #[test]
    fn test_split_evenly_covers_all_slots() {
        let nodes: Vec<_> = (1..=3).map(NodeId::from_seed).collect();
        let map = SlotMap::split_evenly(&nodes);

        assert!(map.is_fully_covered());
        assert_eq!(map.nodes(), nodes.as_slice());

        // 16384 = 3 * 5461 + 1, so the first node gets the extra slot
        assert_eq!(map.ranges_for(&nodes[0]), vec![SlotRange::new(0, 5461).unwrap()]);
        assert_eq!(
            map.ranges_for(&nodes[1]),
            vec![SlotRange::new(5462, 10922).unwrap()]
        );
        assert_eq!(
            map.ranges_for(&nodes[2]),
            vec![SlotRange::new(10923, 16383).unwrap()]
        );
    }

    #[test]
    fn test_assign_and_lookup() {
        let node1 = NodeId::from_seed(1);
        let node2 = NodeId::from_seed(2);
        let mut map = SlotMap::new();

        assert_eq!(
            map.node_for_slot(0),
            Err(TopologyError::SlotUnassigned(0))
        );

        map.assign(SlotRange::new(0, 8191).unwrap(), &node1);
        map.assign(SlotRange::new(8192, 16383).unwrap(), &node2);

        assert_eq!(map.node_for_slot(100).unwrap(), node1);
        assert_eq!(map.node_for_slot(9000).unwrap(), node2);

        // "foo" hashes to 12182
        assert_eq!(map.node_for_name("foo").unwrap(), node2);
        assert_eq!(key_slot("bar"), 5061);
        assert_eq!(map.node_for_name("bar").unwrap(), node1);

        // Reassign part of node2's slots back to node1
        map.assign(SlotRange::new(12000, 12999).unwrap(), &node1);
        assert_eq!(map.node_for_name("foo").unwrap(), node1);
        assert_eq!(map.ranges_for(&node2).len(), 2);
    }

    #[test]
    fn test_unassign_leaves_hole() {
        let node = NodeId::from_seed(1);
        let mut map = SlotMap::split_evenly(std::slice::from_ref(&node));
        map.unassign(SlotRange::new(10, 19).unwrap());

        assert!(!map.is_fully_covered());
        assert_eq!(map.owner(15), None);
        assert_eq!(map.owner(20), Some(&node));
        // A node with no slots is still part of the view
        assert_eq!(map.all_nodes().unwrap(), vec![node]);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(SlotRange::new(10, 5).is_err());
        assert!(SlotRange::new(0, SLOT_COUNT).is_err());
        assert_eq!(SlotRange::new(0, 0).unwrap().len(), 1);
    }
}
