//! Filesystem nodes and the arena that owns them.
//!
//! A node lives while it is linked into the tree or held by an open
//! descriptor. Once it is neither, its slot is freed and reused.

use std::collections::BTreeMap;

use p2shim_core::{Datetime, ErrorCode};

use crate::descriptor::NodeId;
use crate::types::DescriptorType;

#[derive(Debug)]
pub(crate) enum Node {
    Directory { children: BTreeMap<String, NodeId> },
    File { bytes: Vec<u8>, modified: Datetime },
}

impl Node {
    pub(crate) fn empty_directory() -> Self {
        Node::Directory {
            children: BTreeMap::new(),
        }
    }

    pub(crate) fn descriptor_type(&self) -> DescriptorType {
        match self {
            Node::Directory { .. } => DescriptorType::Directory,
            Node::File { .. } => DescriptorType::RegularFile,
        }
    }
}

#[derive(Debug)]
struct Slot {
    node: Node,
    linked: bool,
    open: usize,
}

#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl NodeArena {
    /// Store a node that is linked into the tree (or is the root).
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let slot = Some(Slot {
            node,
            linked: true,
            open: 0,
        });
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                NodeId(index)
            }
            None => {
                self.slots.push(slot);
                NodeId(self.slots.len() - 1)
            }
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&Node, ErrorCode> {
        self.slot(id).map(|slot| &slot.node)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, ErrorCode> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|slot| &mut slot.node)
            .ok_or(ErrorCode::NoEntry)
    }

    /// Whether the node is still reachable from the root.
    pub(crate) fn is_linked(&self, id: NodeId) -> bool {
        self.slot(id).map(|slot| slot.linked).unwrap_or(false)
    }

    /// A descriptor was opened on the node.
    pub(crate) fn retain(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            slot.open += 1;
        }
    }

    /// A descriptor on the node was dropped.
    pub(crate) fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            slot.open = slot.open.saturating_sub(1);
        }
        self.collect(id);
    }

    /// The node was removed from its parent directory.
    pub(crate) fn unlink(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) {
            slot.linked = false;
        }
        self.collect(id);
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn slot(&self, id: NodeId) -> Result<&Slot, ErrorCode> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ErrorCode::NoEntry)
    }

    fn collect(&mut self, id: NodeId) {
        let unreachable = matches!(
            self.slots.get(id.0),
            Some(Some(Slot { linked: false, open: 0, .. }))
        );
        if unreachable {
            self.slots[id.0] = None;
            self.free.push(id.0);
        }
    }
}

#[cfg(test)]
impl NodeArena {
    /// Total bytes held by live file nodes.
    pub(crate) fn file_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|slot| match &slot.node {
                Node::File { bytes, .. } => bytes.len(),
                Node::Directory { .. } => 0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(len: usize) -> Node {
        Node::File {
            bytes: vec![7; len],
            modified: Datetime::EPOCH,
        }
    }

    #[test]
    fn unlinked_node_without_descriptors_is_freed() {
        let mut arena = NodeArena::default();
        let id = arena.insert(file(16));
        arena.unlink(id);
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.get(id).unwrap_err(), ErrorCode::NoEntry);
    }

    #[test]
    fn open_descriptor_keeps_unlinked_node_alive() {
        let mut arena = NodeArena::default();
        let id = arena.insert(file(16));
        arena.retain(id);
        arena.retain(id);
        arena.unlink(id);
        assert!(arena.get(id).is_ok());
        assert!(!arena.is_linked(id));

        arena.release(id);
        assert!(arena.get(id).is_ok());
        arena.release(id);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn linked_node_survives_last_descriptor() {
        let mut arena = NodeArena::default();
        let id = arena.insert(file(1));
        arena.retain(id);
        arena.release(id);
        assert!(arena.get(id).is_ok());
        assert!(arena.is_linked(id));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut arena = NodeArena::default();
        let first = arena.insert(file(1));
        arena.unlink(first);
        let second = arena.insert(file(2));
        assert_eq!(first, second);
        assert_eq!(arena.len(), 1);
    }
}
