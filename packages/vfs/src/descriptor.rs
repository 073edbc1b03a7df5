//! Descriptor handles and the table that owns them.

use p2shim_core::ErrorCode;

use crate::types::{DescriptorFlags, DirectoryEntry};

/// Index of a node in the filesystem arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

/// An opaque handle to an open filesystem object.
///
/// Handles are generation-checked: once dropped, a handle (and every copy of
/// it) fails with `bad-descriptor`, even if its slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    index: u32,
    generation: u32,
}

impl Descriptor {
    /// The raw slot index, for hosts that hand descriptors to guests as integers.
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenDescriptor {
    pub(crate) node: NodeId,
    pub(crate) flags: DescriptorFlags,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    open: Option<OpenDescriptor>,
}

#[derive(Debug, Default)]
pub(crate) struct DescriptorTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl DescriptorTable {
    pub(crate) fn insert(&mut self, node: NodeId, flags: DescriptorFlags) -> Descriptor {
        let open = Some(OpenDescriptor { node, flags });
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.open = open;
            return Descriptor {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            open,
        });
        Descriptor {
            index,
            generation: 0,
        }
    }

    pub(crate) fn get(&self, descriptor: Descriptor) -> Result<OpenDescriptor, ErrorCode> {
        self.slots
            .get(descriptor.index as usize)
            .filter(|slot| slot.generation == descriptor.generation)
            .and_then(|slot| slot.open)
            .ok_or(ErrorCode::BadDescriptor)
    }

    pub(crate) fn get_mut(
        &mut self,
        descriptor: Descriptor,
    ) -> Result<&mut OpenDescriptor, ErrorCode> {
        self.slots
            .get_mut(descriptor.index as usize)
            .filter(|slot| slot.generation == descriptor.generation)
            .and_then(|slot| slot.open.as_mut())
            .ok_or(ErrorCode::BadDescriptor)
    }

    pub(crate) fn remove(&mut self, descriptor: Descriptor) -> Result<OpenDescriptor, ErrorCode> {
        let slot = self
            .slots
            .get_mut(descriptor.index as usize)
            .filter(|slot| slot.generation == descriptor.generation)
            .ok_or(ErrorCode::BadDescriptor)?;
        let open = slot.open.take().ok_or(ErrorCode::BadDescriptor)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(descriptor.index);
        Ok(open)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

/// Entries of a directory, captured when `read_directory` was called.
///
/// Yields each entry exactly once, in ascending name order, then `None`.
/// Later changes to the directory are not reflected.
#[derive(Debug, Clone)]
pub struct DirectoryEntryStream {
    entries: Vec<DirectoryEntry>,
    position: usize,
}

impl DirectoryEntryStream {
    pub(crate) fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self {
            entries,
            position: 0,
        }
    }

    pub fn read_directory_entry(&mut self) -> Option<DirectoryEntry> {
        let entry = self.entries.get(self.position).cloned()?;
        self.position += 1;
        Some(entry)
    }
}

impl Iterator for DirectoryEntryStream {
    type Item = DirectoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_directory_entry()
    }
}
