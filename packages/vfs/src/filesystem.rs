//! The virtual filesystem and its descriptor operations.

use std::collections::BTreeMap;

use p2shim_core::{Datetime, ErrorCode, StreamId};
use tracing::debug;

use crate::descriptor::{Descriptor, DescriptorTable, DirectoryEntryStream, NodeId};
use crate::node::{Node, NodeArena};
use crate::snapshot::{FsSnapshot, SnapshotEntry, SnapshotError};
use crate::types::{
    DescriptorFlags, DescriptorStat, DescriptorType, DirectoryEntry, OpenFlags, PathFlags,
};

/// Largest size a file may grow to through `write` or `set_size`.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

/// An in-memory directory tree plus the descriptors open on it.
#[derive(Debug)]
pub struct VirtualFileSystem {
    nodes: NodeArena,
    root: NodeId,
    cwd: String,
    preopen: Descriptor,
    descriptors: DescriptorTable,
}

impl VirtualFileSystem {
    /// Build a filesystem from a snapshot. `cwd` is the absolute path the
    /// whole-path `.` resolves to.
    pub fn from_snapshot(snapshot: &FsSnapshot, cwd: &str) -> Result<Self, SnapshotError> {
        let mut nodes = NodeArena::default();
        let root = nodes.insert(Node::empty_directory());
        load_directory(&mut nodes, root, &snapshot.dir, "")?;

        let mut descriptors = DescriptorTable::default();
        nodes.retain(root);
        let preopen = descriptors.insert(root, DescriptorFlags::DIRECTORY);

        debug!(nodes = nodes.len(), cwd, "Loaded filesystem snapshot");

        Ok(Self {
            nodes,
            root,
            cwd: cwd.to_string(),
            preopen,
            descriptors,
        })
    }

    /// The descriptor for `/`, opened at construction.
    pub fn root(&self) -> Descriptor {
        self.preopen
    }

    /// Preopened directories offered to the guest.
    pub fn preopens(&self) -> Vec<(Descriptor, String)> {
        vec![(self.preopen, "/".to_string())]
    }

    /// Number of currently open descriptors.
    pub fn open_descriptors(&self) -> usize {
        self.descriptors.len()
    }

    pub fn open_at(
        &mut self,
        dir: Descriptor,
        _path_flags: PathFlags,
        path: &str,
        open_flags: OpenFlags,
        flags: DescriptorFlags,
    ) -> Result<Descriptor, ErrorCode> {
        let (start, segments) = self.resolve_start(dir, path)?;

        let Some((name, parents)) = segments.split_last() else {
            if open_flags.create && open_flags.exclusive {
                return Err(ErrorCode::Exist);
            }
            return Ok(self.open_node(start, flags));
        };

        let parent = self.walk(start, parents)?;
        let existing = self.children(parent)?.get(name).copied();
        let node = match existing {
            Some(existing) => {
                if open_flags.create && open_flags.exclusive {
                    return Err(ErrorCode::Exist);
                }
                match self.nodes.get_mut(existing)? {
                    Node::File { .. } if open_flags.directory => {
                        return Err(ErrorCode::NotDirectory)
                    }
                    Node::File { bytes, modified } if open_flags.truncate => {
                        bytes.clear();
                        *modified = Datetime::now();
                    }
                    Node::Directory { .. } if open_flags.truncate => {
                        return Err(ErrorCode::IsDirectory)
                    }
                    _ => {}
                }
                existing
            }
            None if open_flags.create => {
                let node = if open_flags.directory {
                    Node::empty_directory()
                } else {
                    Node::File {
                        bytes: Vec::new(),
                        modified: Datetime::now(),
                    }
                };
                self.attach(parent, name, node)?
            }
            None => return Err(ErrorCode::NoEntry),
        };

        Ok(self.open_node(node, flags))
    }

    /// Read up to `len` bytes at `offset`. The flag is true when the read
    /// reached the end of the file.
    pub fn read(
        &self,
        descriptor: Descriptor,
        len: u64,
        offset: u64,
    ) -> Result<(Vec<u8>, bool), ErrorCode> {
        let node = self.descriptors.get(descriptor)?.node;
        let Node::File { bytes, .. } = self.nodes.get(node)? else {
            return Err(ErrorCode::IsDirectory);
        };

        let size = bytes.len() as u64;
        let start = offset.min(size);
        let end = offset.saturating_add(len).min(size);
        let data = bytes[start as usize..end as usize].to_vec();
        let eof = offset.saturating_add(data.len() as u64) >= size;
        Ok((data, eof))
    }

    /// Write `data` at `offset`, growing the file (zero-filled) as needed.
    /// Returns the number of bytes written.
    pub fn write(
        &mut self,
        descriptor: Descriptor,
        data: &[u8],
        offset: u64,
    ) -> Result<u64, ErrorCode> {
        let node = self.descriptors.get(descriptor)?.node;
        let Node::File { bytes, modified } = self.nodes.get_mut(node)? else {
            return Err(ErrorCode::IsDirectory);
        };

        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or(ErrorCode::FileTooLarge)?;
        if end as usize > bytes.len() {
            bytes.resize(end as usize, 0);
        }
        bytes[offset as usize..end as usize].copy_from_slice(data);
        *modified = Datetime::now();
        Ok(data.len() as u64)
    }

    /// Truncate or zero-extend a file.
    pub fn set_size(&mut self, descriptor: Descriptor, size: u64) -> Result<(), ErrorCode> {
        let node = self.descriptors.get(descriptor)?.node;
        let Node::File { bytes, modified } = self.nodes.get_mut(node)? else {
            return Err(ErrorCode::IsDirectory);
        };
        if size > MAX_FILE_SIZE {
            return Err(ErrorCode::FileTooLarge);
        }
        bytes.resize(size as usize, 0);
        *modified = Datetime::now();
        Ok(())
    }

    pub fn read_directory(
        &self,
        descriptor: Descriptor,
    ) -> Result<DirectoryEntryStream, ErrorCode> {
        let node = self.descriptors.get(descriptor)?.node;
        let Node::Directory { children } = self.nodes.get(node)? else {
            return Err(ErrorCode::BadDescriptor);
        };

        let entries: Vec<DirectoryEntry> = children
            .iter()
            .map(|(name, child)| {
                Ok(DirectoryEntry {
                    descriptor_type: self.nodes.get(*child)?.descriptor_type(),
                    name: name.clone(),
                })
            })
            .collect::<Result<_, ErrorCode>>()?;
        Ok(DirectoryEntryStream::new(entries))
    }

    pub fn stat(&self, descriptor: Descriptor) -> Result<DescriptorStat, ErrorCode> {
        let node = self.descriptors.get(descriptor)?.node;
        self.stat_node(node)
    }

    pub fn stat_at(
        &self,
        dir: Descriptor,
        _path_flags: PathFlags,
        path: &str,
    ) -> Result<DescriptorStat, ErrorCode> {
        let (start, segments) = self.resolve_start(dir, path)?;
        let node = self.walk(start, &segments)?;
        self.stat_node(node)
    }

    pub fn get_type(&self, descriptor: Descriptor) -> Result<DescriptorType, ErrorCode> {
        let node = self.descriptors.get(descriptor)?.node;
        Ok(self.nodes.get(node)?.descriptor_type())
    }

    pub fn get_flags(&self, descriptor: Descriptor) -> Result<DescriptorFlags, ErrorCode> {
        Ok(self.descriptors.get(descriptor)?.flags)
    }

    pub fn set_flags(
        &mut self,
        descriptor: Descriptor,
        flags: DescriptorFlags,
    ) -> Result<(), ErrorCode> {
        self.descriptors.get_mut(descriptor)?.flags = flags;
        Ok(())
    }

    /// Nothing is buffered, so syncing only validates the descriptor.
    pub fn sync(&self, descriptor: Descriptor) -> Result<(), ErrorCode> {
        self.descriptors.get(descriptor).map(|_| ())
    }

    pub fn sync_data(&self, descriptor: Descriptor) -> Result<(), ErrorCode> {
        self.sync(descriptor)
    }

    pub fn is_same_object(&self, a: Descriptor, b: Descriptor) -> Result<bool, ErrorCode> {
        Ok(self.descriptors.get(a)?.node == self.descriptors.get(b)?.node)
    }

    pub fn create_directory_at(&mut self, dir: Descriptor, path: &str) -> Result<(), ErrorCode> {
        let (start, segments) = self.resolve_start(dir, path)?;
        let Some((name, parents)) = segments.split_last() else {
            return Err(ErrorCode::Exist);
        };
        let parent = self.walk(start, parents)?;
        if self.children(parent)?.contains_key(name) {
            return Err(ErrorCode::Exist);
        }
        self.attach(parent, name, Node::empty_directory())?;
        Ok(())
    }

    pub fn unlink_file_at(&mut self, dir: Descriptor, path: &str) -> Result<(), ErrorCode> {
        let (parent, name, node) = self.resolve_entry(dir, path)?;
        if let Node::Directory { .. } = self.nodes.get(node)? {
            return Err(ErrorCode::IsDirectory);
        }
        self.detach(parent, &name)
    }

    pub fn remove_directory_at(&mut self, dir: Descriptor, path: &str) -> Result<(), ErrorCode> {
        let (parent, name, node) = self.resolve_entry(dir, path)?;
        let empty = match self.nodes.get(node)? {
            Node::File { .. } => return Err(ErrorCode::NotDirectory),
            Node::Directory { children } => children.is_empty(),
        };
        if !empty {
            return Err(ErrorCode::NotEmpty);
        }
        self.detach(parent, &name)
    }

    /// Release a descriptor. Using it afterwards fails with `bad-descriptor`.
    ///
    /// Dropping the last descriptor on an unlinked file frees its contents.
    pub fn drop_descriptor(&mut self, descriptor: Descriptor) -> Result<(), ErrorCode> {
        let open = self.descriptors.remove(descriptor)?;
        self.nodes.release(open.node);
        Ok(())
    }

    pub fn link_at(
        &mut self,
        _old_dir: Descriptor,
        _old_path_flags: PathFlags,
        _old_path: &str,
        _new_dir: Descriptor,
        _new_path: &str,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn symlink_at(
        &mut self,
        _dir: Descriptor,
        _old_path: &str,
        _new_path: &str,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn readlink_at(&self, _dir: Descriptor, _path: &str) -> Result<String, ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn rename_at(
        &mut self,
        _old_dir: Descriptor,
        _old_path: &str,
        _new_dir: Descriptor,
        _new_path: &str,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn set_times(
        &mut self,
        _descriptor: Descriptor,
        _access: Option<Datetime>,
        _modification: Option<Datetime>,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn set_times_at(
        &mut self,
        _dir: Descriptor,
        _path_flags: PathFlags,
        _path: &str,
        _access: Option<Datetime>,
        _modification: Option<Datetime>,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn read_via_stream(
        &self,
        _descriptor: Descriptor,
        _offset: u64,
    ) -> Result<StreamId, ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn write_via_stream(
        &mut self,
        _descriptor: Descriptor,
        _offset: u64,
    ) -> Result<StreamId, ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    pub fn append_via_stream(&mut self, _descriptor: Descriptor) -> Result<StreamId, ErrorCode> {
        Err(ErrorCode::Unsupported)
    }

    /// Split a path into the node it starts from and its segments.
    ///
    /// The whole path `.` is the working directory, taken from the root.
    /// `.` segments and empty segments are skipped; any `..` is `no-entry`.
    fn resolve_start(
        &self,
        dir: Descriptor,
        path: &str,
    ) -> Result<(NodeId, Vec<String>), ErrorCode> {
        let base = self.descriptors.get(dir)?.node;
        self.children(base)?;

        let (start, path) = if path == "." {
            (self.root, self.cwd.as_str())
        } else {
            (base, path)
        };

        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(ErrorCode::NoEntry),
                name => segments.push(name.to_string()),
            }
        }
        Ok((start, segments))
    }

    /// Follow `segments` from `start`. Passing through a file is
    /// `not-directory`; a missing segment is `no-entry`.
    fn walk(&self, start: NodeId, segments: &[String]) -> Result<NodeId, ErrorCode> {
        let mut current = start;
        for segment in segments {
            current = *self
                .children(current)?
                .get(segment)
                .ok_or(ErrorCode::NoEntry)?;
        }
        Ok(current)
    }

    /// Resolve an existing, non-root entry to (parent, name, node).
    fn resolve_entry(
        &self,
        dir: Descriptor,
        path: &str,
    ) -> Result<(NodeId, String, NodeId), ErrorCode> {
        let (start, mut segments) = self.resolve_start(dir, path)?;
        let name = segments.pop().ok_or(ErrorCode::Invalid)?;
        let parent = self.walk(start, &segments)?;
        let node = *self
            .children(parent)?
            .get(&name)
            .ok_or(ErrorCode::NoEntry)?;
        Ok((parent, name, node))
    }

    fn children(&self, node: NodeId) -> Result<&BTreeMap<String, NodeId>, ErrorCode> {
        match self.nodes.get(node)? {
            Node::Directory { children } => Ok(children),
            Node::File { .. } => Err(ErrorCode::NotDirectory),
        }
    }

    fn open_node(&mut self, node: NodeId, flags: DescriptorFlags) -> Descriptor {
        self.nodes.retain(node);
        self.descriptors.insert(node, flags)
    }

    /// Link a new node under `parent`. A directory that has itself been
    /// removed takes no new entries.
    fn attach(&mut self, parent: NodeId, name: &str, node: Node) -> Result<NodeId, ErrorCode> {
        self.children(parent)?;
        if !self.nodes.is_linked(parent) {
            return Err(ErrorCode::NoEntry);
        }
        let id = self.nodes.insert(node);
        if let Node::Directory { children } = self.nodes.get_mut(parent)? {
            children.insert(name.to_string(), id);
        }
        Ok(id)
    }

    /// Unlink an entry from its parent. The node lives on while a
    /// descriptor still refers to it, as with an unlinked-but-open file.
    fn detach(&mut self, parent: NodeId, name: &str) -> Result<(), ErrorCode> {
        let Node::Directory { children } = self.nodes.get_mut(parent)? else {
            return Err(ErrorCode::NotDirectory);
        };
        let id = children.remove(name).ok_or(ErrorCode::NoEntry)?;
        self.nodes.unlink(id);
        Ok(())
    }

    fn stat_node(&self, node: NodeId) -> Result<DescriptorStat, ErrorCode> {
        let node = self.nodes.get(node)?;
        let (size, modified) = match node {
            Node::Directory { .. } => (0, Datetime::EPOCH),
            Node::File { bytes, modified } => (bytes.len() as u64, *modified),
        };
        Ok(DescriptorStat {
            descriptor_type: node.descriptor_type(),
            link_count: 1,
            size,
            data_access_timestamp: Datetime::EPOCH,
            data_modification_timestamp: modified,
            status_change_timestamp: Datetime::EPOCH,
        })
    }
}

fn load_directory(
    nodes: &mut NodeArena,
    parent: NodeId,
    entries: &BTreeMap<String, SnapshotEntry>,
    prefix: &str,
) -> Result<(), SnapshotError> {
    for (name, entry) in entries {
        let path = format!("{}/{}", prefix, name);
        let id = match entry {
            SnapshotEntry::Directory { dir } => {
                let id = nodes.insert(Node::empty_directory());
                load_directory(nodes, id, dir, &path)?;
                id
            }
            SnapshotEntry::File { source } => nodes.insert(Node::File {
                bytes: source.to_bytes(&path)?,
                modified: Datetime::EPOCH,
            }),
        };
        if let Ok(Node::Directory { children }) = nodes.get_mut(parent) {
            children.insert(name.clone(), id);
        }
    }
    Ok(())
}
