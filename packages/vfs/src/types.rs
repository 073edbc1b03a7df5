//! Guest-facing filesystem value types.

use p2shim_core::Datetime;
use serde::{Deserialize, Serialize};

/// The type of a filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DescriptorType {
    Unknown,
    BlockDevice,
    CharacterDevice,
    Directory,
    Fifo,
    SymbolicLink,
    RegularFile,
    Socket,
}

/// Flags a descriptor was opened with.
///
/// Recorded and reported back by `get_flags`; the in-memory filesystem
/// does not enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DescriptorFlags {
    pub read: bool,
    pub write: bool,
    pub file_integrity_sync: bool,
    pub data_integrity_sync: bool,
    pub requested_write_sync: bool,
    pub mutate_directory: bool,
}

impl DescriptorFlags {
    pub const READ: Self = Self {
        read: true,
        write: false,
        file_integrity_sync: false,
        data_integrity_sync: false,
        requested_write_sync: false,
        mutate_directory: false,
    };

    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        file_integrity_sync: false,
        data_integrity_sync: false,
        requested_write_sync: false,
        mutate_directory: false,
    };

    /// Flags given to the preopened root.
    pub const DIRECTORY: Self = Self {
        read: true,
        write: false,
        file_integrity_sync: false,
        data_integrity_sync: false,
        requested_write_sync: false,
        mutate_directory: true,
    };
}

/// Flags controlling path resolution. There are no symlinks, so
/// `symlink_follow` has no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathFlags {
    pub symlink_follow: bool,
}

/// Flags for `open_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Create the final path segment if it is missing.
    pub create: bool,
    /// Require (or create) a directory.
    pub directory: bool,
    /// With `create`, fail with `exist` if the entry is already there.
    pub exclusive: bool,
    /// Truncate an existing regular file to zero length.
    pub truncate: bool,
}

impl OpenFlags {
    pub const CREATE: Self = Self {
        create: true,
        directory: false,
        exclusive: false,
        truncate: false,
    };

    pub const CREATE_EXCLUSIVE: Self = Self {
        create: true,
        directory: false,
        exclusive: true,
        truncate: false,
    };

    pub const DIRECTORY: Self = Self {
        create: false,
        directory: true,
        exclusive: false,
        truncate: false,
    };
}

/// Result of `stat` / `stat_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorStat {
    pub descriptor_type: DescriptorType,
    pub link_count: u64,
    pub size: u64,
    pub data_access_timestamp: Datetime,
    pub data_modification_timestamp: Datetime,
    pub status_change_timestamp: Datetime,
}

/// One entry yielded by a [`DirectoryEntryStream`](crate::DirectoryEntryStream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub descriptor_type: DescriptorType,
    pub name: String,
}
