//! # p2shim-vfs
//!
//! The in-memory filesystem the guest's filesystem calls resolve against.
//!
//! The tree is seeded once from an [`FsSnapshot`], mutated only through
//! [`Descriptor`] operations, and discarded with the session. Nothing here
//! blocks or suspends.
//!
//! ## Shape
//!
//! ```text
//! VirtualFileSystem
//!   nodes:       [Directory{children} | File{bytes, mtime}]   (arena, no parent links)
//!   descriptors: [slot(generation, node)]                      (arena, generation-checked)
//! ```
//!
//! A node is freed once it is unlinked and no descriptor refers to it.
//!
//! Nodes carry no parent links, so `..` can never be resolved: any `..`
//! segment fails with [`ErrorCode::NoEntry`](p2shim_core::ErrorCode::NoEntry).
//!
//! ## Example
//!
//! ```rust
//! use p2shim_vfs::{DescriptorFlags, FsSnapshot, OpenFlags, PathFlags, VirtualFileSystem};
//!
//! let snapshot = FsSnapshot::new().with_directory("tmp");
//! let mut fs = VirtualFileSystem::from_snapshot(&snapshot, "/").unwrap();
//! let root = fs.root();
//!
//! let file = fs
//!     .open_at(root, PathFlags::default(), "tmp/a.txt", OpenFlags::CREATE, DescriptorFlags::READ_WRITE)
//!     .unwrap();
//! fs.write(file, b"hi", 0).unwrap();
//! assert_eq!(fs.read(file, 2, 0).unwrap(), (b"hi".to_vec(), true));
//! ```

mod descriptor;
mod filesystem;
mod node;
mod snapshot;
mod types;

pub use descriptor::{Descriptor, DirectoryEntryStream};
pub use filesystem::{VirtualFileSystem, MAX_FILE_SIZE};
pub use snapshot::{FileSource, FsSnapshot, SnapshotEntry, SnapshotError};
pub use types::{
    DescriptorFlags, DescriptorStat, DescriptorType, DirectoryEntry, OpenFlags, PathFlags,
};
