//! A small inode filesystem with a single flat directory, stored on a fixed
//! size block device.
//!
//! [`Vfs`] is the entry point: it formats or mounts a device and exposes
//! create/open/read/write/seek/link/unlink/truncate/stat by name or
//! descriptor. [`FileSystem`] underneath owns the free-block bitmap, the inode
//! table and the directory and persists them to the reserved blocks at the
//! start of the device.
mod alloc;
mod error;
mod fs;
pub mod io;
mod layout;
mod node;
mod sb;
mod vfs;

pub use crate::alloc::State;
pub use crate::error::{LoadError, SFSError};
pub use crate::fs::FileSystem;
pub use crate::layout::{
    Layout, DEFAULT_INODE_CAPACITY, DIRECT_BLOCKS, INODE_RECORD_SIZE, MAX_NAME_LEN, SB_MAGIC,
};
pub use crate::node::{FileKind, Inode, InodeNumber};
pub use crate::sb::Directory;
pub use crate::vfs::{Fd, Stat, Vfs};
