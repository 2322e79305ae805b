use fileblock::BlockError;
use thiserror::Error;

use crate::node::InodeNumber;
use crate::vfs::Fd;

#[derive(Error, Debug)]
pub enum SFSError {
    #[error("backing store already exists, refusing to format over it")]
    StoreExists,
    #[error("found no file named {0:?}")]
    DoesNotExist(String),
    #[error("file {0:?} already exists")]
    AlreadyExists(String),
    #[error("bad file descriptor {0}")]
    BadDescriptor(Fd),
    #[error("inode {0} is referenced but not allocated")]
    DanglingInode(InodeNumber),
    #[error("no free inodes")]
    NoFreeInodes,
    #[error("directory no longer fits in the superblock")]
    DirectoryFull,
    #[error("size {requested} exceeds the maximum file size of {max} bytes")]
    FileTooLarge { requested: u64, max: u64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no usable filesystem: {0}")]
    Load(#[from] LoadError),
    #[error("block device error: {0}")]
    Device(#[from] BlockError),
}

/// Distinct reasons a stored filesystem could not be loaded. The boolean
/// `FileSystem::load_metadata` collapses these into one flag; the variants are
/// kept for logging and for callers that want the cause.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("superblock magic {found:#010x} is not a simplefs image")]
    BadMagic { found: u32 },
    #[error("image geometry ({block_size} x {blocks_count}) does not match the device")]
    GeometryMismatch {
        block_size: usize,
        blocks_count: usize,
    },
    #[error("stored layout is unusable: {0}")]
    BadLayout(String),
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("malformed directory entry {0}")]
    MalformedEntry(usize),
    #[error("malformed inode record in slot {0}")]
    MalformedRecord(usize),
    #[error("reserved block {0} is marked free in the bitmap")]
    ReservedBlockFree(usize),
    #[error("device read failed: {0}")]
    Device(#[from] BlockError),
}
