//! Fixed-size block storage used as the "disk" underneath simplefs.
//!
//! A device is a logical array of `block_count` blocks of `block_size` bytes.
//! Two emulators are provided: one backed by an image file and one held in
//! memory.
mod blockio;
mod emulator;
mod memory;

pub use blockio::{
    BlockError, BlockNumber, BlockStorage, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE,
};
pub use emulator::{FileBlockEmulator, FileBlockEmulatorBuilder};
pub use memory::MemoryBlockEmulator;
