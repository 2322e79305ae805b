//! Block devices simplefs can be stored on.
pub use fileblock::{
    BlockError, BlockNumber, BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder,
    MemoryBlockEmulator, DEFAULT_BLOCK_COUNT, DEFAULT_BLOCK_SIZE,
};
