use thiserror::Error;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// 4k is a common block size for file systems. Disks commonly are composed of
/// 512 byte blocks mapping each file system block to 8 hard disk blocks.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// 1024 blocks of 4k make a 4MiB device.
pub const DEFAULT_BLOCK_COUNT: usize = 1024;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block {blocknr} out of range, device has {count} blocks")]
    OutOfRange { blocknr: BlockNumber, count: usize },
    #[error("backing store already exists")]
    AlreadyInitialized,
    #[error("backing store has not been initialized")]
    Uninitialized,
    #[error("buffer of {len} bytes cannot hold a {block_size} byte block")]
    BufferTooSmall { len: usize, block_size: usize },
    #[error("device io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Tried to map as closely as possible to the prescribed interface found here:
/// http://web.mit.edu/6.033/1997/handouts/html/04sfs.html.
///
/// In cases where implementing the interface as described would lead to non-idiomatic
/// rust code, I opted to use a more rust-y interface.
pub trait BlockStorage {
    /// Size in bytes of every block on the device.
    fn block_size(&self) -> usize;

    /// Total number of addressable blocks.
    fn block_count(&self) -> usize;

    /// Reports whether a backing store has been initialized.
    fn exists(&self) -> bool;

    /// Creates a zero filled backing store of `block_size * block_count` bytes.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if a backing store exists; an existing store
    /// is never overwritten.
    fn initialize(&mut self) -> Result<(), BlockError>;

    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Writes provided buffer into the specified block number. Buffers shorter
    /// than a block are zero padded, longer buffers are truncated to the block
    /// size without error.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), BlockError>;

    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> Result<(), BlockError>;

    /// Reads a whole block into a freshly allocated buffer of exactly
    /// `block_size` bytes.
    fn read(&mut self, blocknr: BlockNumber) -> Result<Vec<u8>, BlockError> {
        let mut buf = vec![0; self.block_size()];
        self.read_block(blocknr, &mut buf)?;
        Ok(buf)
    }
}

/// Shared bounds check for emulators.
pub(crate) fn check_range(blocknr: BlockNumber, count: usize) -> Result<(), BlockError> {
    if blocknr >= count {
        return Err(BlockError::OutOfRange { blocknr, count });
    }
    Ok(())
}

/// Normalizes `buf` to exactly one block: zero padded on the right or cut at
/// `block_size`.
pub(crate) fn fit_to_block(buf: &[u8], block_size: usize) -> Vec<u8> {
    let mut block = vec![0x00; block_size];
    let max = std::cmp::min(block_size, buf.len());
    block[..max].copy_from_slice(&buf[..max]);
    block
}
