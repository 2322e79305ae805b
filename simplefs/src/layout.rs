use crate::error::SFSError;

/// Identifies a formatted superblock, "MYFS" in ascii.
pub const SB_MAGIC: u32 = 0x4d59_4653;

/// Encoded size of one inode table slot.
pub const INODE_RECORD_SIZE: usize = 64;
/// Number of block pointers stored inline in every inode.
pub const DIRECT_BLOCKS: usize = 10;
pub const DEFAULT_INODE_CAPACITY: usize = 512;
/// Longest file name accepted in the directory.
pub const MAX_NAME_LEN: usize = 255;

/// Known locations.
pub const SUPERBLOCK_INDEX: usize = 0;
pub const DATA_REGION_BMP: usize = 1;
pub const INODE_START: usize = 2;

/// Geometry of a formatted filesystem. Fixed at mkfs time and recorded in the
/// superblock.
///
/// # Layout
/// ======================================================================
/// | SuperBlock + directory | Bitmap (all blocks) | Inode table | Data   |
/// ======================================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub block_size: usize,
    pub block_count: usize,
    pub inode_capacity: usize,
}

impl Layout {
    pub fn new(block_size: usize, block_count: usize, inode_capacity: usize) -> Self {
        Self {
            block_size,
            block_count,
            inode_capacity,
        }
    }

    /// Blocks holding the encoded inode table.
    pub fn inode_table_blocks(&self) -> usize {
        let bytes = self.inode_capacity * INODE_RECORD_SIZE;
        (bytes + self.block_size - 1) / self.block_size
    }

    /// Length of the permanently reserved prefix: superblock, bitmap and inode
    /// table.
    pub fn metadata_blocks(&self) -> usize {
        INODE_START + self.inode_table_blocks()
    }

    /// Largest file size addressable through direct blocks alone.
    pub fn max_file_size(&self) -> u64 {
        (DIRECT_BLOCKS * self.block_size) as u64
    }

    /// Whether `blocknr` lies in the data region.
    pub fn is_data_block(&self, blocknr: usize) -> bool {
        blocknr >= self.metadata_blocks() && blocknr < self.block_count
    }

    pub fn validate(&self) -> Result<(), SFSError> {
        if self.inode_capacity == 0 {
            return Err(SFSError::InvalidArgument(
                "inode capacity must be greater than zero".to_string(),
            ));
        }
        if self.block_size < INODE_RECORD_SIZE {
            return Err(SFSError::InvalidArgument(format!(
                "block size {} is smaller than an inode record",
                self.block_size
            )));
        }
        // The whole bitmap lives in a single block.
        if self.block_count > self.block_size * 8 {
            return Err(SFSError::InvalidArgument(format!(
                "{} blocks cannot be tracked by a {} byte bitmap",
                self.block_count, self.block_size
            )));
        }
        if self.block_count > u32::MAX as usize || self.inode_capacity > u32::MAX as usize {
            return Err(SFSError::InvalidArgument(
                "geometry exceeds 32-bit on-disk pointers".to_string(),
            ));
        }
        if self.metadata_blocks() >= self.block_count {
            return Err(SFSError::InvalidArgument(format!(
                "{} inodes need {} metadata blocks, device only has {}",
                self.inode_capacity,
                self.metadata_blocks(),
                self.block_count
            )));
        }
        Ok(())
    }
}
