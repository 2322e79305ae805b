use crate::blockio::{check_range, fit_to_block, BlockError, BlockNumber, BlockStorage};

/// Block storage held entirely in process memory. Contents are lost when the
/// emulator is dropped.
pub struct MemoryBlockEmulator {
    blocks: Option<Vec<u8>>,
    block_size: usize,
    block_count: usize,
}

impl MemoryBlockEmulator {
    /// Creates an uninitialized device; call `initialize` before use.
    pub fn new(block_size: usize, block_count: usize) -> Self {
        debug_assert!(block_size > 0 && block_count > 0);
        Self {
            blocks: None,
            block_size,
            block_count,
        }
    }

    fn span(&self, blocknr: BlockNumber) -> Result<std::ops::Range<usize>, BlockError> {
        check_range(blocknr, self.block_count)?;
        let start = blocknr * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockStorage for MemoryBlockEmulator {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn exists(&self) -> bool {
        self.blocks.is_some()
    }

    fn initialize(&mut self) -> Result<(), BlockError> {
        if self.blocks.is_some() {
            return Err(BlockError::AlreadyInitialized);
        }
        self.blocks = Some(vec![0x00; self.block_size * self.block_count]);
        Ok(())
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() < self.block_size {
            return Err(BlockError::BufferTooSmall {
                len: buf.len(),
                block_size: self.block_size,
            });
        }
        let span = self.span(blocknr)?;
        let blocks = self.blocks.as_ref().ok_or(BlockError::Uninitialized)?;
        buf[..self.block_size].copy_from_slice(&blocks[span]);
        Ok(())
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), BlockError> {
        let span = self.span(blocknr)?;
        let block = fit_to_block(buf, self.block_size);
        let blocks = self.blocks.as_mut().ok_or(BlockError::Uninitialized)?;
        blocks[span].copy_from_slice(&block);
        Ok(())
    }

    fn sync_disk(&mut self) -> Result<(), BlockError> {
        Ok(())
    }
}
