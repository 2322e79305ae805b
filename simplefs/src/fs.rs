use std::collections::HashSet;

use fileblock::{BlockNumber, BlockStorage};
use log::{debug, info, warn};

use crate::alloc::{Bitmap, State};
use crate::error::{LoadError, SFSError};
use crate::layout::{
    Layout, DATA_REGION_BMP, DEFAULT_INODE_CAPACITY, INODE_START, SUPERBLOCK_INDEX,
};
use crate::node::{Inode, InodeNumber, InodeTable};
use crate::sb::{Directory, SuperBlock};

/// Allocation and metadata layer. Owns the device together with the free-block
/// bitmap, the inode table and the directory, and persists all three to the
/// reserved prefix of the device.
///
/// Every piece of metadata is rewritten on each `save_metadata`; there is no
/// log, so the image on disk is only as current as the last save.
pub struct FileSystem<T: BlockStorage> {
    dev: T,
    layout: Layout,
    data_map: Bitmap,
    inodes: InodeTable,
    directory: Directory,
}

impl<T: BlockStorage> FileSystem<T> {
    /// Wraps a device without touching it. The filesystem is unusable until it
    /// is either formatted or loaded.
    pub fn new(dev: T) -> Self {
        Self::with_capacity(dev, DEFAULT_INODE_CAPACITY)
    }

    pub fn with_capacity(dev: T, inode_capacity: usize) -> Self {
        let layout = Layout::new(dev.block_size(), dev.block_count(), inode_capacity);
        Self {
            data_map: Bitmap::new(layout.block_count),
            inodes: InodeTable::new(inode_capacity),
            directory: Directory::new(),
            layout,
            dev,
        }
    }

    /// Loads an existing filesystem from the device.
    pub fn open(dev: T) -> Result<Self, SFSError> {
        let mut fs = Self::new(dev);
        fs.try_load_metadata()?;
        Ok(fs)
    }

    /// Creates the backing store and writes an empty filesystem with room for
    /// `inode_capacity` files. Refuses to run over an existing store.
    pub fn format(&mut self, inode_capacity: usize) -> Result<(), SFSError> {
        if self.dev.exists() {
            return Err(SFSError::StoreExists);
        }
        let layout = Layout::new(self.dev.block_size(), self.dev.block_count(), inode_capacity);
        layout.validate()?;
        self.dev.initialize()?;

        self.layout = layout;
        self.data_map = Bitmap::new(layout.block_count);
        self.inodes = InodeTable::new(inode_capacity);
        self.directory.clear();
        self.reserve_metadata_blocks();
        self.save_metadata()?;

        info!(
            "formatted {} blocks of {} bytes with {} inodes, {} metadata blocks",
            layout.block_count,
            layout.block_size,
            inode_capacity,
            layout.metadata_blocks()
        );
        Ok(())
    }

    /// Marks the superblock, bitmap and inode table blocks as used. Only called
    /// when formatting; loaded images carry the reservation in their bitmap.
    pub fn reserve_metadata_blocks(&mut self) {
        for blocknr in 0..self.layout.metadata_blocks() {
            self.data_map.set_reserved(blocknr);
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn device(&self) -> &T {
        &self.dev
    }

    pub fn into_device(self) -> T {
        self.dev
    }

    pub fn find_free_block(&self) -> Option<BlockNumber> {
        self.data_map.first_free()
    }

    pub fn allocate_block(&mut self) -> Option<BlockNumber> {
        let blocknr = self.find_free_block()?;
        self.data_map.set_reserved(blocknr);
        debug!("allocated block {}", blocknr);
        Some(blocknr)
    }

    /// Returns a block to the free pool. Metadata blocks are never released and
    /// out of range numbers are ignored.
    pub fn free_block(&mut self, blocknr: BlockNumber) {
        if blocknr < self.layout.metadata_blocks() {
            warn!("refusing to free reserved block {}", blocknr);
            return;
        }
        self.data_map.set_free(blocknr);
        debug!("freed block {}", blocknr);
    }

    pub fn block_state(&self, blocknr: BlockNumber) -> Option<State> {
        if blocknr < self.data_map.len() {
            Some(self.data_map.get(blocknr))
        } else {
            None
        }
    }

    pub fn free_block_count(&self) -> usize {
        self.data_map.free_count()
    }

    pub fn find_free_inode(&self) -> Option<InodeNumber> {
        self.inodes.find_free()
    }

    pub fn install_inode(&mut self, inum: InodeNumber, node: Inode) {
        self.inodes.insert(inum, node);
    }

    /// Clears an inode table slot. The caller is responsible for the blocks the
    /// inode owned.
    pub fn release_inode(&mut self, inum: InodeNumber) -> Option<Inode> {
        self.inodes.remove(inum)
    }

    pub fn inode(&self, inum: InodeNumber) -> Option<&Inode> {
        self.inodes.get(inum)
    }

    pub fn inode_mut(&mut self, inum: InodeNumber) -> Option<&mut Inode> {
        self.inodes.get_mut(inum)
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn lookup(&self, name: &str) -> Option<InodeNumber> {
        self.directory.get(name).copied()
    }

    /// Adds a directory entry, failing if the directory would no longer fit in
    /// the superblock.
    pub fn insert_entry(&mut self, name: &str, inum: InodeNumber) -> Result<(), SFSError> {
        if !self.entry_fits(name) {
            return Err(SFSError::DirectoryFull);
        }
        self.directory.insert(name.to_string(), inum);
        Ok(())
    }

    /// Whether one more entry called `name` still fits in the superblock.
    pub fn entry_fits(&self, name: &str) -> bool {
        let mut len = SuperBlock::encoded_len(&self.directory);
        if !self.directory.contains_key(name) {
            len += SuperBlock::entry_len(name);
        }
        len <= self.layout.block_size
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<InodeNumber> {
        self.directory.remove(name)
    }

    pub fn read_data(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), SFSError> {
        self.dev.read_block(blocknr, buf)?;
        Ok(())
    }

    pub fn write_data(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), SFSError> {
        self.dev.write_block(blocknr, buf)?;
        Ok(())
    }

    /// Writes the superblock and directory to block 0, the bitmap to block 1 and
    /// the whole inode table to the blocks after it.
    pub fn save_metadata(&mut self) -> Result<(), SFSError> {
        let block_size = self.layout.block_size;

        let sb = SuperBlock::new(&self.layout).serialize(&self.directory);
        if sb.len() > block_size {
            return Err(SFSError::DirectoryFull);
        }
        self.dev.write_block(SUPERBLOCK_INDEX, &sb)?;
        self.dev.write_block(DATA_REGION_BMP, self.data_map.serialize())?;

        let table = self.inodes.serialize();
        for (i, chunk) in table.chunks(block_size).enumerate() {
            // The device zero pads the final partial chunk.
            self.dev.write_block(INODE_START + i, chunk)?;
        }
        self.dev.sync_disk()?;
        debug!(
            "saved metadata: {} entries, {} inodes",
            self.directory.len(),
            self.inodes.total_nodes()
        );
        Ok(())
    }

    /// Reads the filesystem stored on the device. Everything is decoded before
    /// any in-memory state is replaced, so a failed load leaves the current
    /// state untouched.
    pub fn try_load_metadata(&mut self) -> Result<(), LoadError> {
        let block_size = self.dev.block_size();
        let mut block_buf = vec![0; block_size];

        // Read superblock from first block.
        self.dev.read_block(SUPERBLOCK_INDEX, &mut block_buf)?;
        let (super_block, directory) = SuperBlock::parse(&block_buf)?;

        let layout = super_block.layout();
        if layout.block_size != block_size || layout.block_count != self.dev.block_count() {
            return Err(LoadError::GeometryMismatch {
                block_size: layout.block_size,
                blocks_count: layout.block_count,
            });
        }
        layout
            .validate()
            .map_err(|e| LoadError::BadLayout(e.to_string()))?;

        self.dev.read_block(DATA_REGION_BMP, &mut block_buf)?;
        let data_map = Bitmap::parse(&block_buf, layout.block_count);
        if let Some(blocknr) =
            (0..layout.metadata_blocks()).find(|&b| data_map.get(b) == State::Free)
        {
            return Err(LoadError::ReservedBlockFree(blocknr));
        }

        // Fully zero blocks hold only free slots and decode as such.
        let mut table = Vec::with_capacity(layout.inode_table_blocks() * block_size);
        for i in 0..layout.inode_table_blocks() {
            self.dev.read_block(INODE_START + i, &mut block_buf)?;
            table.extend_from_slice(&block_buf);
        }
        let inodes = InodeTable::parse(&table, &layout)?;

        // Every owned block is marked used and belongs to exactly one inode.
        let mut owned = HashSet::new();
        for (inum, node) in inodes.iter() {
            for blocknr in node.allocated_blocks() {
                if !owned.insert(blocknr) || data_map.get(blocknr) == State::Free {
                    return Err(LoadError::MalformedRecord(inum as usize));
                }
            }
        }

        info!(
            "loaded filesystem: {} entries, {} of {} inodes in use",
            directory.len(),
            inodes.total_nodes(),
            layout.inode_capacity
        );
        self.layout = layout;
        self.data_map = data_map;
        self.inodes = inodes;
        self.directory = directory;
        Ok(())
    }

    /// Boolean form of `try_load_metadata`. `false` means there is no usable
    /// filesystem on the device; the cause is logged.
    pub fn load_metadata(&mut self) -> bool {
        match self.try_load_metadata() {
            Ok(()) => true,
            Err(e) => {
                warn!("could not load filesystem: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::INODE_RECORD_SIZE;
    use crate::node::FileKind;
    use fileblock::MemoryBlockEmulator;

    fn create_test_fs(inodes: usize) -> FileSystem<MemoryBlockEmulator> {
        let mut fs = FileSystem::new(MemoryBlockEmulator::new(512, 64));
        fs.format(inodes).unwrap();
        fs
    }

    #[test]
    fn format_reserves_metadata_prefix() {
        // 16 inodes * 64 bytes fill 2 blocks of 512 bytes.
        let fs = create_test_fs(16);
        assert_eq!(fs.layout().metadata_blocks(), 4);
        for blocknr in 0..4 {
            assert_eq!(fs.block_state(blocknr), Some(State::Used));
        }
        assert_eq!(fs.find_free_block(), Some(4));
        assert_eq!(fs.free_block_count(), 60);
    }

    #[test]
    fn format_refuses_existing_store() {
        let mut fs = create_test_fs(16);
        assert!(matches!(fs.format(16), Err(SFSError::StoreExists)));
    }

    #[test]
    fn format_rejects_zero_inodes() {
        let mut fs = FileSystem::new(MemoryBlockEmulator::new(512, 64));
        assert!(matches!(fs.format(0), Err(SFSError::InvalidArgument(_))));
        // Nothing was created.
        assert!(!fs.device().exists());
    }

    #[test]
    fn reserving_twice_is_idempotent() {
        let mut fs = create_test_fs(16);
        let before = fs.free_block_count();
        fs.reserve_metadata_blocks();
        assert_eq!(fs.free_block_count(), before);
    }

    #[test]
    fn allocation_takes_lowest_free_block() {
        let mut fs = create_test_fs(16);
        assert_eq!(fs.allocate_block(), Some(4));
        assert_eq!(fs.allocate_block(), Some(5));
        assert_eq!(fs.allocate_block(), Some(6));

        fs.free_block(5);
        assert_eq!(fs.allocate_block(), Some(5));
    }

    #[test]
    fn allocation_fails_when_device_is_full() {
        let mut fs = create_test_fs(16);
        for _ in 0..60 {
            assert!(fs.allocate_block().is_some());
        }
        assert_eq!(fs.find_free_block(), None);
        assert_eq!(fs.allocate_block(), None);
    }

    #[test]
    fn freeing_reserved_free_or_out_of_range_block_is_ignored() {
        let mut fs = create_test_fs(16);
        fs.free_block(0);
        fs.free_block(3);
        fs.free_block(10);
        fs.free_block(640);
        assert_eq!(fs.block_state(0), Some(State::Used));
        assert_eq!(fs.block_state(3), Some(State::Used));
        assert_eq!(fs.free_block_count(), 60);
    }

    #[test]
    fn find_free_inode_returns_lowest_slot() {
        let mut fs = create_test_fs(2);
        assert_eq!(fs.find_free_inode(), Some(0));
        fs.install_inode(0, Inode::new(FileKind::File));
        assert_eq!(fs.find_free_inode(), Some(1));
        fs.install_inode(1, Inode::new(FileKind::File));
        assert_eq!(fs.find_free_inode(), None);
    }

    #[test]
    fn saved_metadata_reloads_into_fresh_instance() {
        let mut fs = create_test_fs(16);
        let block = fs.allocate_block().unwrap();
        let mut node = Inode::new(FileKind::File);
        node.links_count = 2;
        node.size = 10;
        node.blocks[0] = Some(block);
        fs.install_inode(3, node.clone());
        fs.insert_entry("one", 3).unwrap();
        fs.insert_entry("two", 3).unwrap();
        fs.save_metadata().unwrap();

        let reopened = FileSystem::open(fs.into_device()).unwrap();
        assert_eq!(reopened.layout(), &Layout::new(512, 64, 16));
        assert_eq!(reopened.inode(3), Some(&node));
        assert_eq!(reopened.lookup("one"), Some(3));
        assert_eq!(reopened.lookup("two"), Some(3));
        assert_eq!(reopened.block_state(block), Some(State::Used));
        assert_eq!(reopened.find_free_block(), Some(block + 1));
    }

    #[test]
    fn inode_table_spanning_blocks_keeps_late_slots() {
        let mut fs = create_test_fs(16);
        // Slot 15 is in the second inode table block; the first stays zero.
        fs.install_inode(15, Inode::new(FileKind::File));
        fs.save_metadata().unwrap();

        let reopened = FileSystem::open(fs.into_device()).unwrap();
        assert!(reopened.inode(15).is_some());
        assert_eq!(reopened.inodes().total_nodes(), 1);
    }

    #[test]
    fn load_on_unformatted_device_fails() {
        let mut dev = MemoryBlockEmulator::new(512, 64);
        dev.initialize().unwrap();
        let mut fs = FileSystem::new(dev);
        assert!(!fs.load_metadata());
        assert!(matches!(
            fs.try_load_metadata(),
            Err(LoadError::BadMagic { found: 0 })
        ));
    }

    #[test]
    fn failed_load_leaves_state_untouched() {
        let mut fs = create_test_fs(16);
        fs.install_inode(0, Inode::new(FileKind::File));
        fs.insert_entry("kept", 0).unwrap();
        fs.save_metadata().unwrap();

        // Clobber the magic number on disk only.
        let mut sb = fs.dev.read(SUPERBLOCK_INDEX).unwrap();
        sb[0] = b'X';
        fs.dev.write_block(SUPERBLOCK_INDEX, &sb).unwrap();

        assert!(!fs.load_metadata());
        assert_eq!(fs.lookup("kept"), Some(0));
        assert!(fs.inode(0).is_some());
    }

    #[test]
    fn corrupted_inode_record_is_reported() {
        let mut fs = create_test_fs(16);
        fs.save_metadata().unwrap();

        let mut table = fs.dev.read(INODE_START).unwrap();
        table[INODE_RECORD_SIZE] = 0x7f;
        fs.dev.write_block(INODE_START, &table).unwrap();

        assert!(matches!(
            fs.try_load_metadata(),
            Err(LoadError::MalformedRecord(1))
        ));
    }

    #[test]
    fn block_owned_twice_is_reported() {
        let mut fs = create_test_fs(16);
        let block = fs.allocate_block().unwrap();
        let mut node = Inode::new(FileKind::File);
        node.blocks[0] = Some(block);
        fs.install_inode(0, node.clone());
        fs.install_inode(1, node);
        fs.save_metadata().unwrap();

        assert!(matches!(
            fs.try_load_metadata(),
            Err(LoadError::MalformedRecord(1))
        ));
    }

    #[test]
    fn cleared_reservation_is_reported() {
        let mut fs = create_test_fs(16);
        fs.data_map.set_free(2);
        fs.save_metadata().unwrap();
        assert!(matches!(
            fs.try_load_metadata(),
            Err(LoadError::ReservedBlockFree(2))
        ));
    }

    #[test]
    fn geometry_mismatch_is_reported() {
        let fs = create_test_fs(16);
        let mut dev = fs.into_device();
        let mut sb = dev.read(SUPERBLOCK_INDEX).unwrap();
        // blocks_count lives at bytes 8..12.
        sb[8..12].copy_from_slice(&128_u32.to_be_bytes());
        dev.write_block(SUPERBLOCK_INDEX, &sb).unwrap();

        assert!(matches!(
            FileSystem::open(dev),
            Err(SFSError::Load(LoadError::GeometryMismatch { .. }))
        ));
    }

    #[test]
    fn oversized_directory_is_rejected() {
        let mut fs = create_test_fs(16);
        let long = "x".repeat(200);
        fs.insert_entry(&long, 0).unwrap();
        fs.insert_entry(&format!("{}y", long), 0).unwrap();
        // Header (20) + 2 entries (206, 207) leaves less than 206 bytes.
        assert!(!fs.entry_fits(&format!("{}z", long)));
        assert!(matches!(
            fs.insert_entry(&format!("{}z", long), 0),
            Err(SFSError::DirectoryFull)
        ));
        assert_eq!(fs.directory().len(), 2);
    }

    #[test]
    fn directory_may_fill_block_exactly() {
        let mut fs = create_test_fs(16);
        // 20 byte header + 6 byte entry header leaves 486 bytes for a name.
        let name = "n".repeat(486);
        assert!(fs.entry_fits(&name));
        assert!(!fs.entry_fits(&format!("{}n", name)));
        fs.insert_entry(&name, 1).unwrap();
        // Replacing an existing entry does not grow the directory.
        assert!(fs.entry_fits(&name));
        fs.save_metadata().unwrap();
        assert!(fs.load_metadata());
        assert_eq!(fs.lookup(&name), Some(1));
    }
}
