use crate::blockio::{
    check_range, fit_to_block, BlockError, BlockNumber, BlockStorage, DEFAULT_BLOCK_COUNT,
    DEFAULT_BLOCK_SIZE,
};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, SeekFrom};
use std::path::{Path, PathBuf};

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// Location of the image. The file must be a fixed-size file some exact
    /// multiple of the size of a block.
    path: PathBuf,
    /// Opened lazily on first access so an emulator can be constructed for an
    /// image that does not exist yet.
    fd: Option<File>,
    block_size: usize,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Path of the backing image.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns ownership of the underlying file descriptor to the caller, if
    /// the image has been opened.
    pub fn into_file(self) -> Option<File> {
        self.fd
    }

    fn file(&mut self) -> Result<&mut File, BlockError> {
        if self.fd.is_none() {
            if !self.path.exists() {
                return Err(BlockError::Uninitialized);
            }
            // Return error if the file does not exist rather than create one.
            let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            self.fd = Some(file);
        }
        self.fd.as_mut().ok_or(BlockError::Uninitialized)
    }

    fn seek_to(&mut self, blocknr: BlockNumber) -> Result<&mut File, BlockError> {
        check_range(blocknr, self.block_count)?;
        let offset = (blocknr * self.block_size) as u64;
        let fd = self.file()?;
        fd.seek(SeekFrom::Start(offset))?;
        Ok(fd)
    }
}

impl BlockStorage for FileBlockEmulator {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn initialize(&mut self) -> Result<(), BlockError> {
        if self.exists() {
            return Err(BlockError::AlreadyInitialized);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        {
            let mut bfd = BufWriter::new(&file);
            let zero_block = vec![0x00; self.block_size];
            // Zero out the "disk", buffering each write to prevent excessive syscalls.
            for _ in 0..self.block_count {
                bfd.write_all(&zero_block)?;
            }
            bfd.flush()?;
        }
        file.sync_all()?;

        debug!(
            "initialized {} blocks of {} bytes at {}",
            self.block_count,
            self.block_size,
            self.path.display()
        );
        self.fd = Some(file);
        Ok(())
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> Result<(), BlockError> {
        let block_size = self.block_size;
        if buf.len() < block_size {
            return Err(BlockError::BufferTooSmall {
                len: buf.len(),
                block_size,
            });
        }
        let fd = self.seek_to(blocknr)?;
        // Limit the read to just the block specified.
        fd.read_exact(&mut buf[..block_size])?;
        Ok(())
    }

    /// This method truncates writes that exceed the total block size.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> Result<(), BlockError> {
        let block = fit_to_block(buf, self.block_size);
        let fd = self.seek_to(blocknr)?;
        fd.write_all(&block)?;
        Ok(())
    }

    fn sync_disk(&mut self) -> Result<(), BlockError> {
        if let Some(fd) = self.fd.as_mut() {
            fd.sync_all()?;
        }
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    path: PathBuf,
    block_size: usize,
    block_count: usize,
}

impl From<PathBuf> for FileBlockEmulatorBuilder {
    fn from(path: PathBuf) -> Self {
        FileBlockEmulatorBuilder {
            path,
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
        }
    }
}

impl From<&Path> for FileBlockEmulatorBuilder {
    fn from(path: &Path) -> Self {
        FileBlockEmulatorBuilder::from(path.to_path_buf())
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the size in bytes of each block.
    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Builds an emulator for the configured image. Nothing is touched on disk
    /// until the device is initialized or first accessed.
    pub fn build(self) -> FileBlockEmulator {
        debug_assert!(self.block_count > 0);
        debug_assert!(self.block_size > 0);
        FileBlockEmulator {
            path: self.path,
            fd: None,
            block_size: self.block_size,
            block_count: self.block_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_device(dir: &tempfile::TempDir, blocks: usize) -> FileBlockEmulator {
        let mut disk_emu = FileBlockEmulatorBuilder::from(dir.path().join("disk.img"))
            .with_block_count(blocks)
            .build();
        disk_emu
            .initialize()
            .expect("failed to allocate file block");
        disk_emu
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 4);
        disk_emu.sync_disk().unwrap();
        let len = disk_emu.into_file().unwrap().metadata().unwrap().len();
        assert_eq!(len, 4 * 4096);
    }

    #[test]
    fn initializing_existing_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        create_test_device(&dir, 4);

        let mut again = FileBlockEmulatorBuilder::from(dir.path().join("disk.img"))
            .with_block_count(4)
            .build();
        assert!(again.exists());
        match again.initialize() {
            Err(BlockError::AlreadyInitialized) => (),
            other => panic!("expected AlreadyInitialized, got {:?}", other),
        }
    }

    #[test]
    fn access_before_initialize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = FileBlockEmulatorBuilder::from(dir.path().join("missing.img")).build();
        assert!(!disk_emu.exists());
        assert!(matches!(disk_emu.read(0), Err(BlockError::Uninitialized)));
    }

    #[test]
    fn can_read_and_write_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 4);

        // Allocate a block with a non-zero character.
        disk_emu.write_block(2, &vec![0x55; 4096]).unwrap();
        disk_emu.sync_disk().unwrap();

        // Read a different block.
        assert_eq!(disk_emu.read(3).unwrap(), vec![0x00; 4096]);
        // Read the block with data.
        assert_eq!(disk_emu.read(2).unwrap(), vec![0x55; 4096]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 2);

        disk_emu.write_block(0, &vec![0x55; 4096]).unwrap();
        disk_emu.write_block(1, &vec![0x66; 4096]).unwrap();

        assert_eq!(disk_emu.read(0).unwrap(), vec![0x55; 4096]);
        assert_eq!(disk_emu.read(1).unwrap(), vec![0x66; 4096]);
    }

    #[test]
    fn write_block_beyond_range_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 1);

        // Attempt to write beyond range.
        let wresult = disk_emu.write_block(1, &vec![0x55; 4096]);
        match wresult {
            Err(BlockError::OutOfRange { blocknr: 1, count: 1 }) => (),
            other => panic!("expected an out of range error, got {:?}", other),
        }
        assert!(disk_emu.read(1).is_err());
    }

    #[test]
    fn short_writes_are_zero_padded() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 1);
        disk_emu.write_block(0, &vec![0xff; 4096]).unwrap();

        // Fill half the block with meaningful data.
        disk_emu
            .write_block(0, &vec![0x55; 2048])
            .expect("failed to write block");

        let block = disk_emu.read(0).unwrap();
        assert_eq!(&block[..2048], &vec![0x55; 2048][..]);
        assert_eq!(&block[2048..], &vec![0x00; 2048][..]);
    }

    #[test]
    fn long_writes_are_truncated_to_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 2);

        disk_emu.write_block(0, &vec![0x77; 4096 + 100]).unwrap();

        assert_eq!(disk_emu.read(0).unwrap(), vec![0x77; 4096]);
        // Overflow never spills into the next block.
        assert_eq!(disk_emu.read(1).unwrap(), vec![0x00; 4096]);
    }

    #[test]
    fn reading_into_short_buffer_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk_emu = create_test_device(&dir, 1);
        let mut buf = vec![0; 512];
        assert!(matches!(
            disk_emu.read_block(0, &mut buf),
            Err(BlockError::BufferTooSmall { .. })
        ));
    }
}
