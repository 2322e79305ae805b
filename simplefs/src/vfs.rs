use std::cmp::{max, min};
use std::collections::BTreeMap;

use fileblock::{BlockNumber, BlockStorage};
use log::{debug, info};

use crate::error::SFSError;
use crate::fs::FileSystem;
use crate::layout::{DIRECT_BLOCKS, MAX_NAME_LEN};
use crate::node::{FileKind, Inode, InodeNumber};
use crate::sb::Directory;

/// Handle returned by `open`.
pub type Fd = usize;

/// An open file: the inode it refers to and the read/write cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenFile {
    inum: InodeNumber,
    offset: u64,
}

/// File metadata as reported by `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub inode: InodeNumber,
    pub kind: FileKind,
    pub links: u32,
    pub size: u64,
    /// Direct blocks currently allocated; holes are not counted.
    pub blocks: usize,
}

/// Named file operations over a `FileSystem`.
///
/// The VFS resolves names through the directory, keeps the table of open
/// descriptors and is the only layer that allocates or frees blocks and
/// inodes. Metadata is persisted after every mutating call.
///
/// An inode lives while it has a directory entry or an open descriptor:
/// unlinking the last name of an open file defers deletion until the last
/// descriptor on it is closed.
pub struct Vfs<T: BlockStorage> {
    fs: FileSystem<T>,
    open_files: BTreeMap<Fd, OpenFile>,
}

impl<T: BlockStorage> Vfs<T> {
    pub fn new(fs: FileSystem<T>) -> Self {
        Self {
            fs,
            open_files: BTreeMap::new(),
        }
    }

    /// Loads the filesystem stored on `dev`. Inodes left without links by a
    /// previous session (unlinked while open) are reclaimed.
    pub fn mount(dev: T) -> Result<Self, SFSError> {
        let mut vfs = Self::new(FileSystem::new(dev));
        vfs.load()?;
        Ok(vfs)
    }

    /// Reloads the filesystem from the device in place, dropping every open
    /// descriptor. On failure the current state is kept.
    pub fn load(&mut self) -> Result<(), SFSError> {
        self.fs.try_load_metadata()?;
        self.open_files.clear();
        self.reclaim_orphans()
    }

    pub fn filesystem(&self) -> &FileSystem<T> {
        &self.fs
    }

    pub fn into_inner(self) -> FileSystem<T> {
        self.fs
    }

    /// Formats the device with room for `inode_capacity` files. Fails if a
    /// backing store already exists.
    pub fn mkfs(&mut self, inode_capacity: usize) -> Result<(), SFSError> {
        self.fs.format(inode_capacity)?;
        self.open_files.clear();
        Ok(())
    }

    pub fn stat(&self, name: &str) -> Result<Stat, SFSError> {
        let inum = self.resolve(name)?;
        let node = self.node(inum)?;
        Ok(Stat {
            inode: inum,
            kind: node.kind,
            links: node.links_count,
            size: node.size,
            blocks: node.blocks_used(),
        })
    }

    /// A copy of the whole directory.
    pub fn ls(&self) -> Directory {
        self.fs.directory().clone()
    }

    pub fn create(&mut self, name: &str) -> Result<InodeNumber, SFSError> {
        check_name(name)?;
        if self.fs.lookup(name).is_some() {
            return Err(SFSError::AlreadyExists(name.to_string()));
        }
        let inum = self.fs.find_free_inode().ok_or(SFSError::NoFreeInodes)?;
        self.fs.insert_entry(name, inum)?;

        let mut node = Inode::new(FileKind::File);
        node.links_count = 1;
        self.fs.install_inode(inum, node);
        self.fs.save_metadata()?;

        debug!("created {:?} as inode {}", name, inum);
        Ok(inum)
    }

    /// Opens `name` on the lowest unused descriptor with the cursor at 0.
    pub fn open(&mut self, name: &str) -> Result<Fd, SFSError> {
        let inum = self.resolve(name)?;
        let fd = (0..)
            .find(|fd| !self.open_files.contains_key(fd))
            .unwrap_or_default();
        self.open_files.insert(fd, OpenFile { inum, offset: 0 });
        debug!("opened {:?} (inode {}) as fd {}", name, inum, fd);
        Ok(fd)
    }

    /// Releases `fd`. Closing the last descriptor of an inode that has no
    /// links left deletes it.
    pub fn close(&mut self, fd: Fd) -> Result<(), SFSError> {
        let file = self
            .open_files
            .remove(&fd)
            .ok_or(SFSError::BadDescriptor(fd))?;

        let orphaned = self
            .fs
            .inode(file.inum)
            .map_or(false, |node| node.links_count == 0);
        if orphaned && !self.is_open(file.inum) {
            debug!("last descriptor closed on unlinked inode {}", file.inum);
            self.delete_inode(file.inum);
            self.fs.save_metadata()?;
        }
        Ok(())
    }

    /// Moves the cursor of `fd`. Negative offsets saturate to 0; offsets past
    /// the end of the file are allowed.
    pub fn seek(&mut self, fd: Fd, offset: i64) -> Result<u64, SFSError> {
        let file = self
            .open_files
            .get_mut(&fd)
            .ok_or(SFSError::BadDescriptor(fd))?;
        file.offset = max(0, offset) as u64;
        Ok(file.offset)
    }

    /// Reads up to `n` bytes at the cursor. Returns an empty buffer at or past
    /// the end of the file; holes read back as zeros.
    pub fn read(&mut self, fd: Fd, n: usize) -> Result<Vec<u8>, SFSError> {
        let file = self.descriptor(fd)?;
        let (size, blocks) = {
            let node = self.node(file.inum)?;
            (node.size, node.blocks)
        };
        if file.offset >= size {
            return Ok(Vec::new());
        }

        let block_size = self.fs.layout().block_size;
        let wanted = min(n as u64, size - file.offset) as usize;
        let mut result = Vec::with_capacity(wanted);
        let mut block_buf = vec![0; block_size];

        while result.len() < wanted {
            let (index, within) = locate(file.offset + result.len() as u64, block_size);
            let chunk = min(wanted - result.len(), block_size - within);
            match blocks.get(index) {
                Some(Some(blocknr)) => {
                    self.fs.read_data(*blocknr, &mut block_buf)?;
                    result.extend_from_slice(&block_buf[within..within + chunk]);
                }
                Some(None) => result.resize(result.len() + chunk, 0),
                None => break,
            }
        }

        self.advance(fd, result.len());
        Ok(result)
    }

    /// Writes `data` at the cursor and returns the number of bytes written.
    ///
    /// Blocks are allocated on first touch. A count shorter than `data` means
    /// the device ran out of free blocks or the file reached its direct block
    /// capacity; it is not an error.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<usize, SFSError> {
        let file = self.descriptor(fd)?;
        self.node(file.inum)?;

        let block_size = self.fs.layout().block_size;
        let mut written = 0;
        while written < data.len() {
            let (index, within) = locate(file.offset + written as u64, block_size);
            if index >= DIRECT_BLOCKS {
                debug!("inode {} reached direct block capacity", file.inum);
                break;
            }
            let chunk = min(data.len() - written, block_size - within);

            let existing = self.node(file.inum)?.blocks[index];
            let (blocknr, mut block) = match existing {
                Some(blocknr) if chunk < block_size => {
                    let mut block = vec![0; block_size];
                    self.fs.read_data(blocknr, &mut block)?;
                    (blocknr, block)
                }
                Some(blocknr) => (blocknr, vec![0; block_size]),
                None => match self.fs.allocate_block() {
                    Some(blocknr) => {
                        self.node_mut(file.inum)?.blocks[index] = Some(blocknr);
                        // Fresh blocks may hold bytes of a deleted file.
                        (blocknr, vec![0; block_size])
                    }
                    None => {
                        info!("out of free blocks after {} bytes", written);
                        break;
                    }
                },
            };

            block[within..within + chunk].copy_from_slice(&data[written..written + chunk]);
            if let Err(e) = self.fs.write_data(blocknr, &block) {
                if existing.is_none() {
                    self.node_mut(file.inum)?.blocks[index] = None;
                    self.fs.free_block(blocknr);
                }
                return Err(e);
            }
            written += chunk;
        }

        // The size follows the cursor even when nothing was written.
        let end = min(self.advance(fd, written), self.fs.layout().max_file_size());
        let node = self.node_mut(file.inum)?;
        node.size = max(node.size, end);
        self.fs.save_metadata()?;
        Ok(written)
    }

    /// Adds `new_name` as another name for the inode behind `existing`.
    pub fn link(&mut self, existing: &str, new_name: &str) -> Result<(), SFSError> {
        let inum = self.resolve(existing)?;
        check_name(new_name)?;
        if self.fs.lookup(new_name).is_some() {
            return Err(SFSError::AlreadyExists(new_name.to_string()));
        }
        self.fs.insert_entry(new_name, inum)?;
        self.node_mut(inum)?.links_count += 1;
        self.fs.save_metadata()
    }

    /// Removes a directory entry. When the inode's last link goes it is
    /// deleted immediately, or on the final `close` if it is still open.
    pub fn unlink(&mut self, name: &str) -> Result<(), SFSError> {
        let inum = self.resolve(name)?;
        self.fs.remove_entry(name);

        let node = self.node_mut(inum)?;
        node.links_count = node.links_count.saturating_sub(1);
        if node.links_count == 0 {
            if self.is_open(inum) {
                debug!("inode {} unlinked while open, deferring deletion", inum);
            } else {
                self.delete_inode(inum);
            }
        }
        self.fs.save_metadata()
    }

    /// Sets the size of `name`. Shrinking frees the blocks past the new end and
    /// zeroes the rest of the last kept block; growing only changes the size
    /// and the new range reads as zeros.
    pub fn truncate(&mut self, name: &str, new_size: u64) -> Result<(), SFSError> {
        let inum = self.resolve(name)?;
        let max_size = self.fs.layout().max_file_size();
        if new_size > max_size {
            return Err(SFSError::FileTooLarge {
                requested: new_size,
                max: max_size,
            });
        }

        let block_size = self.fs.layout().block_size;
        let old_size = self.node(inum)?.size;
        if new_size < old_size {
            let new_blocks = blocks_for(new_size, block_size);

            // Release every slot past the new end.
            let node = self.node_mut(inum)?;
            let released: Vec<BlockNumber> = (new_blocks..DIRECT_BLOCKS)
                .filter_map(|i| node.blocks[i].take())
                .collect();
            let last_kept = new_blocks.checked_sub(1).and_then(|i| node.blocks[i]);
            for blocknr in released {
                self.fs.free_block(blocknr);
            }

            // Bytes past the new end must read as zeros if the file grows again.
            let tail = (new_size % block_size as u64) as usize;
            if let Some(blocknr) = last_kept.filter(|_| tail != 0) {
                let mut block = vec![0; block_size];
                self.fs.read_data(blocknr, &mut block)?;
                block[tail..].iter_mut().for_each(|b| *b = 0);
                self.fs.write_data(blocknr, &block)?;
            }
        }

        self.node_mut(inum)?.size = new_size;
        self.fs.save_metadata()
    }

    /// Number of currently open descriptors.
    pub fn open_count(&self) -> usize {
        self.open_files.len()
    }

    /// Current cursor of `fd`.
    pub fn tell(&self, fd: Fd) -> Result<u64, SFSError> {
        Ok(self.descriptor(fd)?.offset)
    }

    fn resolve(&self, name: &str) -> Result<InodeNumber, SFSError> {
        let inum = self
            .fs
            .lookup(name)
            .ok_or_else(|| SFSError::DoesNotExist(name.to_string()))?;
        self.node(inum)?;
        Ok(inum)
    }

    fn descriptor(&self, fd: Fd) -> Result<OpenFile, SFSError> {
        self.open_files
            .get(&fd)
            .copied()
            .ok_or(SFSError::BadDescriptor(fd))
    }

    fn node(&self, inum: InodeNumber) -> Result<&Inode, SFSError> {
        self.fs.inode(inum).ok_or(SFSError::DanglingInode(inum))
    }

    fn node_mut(&mut self, inum: InodeNumber) -> Result<&mut Inode, SFSError> {
        self.fs.inode_mut(inum).ok_or(SFSError::DanglingInode(inum))
    }

    /// Moves the cursor of `fd` forward, returning the new position.
    fn advance(&mut self, fd: Fd, by: usize) -> u64 {
        match self.open_files.get_mut(&fd) {
            Some(file) => {
                file.offset += by as u64;
                file.offset
            }
            None => 0,
        }
    }

    fn is_open(&self, inum: InodeNumber) -> bool {
        self.open_files.values().any(|file| file.inum == inum)
    }

    /// Frees every block the inode owns and clears its slot.
    fn delete_inode(&mut self, inum: InodeNumber) {
        if let Some(node) = self.fs.release_inode(inum) {
            for blocknr in node.allocated_blocks() {
                self.fs.free_block(blocknr);
            }
            debug!("deleted inode {}", inum);
        }
    }

    fn reclaim_orphans(&mut self) -> Result<(), SFSError> {
        let orphans: Vec<InodeNumber> = self
            .fs
            .inodes()
            .iter()
            .filter(|(_, node)| node.links_count == 0)
            .map(|(inum, _)| inum)
            .collect();
        if orphans.is_empty() {
            return Ok(());
        }
        for inum in orphans.iter() {
            self.delete_inode(*inum);
        }
        info!("reclaimed {} unlinked inodes", orphans.len());
        self.fs.save_metadata()
    }
}

fn check_name(name: &str) -> Result<(), SFSError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SFSError::InvalidArgument(format!(
            "file names must be 1 to {} bytes long",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Block index and offset within the block of byte `pos`.
fn locate(pos: u64, block_size: usize) -> (usize, usize) {
    let block_size = block_size as u64;
    ((pos / block_size) as usize, (pos % block_size) as usize)
}

/// Blocks needed to hold `size` bytes.
fn blocks_for(size: u64, block_size: usize) -> usize {
    let block_size = block_size as u64;
    ((size + block_size - 1) / block_size) as usize
}
