use fileblock::BlockNumber;
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::error::LoadError;
use crate::layout::{Layout, DIRECT_BLOCKS, INODE_RECORD_SIZE};

/// Index of a slot in the inode table.
pub type InodeNumber = u32;

const KIND_FREE: u8 = 0;
const KIND_FILE: u8 = 1;
const KIND_DIRECTORY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::File => write!(f, "file"),
            FileKind::Directory => write!(f, "dir"),
        }
    }
}

/// In-memory view of a file's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub kind: FileKind,
    /// The number of directory entries naming this inode.
    pub links_count: u32,
    /// The total size of the file in bytes.
    pub size: u64,
    /// Data blocks in file order. `None` is a hole that reads back as zeros.
    pub blocks: [Option<BlockNumber>; DIRECT_BLOCKS],
    /// Reserved for indirect addressing; never allocated by this version.
    pub indirect: Option<BlockNumber>,
}

impl Inode {
    pub fn new(kind: FileKind) -> Self {
        Self {
            kind,
            links_count: 0,
            size: 0,
            blocks: [None; DIRECT_BLOCKS],
            indirect: None,
        }
    }

    /// Every block owned by the inode, including the indirect block.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.blocks.iter().flatten().chain(self.indirect.iter()).copied()
    }

    /// Number of direct blocks currently allocated.
    pub fn blocks_used(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }
}

/// Fixed size encoding of one inode table slot. Block pointers use 0 for "no
/// block" since block 0 always holds the superblock.
///
/// This structure __must be exactly INODE_RECORD_SIZE bytes.__
#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Clone, Copy)]
struct InodeRecord {
    kind: u8,
    _reserved: [u8; 3],
    links_count: U32<BigEndian>,
    size: U64<BigEndian>,
    blocks: [U32<BigEndian>; DIRECT_BLOCKS],
    indirect: U32<BigEndian>,
    _padding: [u8; 4],
}

fn encode_ptr(blocknr: Option<BlockNumber>) -> U32<BigEndian> {
    U32::new(blocknr.unwrap_or(0) as u32)
}

impl InodeRecord {
    fn empty() -> Self {
        Self {
            kind: KIND_FREE,
            _reserved: [0; 3],
            links_count: U32::new(0),
            size: U64::new(0),
            blocks: [U32::new(0); DIRECT_BLOCKS],
            indirect: U32::new(0),
            _padding: [0; 4],
        }
    }

    fn encode(node: &Inode) -> Self {
        let mut record = Self::empty();
        record.kind = match node.kind {
            FileKind::File => KIND_FILE,
            FileKind::Directory => KIND_DIRECTORY,
        };
        record.links_count = U32::new(node.links_count);
        record.size = U64::new(node.size);
        for (slot, blocknr) in record.blocks.iter_mut().zip(node.blocks.iter()) {
            *slot = encode_ptr(*blocknr);
        }
        record.indirect = encode_ptr(node.indirect);
        record
    }

    /// Returns `Ok(None)` for a free slot. Any pointer outside the data region
    /// or a free slot carrying data is rejected.
    fn decode(&self, slot: usize, layout: &Layout) -> Result<Option<Inode>, LoadError> {
        let kind = match self.kind {
            KIND_FREE => {
                if self.as_bytes().iter().any(|&b| b != 0) {
                    return Err(LoadError::MalformedRecord(slot));
                }
                return Ok(None);
            }
            KIND_FILE => FileKind::File,
            KIND_DIRECTORY => FileKind::Directory,
            _ => return Err(LoadError::MalformedRecord(slot)),
        };

        let decode_ptr = |raw: U32<BigEndian>| -> Result<Option<BlockNumber>, LoadError> {
            match raw.get() as usize {
                0 => Ok(None),
                n if layout.is_data_block(n) => Ok(Some(n)),
                _ => Err(LoadError::MalformedRecord(slot)),
            }
        };

        let mut node = Inode::new(kind);
        node.links_count = self.links_count.get();
        node.size = self.size.get();
        if node.size > layout.max_file_size() {
            return Err(LoadError::MalformedRecord(slot));
        }
        for (blocknr, raw) in node.blocks.iter_mut().zip(self.blocks.iter()) {
            *blocknr = decode_ptr(*raw)?;
        }
        node.indirect = decode_ptr(self.indirect)?;
        Ok(Some(node))
    }
}

/// Fixed capacity table of inodes. The slot index is the inode number and an
/// empty slot is free.
#[derive(Debug, Clone, PartialEq)]
pub struct InodeTable {
    nodes: Vec<Option<Inode>>,
}

impl InodeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Number of allocated inodes.
    pub fn total_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn get(&self, inum: InodeNumber) -> Option<&Inode> {
        self.nodes.get(inum as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, inum: InodeNumber) -> Option<&mut Inode> {
        self.nodes.get_mut(inum as usize).and_then(Option::as_mut)
    }

    /// Lowest numbered free slot.
    pub fn find_free(&self) -> Option<InodeNumber> {
        self.nodes
            .iter()
            .position(Option::is_none)
            .map(|i| i as InodeNumber)
    }

    pub fn insert(&mut self, inum: InodeNumber, node: Inode) {
        self.nodes[inum as usize] = Some(node);
    }

    pub fn remove(&mut self, inum: InodeNumber) -> Option<Inode> {
        self.nodes.get_mut(inum as usize).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (InodeNumber, &Inode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (i as InodeNumber, n)))
    }

    /// Serializes every slot, free ones included, for writing to disk.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.nodes.len() * INODE_RECORD_SIZE);
        for node in self.nodes.iter() {
            let record = match node {
                Some(node) => InodeRecord::encode(node),
                None => InodeRecord::empty(),
            };
            buf.extend_from_slice(record.as_bytes());
        }
        buf
    }

    /// Rebuilds a table of `layout.inode_capacity` slots. Slots past the end of
    /// `buf` are free.
    pub fn parse(buf: &[u8], layout: &Layout) -> Result<Self, LoadError> {
        let mut table = Self::new(layout.inode_capacity);
        for (slot, chunk) in buf
            .chunks_exact(INODE_RECORD_SIZE)
            .take(layout.inode_capacity)
            .enumerate()
        {
            let record = LayoutVerified::<_, InodeRecord>::new_unaligned(chunk)
                .ok_or(LoadError::Truncated("inode record"))?;
            table.nodes[slot] = record.decode(slot, layout)?;
        }
        Ok(table)
    }
}
