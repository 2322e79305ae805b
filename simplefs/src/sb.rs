use std::collections::BTreeMap;

use crate::error::LoadError;
use crate::layout::{Layout, SB_MAGIC};
use crate::node::InodeNumber;

/// The flat namespace: file name to inode number. Several names may share an
/// inode (hard links).
pub type Directory = BTreeMap<String, InodeNumber>;

/// magic, block size, block count, inode count and entry count.
const HEADER_SIZE: usize = 20;
/// Inode number and name length preceding every name.
const ENTRY_HEADER_SIZE: usize = 6;

/// The first block of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// The flat directory is stored in the same block, right after the fixed
/// header, so the number and length of names is bounded by the block size.
#[derive(Debug, PartialEq)]
pub struct SuperBlock {
    /// A 32-bit identifying string, in this case MYFS.
    pub sb_magic: u32,
    pub block_size: u32,
    pub blocks_count: u32,
    /// Capacity of the inode table, which ultimately sets the upper bound on
    /// how many files can exist.
    pub inodes_count: u32,
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(raw)
}

impl SuperBlock {
    pub fn new(layout: &Layout) -> Self {
        Self {
            sb_magic: SB_MAGIC,
            block_size: layout.block_size as u32,
            blocks_count: layout.block_count as u32,
            inodes_count: layout.inode_capacity as u32,
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(
            self.block_size as usize,
            self.blocks_count as usize,
            self.inodes_count as usize,
        )
    }

    /// Bytes needed to store the header followed by `directory`.
    pub fn encoded_len(directory: &Directory) -> usize {
        HEADER_SIZE
            + directory
                .keys()
                .map(|name| Self::entry_len(name))
                .sum::<usize>()
    }

    /// Bytes taken by one directory entry named `name`.
    pub fn entry_len(name: &str) -> usize {
        ENTRY_HEADER_SIZE + name.len()
    }

    /// Serializes the SuperBlock and the directory. The encoding is a series of
    /// struct fields with big endian alignment followed by one
    /// `inode, name length, name` entry per directory name.
    pub fn serialize(&self, directory: &Directory) -> Vec<u8> {
        let mut sb_encoded = Vec::with_capacity(Self::encoded_len(directory));
        sb_encoded.extend_from_slice(&self.sb_magic.to_be_bytes());
        sb_encoded.extend_from_slice(&self.block_size.to_be_bytes());
        sb_encoded.extend_from_slice(&self.blocks_count.to_be_bytes());
        sb_encoded.extend_from_slice(&self.inodes_count.to_be_bytes());
        sb_encoded.extend_from_slice(&(directory.len() as u32).to_be_bytes());
        for (name, inum) in directory.iter() {
            sb_encoded.extend_from_slice(&inum.to_be_bytes());
            sb_encoded.extend_from_slice(&(name.len() as u16).to_be_bytes());
            sb_encoded.extend_from_slice(name.as_bytes());
        }
        sb_encoded
    }

    /// Reads the super block and directory from the first block of a device.
    pub fn parse(buf: &[u8]) -> Result<(Self, Directory), LoadError> {
        if buf.len() < HEADER_SIZE {
            return Err(LoadError::Truncated("superblock"));
        }

        let read_magic = read_u32(buf, 0);
        if read_magic != SB_MAGIC {
            return Err(LoadError::BadMagic { found: read_magic });
        }

        let sb = Self {
            sb_magic: read_magic,
            block_size: read_u32(buf, 4),
            blocks_count: read_u32(buf, 8),
            inodes_count: read_u32(buf, 12),
        };
        let entries = read_u32(buf, 16) as usize;

        let mut directory = Directory::new();
        let mut pos = HEADER_SIZE;
        for entry in 0..entries {
            if pos + ENTRY_HEADER_SIZE > buf.len() {
                return Err(LoadError::Truncated("directory"));
            }
            let inum = read_u32(buf, pos);
            let name_len = u16::from_be_bytes([buf[pos + 4], buf[pos + 5]]) as usize;
            pos += ENTRY_HEADER_SIZE;

            if pos + name_len > buf.len() {
                return Err(LoadError::Truncated("directory"));
            }
            let name = std::str::from_utf8(&buf[pos..pos + name_len])
                .map_err(|_| LoadError::MalformedEntry(entry))?;
            pos += name_len;

            if name.is_empty() || inum >= sb.inodes_count {
                return Err(LoadError::MalformedEntry(entry));
            }
            if directory.insert(name.to_string(), inum).is_some() {
                return Err(LoadError::MalformedEntry(entry));
            }
        }

        Ok((sb, directory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_directory() -> Directory {
        let mut dir = Directory::new();
        dir.insert("a.txt".to_string(), 0);
        dir.insert("hard".to_string(), 0);
        dir.insert("notes".to_string(), 3);
        dir
    }

    #[test]
    fn can_encode_and_decode_superblocks() {
        let sb = SuperBlock::new(&Layout::new(4096, 1024, 16));
        let dir = sample_directory();
        let mut encoded = sb.serialize(&dir);
        assert_eq!(encoded.len(), SuperBlock::encoded_len(&dir));
        // Stored blocks are zero padded.
        encoded.resize(4096, 0);

        let (parsed, parsed_dir) = SuperBlock::parse(&encoded).unwrap();

        assert_eq!(parsed, sb);
        assert_eq!(parsed.layout(), Layout::new(4096, 1024, 16));
        assert_eq!(parsed_dir, dir);
    }

    #[test]
    fn parsing_zeroed_block_reports_bad_magic() {
        let zero_buffer_with_right_size = vec![0; 4096];
        match SuperBlock::parse(&zero_buffer_with_right_size) {
            Err(LoadError::BadMagic { found: 0 }) => (),
            other => panic!("expected bad magic, got {:?}", other),
        }
    }

    #[test]
    fn parsing_short_buffer_reports_truncation() {
        assert!(matches!(
            SuperBlock::parse(&SB_MAGIC.to_be_bytes()),
            Err(LoadError::Truncated("superblock"))
        ));
    }

    #[test]
    fn directory_cut_short_reports_truncation() {
        let sb = SuperBlock::new(&Layout::new(4096, 1024, 16));
        let encoded = sb.serialize(&sample_directory());
        assert!(matches!(
            SuperBlock::parse(&encoded[..encoded.len() - 2]),
            Err(LoadError::Truncated("directory"))
        ));
    }

    #[test]
    fn entry_pointing_past_inode_table_is_malformed() {
        let sb = SuperBlock::new(&Layout::new(4096, 1024, 2));
        let mut dir = Directory::new();
        dir.insert("ok".to_string(), 1);
        dir.insert("zz".to_string(), 7);
        assert!(matches!(
            SuperBlock::parse(&sb.serialize(&dir)),
            Err(LoadError::MalformedEntry(1))
        ));
    }
}
