#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Packed free-block bitmap, one bit per logical block on disk. A set bit marks
/// the block as used. A single 4K bitmap block tracks up to 4096 * 8 blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    bitmap: Vec<u8>,
    /// Number of blocks tracked; bits beyond it are never handed out.
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bitmap: vec![0; (len + 7) / 8],
            len,
        }
    }

    /// Reads a bitmap for `len` blocks from a stored block. Bits past `len` are
    /// dropped and a short buffer is padded with free blocks.
    pub fn parse(buf: &[u8], len: usize) -> Self {
        let mut map = Self::new(len);
        let bytes = std::cmp::min(buf.len(), map.bitmap.len());
        map.bitmap[..bytes].copy_from_slice(&buf[..bytes]);
        let tail = len % 8;
        if tail != 0 {
            if let Some(last) = map.bitmap.last_mut() {
                *last &= (1_u8 << tail) - 1;
            }
        }
        map
    }

    pub fn serialize(&self) -> &[u8] {
        &self.bitmap
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, blocknr: usize) -> State {
        assert!(blocknr < self.len, "block {} outside bitmap", blocknr);
        // Grab the byte containing the significant bit.
        let outer_offset = self.bitmap[blocknr / 8];

        let inner_offset = blocknr % 8;
        let mask = 0b01_u8 << inner_offset;
        match (outer_offset & mask) >> inner_offset {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, blocknr: usize) {
        assert!(blocknr < self.len, "block {} outside bitmap", blocknr);
        let mask = 0b01_u8 << (blocknr % 8);
        self.bitmap[blocknr / 8] |= mask;
    }

    /// Clears the bit for `blocknr`. Freeing a block that is already free or
    /// outside the bitmap does nothing.
    pub fn set_free(&mut self, blocknr: usize) {
        if blocknr >= self.len {
            return;
        }
        let mask = 0b01_u8 << (blocknr % 8);
        self.bitmap[blocknr / 8] &= !mask;
    }

    /// Lowest numbered free block.
    pub fn first_free(&self) -> Option<usize> {
        (0..self.len).find(|&i| self.get(i) == State::Free)
    }

    pub fn free_count(&self) -> usize {
        (0..self.len).filter(|&i| self.get(i) == State::Free).count()
    }
}
