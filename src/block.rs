//! Pure arithmetic over block indices and block sizes.
//!
//! Grounded on `ms-pdb-msf`'s `page_to_offset`/`num_pages_for_stream_size`
//! and on `MSFBuilder.cpp`'s `bytesToBlocks`/`getMinimumBlockCount`.

use crate::error::{Error, Result};
use pow2::Pow2;

/// The number of reserved blocks that exist in every MSF file: the super
/// block (block 0) and the two free-page-map candidate blocks (1 and 2).
const NUM_RESERVED_BLOCKS: u32 = 3;

/// The default block-map block, immediately following the reserved blocks.
pub const DEFAULT_BLOCK_MAP_ADDR: u32 = NUM_RESERVED_BLOCKS;

/// A validated MSF block size: one of 512, 1024, 2048, or 4096 bytes.
///
/// This wraps [`pow2::Pow2`], the same representation `ms-pdb-msf` uses for
/// its page size, but narrows it to the four values MSF actually allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSize(Pow2);

impl BlockSize {
    /// Returns `true` iff `n` is one of the block sizes MSF supports.
    pub fn is_valid_block_size(n: u32) -> bool {
        matches!(n, 512 | 1024 | 2048 | 4096)
    }

    /// Validates and wraps a raw block size in bytes.
    pub fn new(n: u32) -> Result<Self> {
        if !Self::is_valid_block_size(n) {
            return Err(Error::InvalidFormat("block size is not one of 512/1024/2048/4096"));
        }
        // is_valid_block_size already guarantees n is a power of two.
        Ok(BlockSize(Pow2::try_from(n).expect("validated power of two")))
    }

    /// The block size in bytes.
    pub fn bytes(self) -> u32 {
        u32::from(self.0)
    }

    pub(crate) fn exponent(self) -> u32 {
        self.0.exponent()
    }
}

/// Rounds `size` bytes up to a number of blocks of `block_size` bytes each.
///
/// `size == u32::MAX` (the "deleted stream" sentinel) always maps to zero
/// blocks, regardless of `block_size`.
pub fn bytes_to_blocks(size: u32, block_size: BlockSize) -> u32 {
    if size == crate::NIL_STREAM_SIZE {
        return 0;
    }
    let bs = block_size.bytes();
    size.div_ceil(bs)
}

/// Converts a block index to a byte offset within the file.
///
/// Computed as a 64-bit value so that `block * block_size` cannot overflow
/// even for the largest block indices a 32-bit `num_blocks` can express.
pub fn block_to_offset(block: u32, block_size: BlockSize) -> u64 {
    (block as u64) << block_size.exponent()
}

/// The minimum number of blocks any MSF file must have: the three reserved
/// blocks plus one block for the default block map.
pub fn minimum_block_count() -> u32 {
    NUM_RESERVED_BLOCKS + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_block_sizes() {
        for n in [512, 1024, 2048, 4096] {
            assert!(BlockSize::is_valid_block_size(n));
            assert!(BlockSize::new(n).is_ok());
        }
    }

    #[test]
    fn invalid_block_sizes() {
        for n in [0, 1, 256, 3000, 8192, 4095] {
            assert!(!BlockSize::is_valid_block_size(n));
            assert!(BlockSize::new(n).is_err());
        }
    }

    #[test]
    fn bytes_to_blocks_rounds_up() {
        let bs = BlockSize::new(512).unwrap();
        assert_eq!(bytes_to_blocks(0, bs), 0);
        assert_eq!(bytes_to_blocks(1, bs), 1);
        assert_eq!(bytes_to_blocks(512, bs), 1);
        assert_eq!(bytes_to_blocks(513, bs), 2);
        assert_eq!(bytes_to_blocks(1024, bs), 2);
    }

    #[test]
    fn bytes_to_blocks_nil_sentinel() {
        let bs = BlockSize::new(4096).unwrap();
        assert_eq!(bytes_to_blocks(crate::NIL_STREAM_SIZE, bs), 0);
    }

    #[test]
    fn bytes_to_blocks_is_monotone() {
        let bs = BlockSize::new(4096).unwrap();
        let mut prev = bytes_to_blocks(0, bs);
        for size in (1u32..=20000).step_by(37) {
            let cur = bytes_to_blocks(size, bs);
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn block_to_offset_basic() {
        let bs = BlockSize::new(4096).unwrap();
        assert_eq!(block_to_offset(0, bs), 0);
        assert_eq!(block_to_offset(1, bs), 4096);
        assert_eq!(block_to_offset(0x10_0000, bs), 0x10_0000u64 * 4096);
    }

    #[test]
    fn minimum_block_count_is_four() {
        assert_eq!(minimum_block_count(), 4);
    }
}
