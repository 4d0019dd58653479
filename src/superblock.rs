//! The MSF super block: the fixed-layout header at file offset 0.
//!
//! Grounded on `ms-pdb-msf`'s `MsfHeader` (`src/lib.rs`) for the zerocopy
//! encoding, and on `msf::validateSuperBlock`/`MSFBuilder.cpp`'s reserved
//! block constants for the validation rules.

use crate::block::BlockSize;
use crate::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, LE, U32};

/// Identifies an MSF (PDB) file. This is the "Big MSF" magic; the obsolete
/// pre-Big-MSF encoding is out of scope for this crate.
pub const MSF_MAGIC: [u8; 32] = *b"Microsoft C/C++ MSF 7.00\r\n\x1a\x44\x53\x00\x00\x00";

/// The raw, on-disk super block layout. All fields are little-endian.
///
/// This struct is `repr(C)` and unaligned so it can be read directly out of
/// a byte slice with zerocopy, matching spec.md §6's on-disk layout table.
#[derive(Clone, Copy, Debug, IntoBytes, FromBytes, Unaligned, KnownLayout, Immutable)]
#[repr(C)]
pub struct SuperBlockRaw {
    pub magic: [u8; 32],
    pub block_size: U32<LE>,
    pub free_block_map_block: U32<LE>,
    pub num_blocks: U32<LE>,
    pub num_directory_bytes: U32<LE>,
    pub unknown_1: U32<LE>,
    pub block_map_addr: U32<LE>,
}

static_assertions::const_assert_eq!(std::mem::size_of::<SuperBlockRaw>(), 56);

/// The parsed, validated super block.
#[derive(Clone, Copy, Debug)]
pub struct SuperBlock {
    pub block_size: BlockSize,
    pub free_block_map_block: u32,
    pub num_blocks: u32,
    pub num_directory_bytes: u32,
    pub unknown_1: u32,
    pub block_map_addr: u32,
}

impl SuperBlock {
    /// Parses and validates a super block from the first bytes of a file.
    ///
    /// Returns [`Error::CorruptFile`] if there aren't enough bytes for a
    /// super block or the magic doesn't match, and [`Error::InvalidFormat`]
    /// if the fields fail the structural checks in [`Self::validate_raw`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Ok((raw, _rest)) = SuperBlockRaw::ref_from_prefix(bytes) else {
            return Err(Error::CorruptFile("no superblock"));
        };
        if raw.magic != MSF_MAGIC {
            return Err(Error::CorruptFile("no superblock"));
        }
        Self::validate_raw(raw)
    }

    /// Validates the fields of a raw super block, independent of the magic
    /// check (already performed by [`Self::parse`]).
    ///
    /// Checks (spec.md §4.3):
    /// * `block_size` is one of the four supported sizes;
    /// * `free_block_map_block` is 1 or 2;
    /// * `num_blocks > 0`;
    /// * `block_map_addr < num_blocks`.
    pub fn validate_raw(raw: &SuperBlockRaw) -> Result<Self> {
        let block_size_val = raw.block_size.get();
        let block_size = BlockSize::new(block_size_val)?;

        let free_block_map_block = raw.free_block_map_block.get();
        if !matches!(free_block_map_block, 1 | 2) {
            return Err(Error::InvalidFormat("free_block_map_block must be 1 or 2"));
        }

        let num_blocks = raw.num_blocks.get();
        if num_blocks == 0 {
            return Err(Error::InvalidFormat("num_blocks must be nonzero"));
        }

        let block_map_addr = raw.block_map_addr.get();
        if block_map_addr >= num_blocks {
            return Err(Error::InvalidFormat("block_map_addr is out of range"));
        }

        Ok(SuperBlock {
            block_size,
            free_block_map_block,
            num_blocks,
            num_directory_bytes: raw.num_directory_bytes.get(),
            unknown_1: raw.unknown_1.get(),
            block_map_addr,
        })
    }

    /// Serializes this super block into its on-disk representation.
    pub fn to_raw(self) -> SuperBlockRaw {
        SuperBlockRaw {
            magic: MSF_MAGIC,
            block_size: U32::new(self.block_size.bytes()),
            free_block_map_block: U32::new(self.free_block_map_block),
            num_blocks: U32::new(self.num_blocks),
            num_directory_bytes: U32::new(self.num_directory_bytes),
            unknown_1: U32::new(self.unknown_1),
            block_map_addr: U32::new(self.block_map_addr),
        }
    }
}

/// Checks whether the header of a file appears to be a valid MSF file.
///
/// This only looks at the magic; it does not validate the rest of the super
/// block. Useful for a cheap "could this be an MSF file?" probe before
/// committing to a full parse.
pub fn is_msf_header(header: &[u8]) -> bool {
    header.starts_with(&MSF_MAGIC)
}
