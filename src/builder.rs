//! MsfBuilder: assembles a fresh set of streams into an [`MsfLayout`].
//!
//! Grounded almost line-for-line on
//! `original_source/lib/DebugInfo/MSF/MSFBuilder.cpp`, restructured into
//! safe Rust with a `bumpalo::Bump` arena standing in for LLVM's
//! `BumpPtrAllocator` (spec.md §6.1), in the idiom of `ms-pdb-msf`'s
//! `PageAllocator` (`src/pages.rs`) for the free-list bookkeeping.

use crate::bitmap::BitmapFreeList;
use crate::block::{self, bytes_to_blocks, BlockSize};
use crate::error::{Error, Result};
use crate::superblock::SuperBlock;
use bumpalo::Bump;
use std::collections::HashSet;
use tracing::trace;

const SUPER_BLOCK_BLOCK: u32 = 0;
const FPM_CANDIDATE_1: u32 = 1;
const FPM_CANDIDATE_2: u32 = 2;
const DEFAULT_FREE_PAGE_MAP: u32 = FPM_CANDIDATE_1;

/// The finished result of building or parsing an MSF container.
///
/// Borrows its stable arrays from an arena (`'a`): `directory_blocks`,
/// `stream_sizes`, and each entry of `stream_map` are arena-allocated so
/// that callers can hold onto them for as long as the arena lives, exactly
/// as spec.md §3/§9 describes. The outer `Vec` in `stream_map` is an
/// ordinary heap allocation, matching `MSFLayout::StreamMap` in the
/// original LLVM `MSFCommon.h`, which is a `std::vector` of `ArrayRef`s.
#[derive(Clone)]
pub struct MsfLayout<'a> {
    pub super_block: SuperBlock,
    pub directory_blocks: &'a [u32],
    pub free_page_map: BitmapFreeList,
    pub stream_sizes: &'a [u32],
    pub stream_map: Vec<&'a [u32]>,
}

impl<'a> MsfLayout<'a> {
    /// The number of streams described by this layout.
    pub fn num_streams(&self) -> u32 {
        self.stream_sizes.len() as u32
    }
}

/// Builds a fresh [`MsfLayout`] from stream declarations and (optionally)
/// hand-provided blocks.
pub struct MsfBuilder<'a> {
    arena: &'a Bump,
    block_size: BlockSize,
    is_growable: bool,
    free_list: BitmapFreeList,
    block_map_addr: u32,
    free_page_map_block: u32,
    unknown_1: u32,
    directory_blocks: Vec<u32>,
    /// `(size, blocks)` per declared stream, in declaration order.
    streams: Vec<(u32, Vec<u32>)>,
}

impl<'a> MsfBuilder<'a> {
    /// Creates a new builder.
    ///
    /// The free list is sized to `max(min_block_count,
    /// block::minimum_block_count())`, with the reserved blocks (0, the two
    /// FPM candidates, and the default block map address) marked used.
    pub fn create(arena: &'a Bump, block_size: u32, min_block_count: u32, growable: bool) -> Result<Self> {
        let block_size = BlockSize::new(block_size)?;
        let n = min_block_count.max(block::minimum_block_count());
        let mut free_list = BitmapFreeList::new(n, true);
        free_list.set_used(SUPER_BLOCK_BLOCK);
        free_list.set_used(FPM_CANDIDATE_1);
        free_list.set_used(FPM_CANDIDATE_2);
        free_list.set_used(block::DEFAULT_BLOCK_MAP_ADDR);

        Ok(Self {
            arena,
            block_size,
            is_growable: growable,
            free_list,
            block_map_addr: block::DEFAULT_BLOCK_MAP_ADDR,
            free_page_map_block: DEFAULT_FREE_PAGE_MAP,
            unknown_1: 0,
            directory_blocks: Vec::new(),
            streams: Vec::new(),
        })
    }

    /// Changes which block holds the directory block-map array.
    pub fn set_block_map_addr(&mut self, addr: u32) -> Result<()> {
        if addr == self.block_map_addr {
            return Ok(());
        }
        if addr >= self.free_list.len() {
            if !self.is_growable {
                return Err(Error::InsufficientBuffer);
            }
            self.free_list.resize(addr + 1, true);
        }
        if !self.free_list.is_free(addr) {
            return Err(Error::BlockInUse(addr));
        }
        self.free_list.set_free(self.block_map_addr);
        self.free_list.set_used(addr);
        self.block_map_addr = addr;
        Ok(())
    }

    /// Sets the active free-page-map block index (1 or 2) recorded in the
    /// final super block. Pure setter; has no allocation effect.
    pub fn set_free_page_map(&mut self, fpm: u32) {
        self.free_page_map_block = fpm;
    }

    /// Sets the opaque `unknown_1` passthrough field of the final super block.
    pub fn set_unknown_1(&mut self, value: u32) {
        self.unknown_1 = value;
    }

    /// Provides a hint for which blocks should hold the directory payload.
    ///
    /// Validates the entire candidate list against the free list *before*
    /// freeing the previously held directory blocks, so a failure (a
    /// duplicate in `list`, or a block already in use) leaves the builder
    /// exactly as it was (spec.md §9, "`set_directory_blocks_hint` rollback").
    pub fn set_directory_blocks_hint(&mut self, list: &[u32]) -> Result<()> {
        let mut seen = HashSet::with_capacity(list.len());
        for &b in list {
            if !seen.insert(b) {
                return Err(Error::unspecified("duplicate block in directory blocks hint"));
            }
        }

        let max_block = list.iter().copied().max();
        let mut scratch = self.free_list.clone();
        for &b in &self.directory_blocks {
            scratch.set_free(b);
        }
        if let Some(m) = max_block {
            if m >= scratch.len() {
                if !self.is_growable {
                    return Err(Error::InsufficientBuffer);
                }
                scratch.resize(m + 1, true);
            }
        }
        for &b in list {
            if !scratch.is_free(b) {
                return Err(Error::unspecified("attempt to reuse an allocated block"));
            }
            scratch.set_used(b);
        }

        // Validation succeeded against the scratch copy; commit the same
        // transformation to the real free list.
        if let Some(m) = max_block {
            if m >= self.free_list.len() {
                self.free_list.resize(m + 1, true);
            }
        }
        for &b in &self.directory_blocks {
            self.free_list.set_free(b);
        }
        for &b in list {
            self.free_list.set_used(b);
        }
        self.directory_blocks = list.to_vec();
        Ok(())
    }

    /// Allocates `n` free blocks in ascending order, growing the free list
    /// first if there aren't enough free blocks and the builder is growable.
    pub fn allocate_blocks(&mut self, n: u32) -> Result<Vec<u32>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let free = self.free_list.count_free();
        if free < n {
            if !self.is_growable {
                return Err(Error::InsufficientBuffer);
            }
            let extra = n - free;
            let new_len = self.free_list.len() + extra;
            self.free_list.resize(new_len, true);
        }

        let mut out = Vec::with_capacity(n as usize);
        let mut cursor = self.free_list.find_first_free();
        for _ in 0..n {
            let block = cursor.expect("ran out of free blocks after growing the free list");
            out.push(block);
            self.free_list.set_used(block);
            cursor = self.free_list.find_next_free(block);
        }
        trace!(count = n, blocks = ?out, "allocated blocks");
        Ok(out)
    }

    /// Declares a new stream of `size` bytes, auto-allocating its blocks.
    pub fn add_stream(&mut self, size: u32) -> Result<()> {
        let k = bytes_to_blocks(size, self.block_size);
        let blocks = self.allocate_blocks(k)?;
        self.streams.push((size, blocks));
        Ok(())
    }

    /// Declares a new stream of `size` bytes backed by caller-provided
    /// `blocks`.
    ///
    /// Rejects duplicate entries within `blocks` before marking anything
    /// used (spec.md §9, "Duplicate block detection" — fixed here rather
    /// than reproduced from the original, which corrupts the free list on a
    /// duplicate).
    pub fn add_stream_with_blocks(&mut self, size: u32, blocks: &[u32]) -> Result<()> {
        let k = bytes_to_blocks(size, self.block_size);
        if blocks.len() as u32 != k {
            return Err(Error::InvalidFormat("incorrect number of blocks for requested stream size"));
        }

        let mut seen = HashSet::with_capacity(blocks.len());
        for &b in blocks {
            if !seen.insert(b) {
                return Err(Error::unspecified("duplicate block in stream block list"));
            }
        }

        for &b in blocks {
            if b >= self.free_list.len() {
                self.free_list.resize(b + 1, true);
            }
            if !self.free_list.is_free(b) {
                return Err(Error::unspecified("attempt to re-use an already allocated block"));
            }
        }
        for &b in blocks {
            self.free_list.set_used(b);
        }

        self.streams.push((size, blocks.to_vec()));
        Ok(())
    }

    /// Changes the size of stream `i`, allocating or freeing blocks as needed.
    pub fn set_stream_size(&mut self, i: u32, size: u32) -> Result<()> {
        let idx = i as usize;
        let old_size = self
            .streams
            .get(idx)
            .ok_or_else(|| Error::unspecified(format!("stream index {i} out of range")))?
            .0;
        if old_size == size {
            return Ok(());
        }

        let old_blocks = bytes_to_blocks(old_size, self.block_size);
        let new_blocks = bytes_to_blocks(size, self.block_size);

        if new_blocks > old_blocks {
            let added = self.allocate_blocks(new_blocks - old_blocks)?;
            self.streams[idx].1.extend(added);
        } else if old_blocks > new_blocks {
            let removed = old_blocks - new_blocks;
            let drain_start = self.streams[idx].1.len() - removed as usize;
            for b in self.streams[idx].1.drain(drain_start..) {
                self.free_list.set_free(b);
            }
        }

        self.streams[idx].0 = size;
        Ok(())
    }

    /// The number of streams declared so far.
    pub fn num_streams(&self) -> u32 {
        self.streams.len() as u32
    }

    /// The declared size of stream `i`.
    pub fn stream_size(&self, i: u32) -> u32 {
        self.streams[i as usize].0
    }

    /// The current block list of stream `i`.
    pub fn stream_blocks(&self, i: u32) -> &[u32] {
        &self.streams[i as usize].1
    }

    /// The number of blocks currently marked used.
    pub fn num_used_blocks(&self) -> u32 {
        self.total_block_count() - self.num_free_blocks()
    }

    /// The number of blocks currently marked free.
    pub fn num_free_blocks(&self) -> u32 {
        self.free_list.count_free()
    }

    /// The total number of blocks tracked by the free list.
    pub fn total_block_count(&self) -> u32 {
        self.free_list.len()
    }

    /// Whether block `i` is currently free.
    pub fn is_block_free(&self, i: u32) -> bool {
        self.free_list.is_free(i)
    }

    /// Computes the byte size of the serialized directory payload: a
    /// `num_streams` count, a size per stream, and a block list per stream.
    fn compute_directory_byte_size(&self) -> u32 {
        let mut size = 4u32; // num_streams
        size += 4 * self.streams.len() as u32; // sizes
        for (stream_size, blocks) in &self.streams {
            let expected = bytes_to_blocks(*stream_size, self.block_size);
            debug_assert_eq!(expected as usize, blocks.len());
            size += 4 * blocks.len() as u32;
        }
        size
    }

    /// Finalizes the builder into an [`MsfLayout`].
    ///
    /// `num_blocks` is only set into the resulting super block *after*
    /// allocating any shortfall in directory blocks, since that allocation
    /// can itself grow the free list (spec.md §4.6, step 3).
    pub fn build(mut self) -> Result<MsfLayout<'a>> {
        let num_directory_bytes = self.compute_directory_byte_size();
        let num_directory_blocks = bytes_to_blocks(num_directory_bytes, self.block_size);

        if num_directory_blocks as usize > self.directory_blocks.len() {
            let shortfall = num_directory_blocks - self.directory_blocks.len() as u32;
            let extra = self.allocate_blocks(shortfall)?;
            self.directory_blocks.extend(extra);
        } else if (num_directory_blocks as usize) < self.directory_blocks.len() {
            let excess = self.directory_blocks.len() - num_directory_blocks as usize;
            let drain_start = self.directory_blocks.len() - excess;
            for b in self.directory_blocks.drain(drain_start..) {
                self.free_list.set_free(b);
            }
        }

        let num_blocks = self.free_list.len();

        let super_block = SuperBlock {
            block_size: self.block_size,
            free_block_map_block: self.free_page_map_block,
            num_blocks,
            num_directory_bytes,
            unknown_1: self.unknown_1,
            block_map_addr: self.block_map_addr,
        };

        let directory_blocks: &[u32] = self.arena.alloc_slice_copy(&self.directory_blocks);
        let sizes: Vec<u32> = self.streams.iter().map(|(size, _)| *size).collect();
        let stream_sizes: &[u32] = self.arena.alloc_slice_copy(&sizes);
        let stream_map: Vec<&[u32]> = self
            .streams
            .iter()
            .map(|(_, blocks)| &*self.arena.alloc_slice_copy(blocks))
            .collect();

        Ok(MsfLayout {
            super_block,
            directory_blocks,
            free_page_map: self.free_list,
            stream_sizes,
            stream_map,
        })
    }
}
