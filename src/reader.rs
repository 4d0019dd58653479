//! MsfFile: parses an existing MSF container for read-only access.
//!
//! Grounded on `PDBFile.cpp`'s `parseFileHeaders`/`parseStreamData`
//! (`original_source`) almost line for line, in the Rust idiom of
//! `ms-pdb-msf`'s `open.rs` (zerocopy prefix parsing, `trace_span!` around
//! the parse entry points).

use crate::bitmap::BitmapFreeList;
use crate::block::{block_to_offset, bytes_to_blocks};
use crate::builder::MsfLayout;
use crate::error::{Error, Result};
use crate::source::ReadableSource;
use crate::stream::MappedBlockStream;
use crate::superblock::{SuperBlock, SuperBlockRaw};
use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, trace_span};

/// Everything [`MsfFile::parse_headers`] can establish before the stream
/// directory itself has been read.
struct HeaderState<'a> {
    super_block: SuperBlock,
    directory_blocks: &'a [u32],
    free_page_map: BitmapFreeList,
}

/// A parsed, read-only view of an MSF container.
///
/// Borrows an arena (`'a`) for the same reason [`crate::builder::MsfBuilder`]
/// does: the directory arrays produced while parsing need a stable home that
/// outlives the borrow of any individual parse call (spec.md §9, "Lifetime of
/// stable views" — "make the arena a caller-provided parameter to both
/// `build()` and any reader that needs to retain parsed arrays").
pub struct MsfFile<'a> {
    source: Arc<dyn ReadableSource>,
    arena: &'a Bump,
    header: RefCell<Option<HeaderState<'a>>>,
    layout: RefCell<Option<MsfLayout<'a>>>,
    stream_cache: RefCell<HashMap<u32, Arc<MappedBlockStream>>>,
}

impl<'a> MsfFile<'a> {
    /// Takes ownership of `source` for read-only access, borrowing `arena`
    /// to hold the parsed directory arrays.
    pub fn new(source: Arc<dyn ReadableSource>, arena: &'a Bump) -> Self {
        Self {
            source,
            arena,
            header: RefCell::new(None),
            layout: RefCell::new(None),
            stream_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Parses the super block, free-page map, and directory block array.
    ///
    /// Idempotent: a second call is a no-op once the first succeeds. Any
    /// structural defect surfaces as a single error value; no partial state
    /// is retained.
    pub fn parse_headers(&self) -> Result<()> {
        if self.header.borrow().is_some() {
            return Ok(());
        }
        let span = trace_span!("parse_headers");
        let _enter = span.enter();

        let header_len = std::mem::size_of::<SuperBlockRaw>() as u64;
        if self.source.length() < header_len {
            return Err(Error::CorruptFile("no superblock"));
        }
        let view = self.source.read_bytes(0, header_len)?;
        let super_block = SuperBlock::parse(view.as_bytes())?;

        let block_size = super_block.block_size.bytes() as u64;
        if self.source.length() % block_size != 0 {
            return Err(Error::CorruptFile("size not multiple of block size"));
        }

        let fpm_offset = block_to_offset(super_block.free_block_map_block, super_block.block_size);
        let fpm_view = self.source.read_bytes(fpm_offset, block_size)?;
        let free_page_map = BitmapFreeList::from_fpm_block(fpm_view.as_bytes());

        let num_directory_blocks = bytes_to_blocks(super_block.num_directory_bytes, super_block.block_size);
        let block_map_offset = block_to_offset(super_block.block_map_addr, super_block.block_size);
        let block_map_view = self
            .source
            .read_bytes(block_map_offset, num_directory_blocks as u64 * 4)?;
        let mut directory_blocks = Vec::with_capacity(num_directory_blocks as usize);
        for chunk in block_map_view.as_bytes().chunks_exact(4) {
            directory_blocks.push(u32::from_le_bytes(chunk.try_into().unwrap()));
        }
        let directory_blocks: &'a [u32] = self.arena.alloc_slice_copy(&directory_blocks);

        trace!(
            num_blocks = super_block.num_blocks,
            num_directory_blocks, "parsed headers"
        );

        *self.header.borrow_mut() = Some(HeaderState {
            super_block,
            directory_blocks,
            free_page_map,
        });
        Ok(())
    }

    /// Parses the stream directory into a full [`MsfLayout`]. Idempotent;
    /// calls [`Self::parse_headers`] first if that hasn't happened yet.
    pub fn parse_directory(&self) -> Result<()> {
        if self.layout.borrow().is_some() {
            return Ok(());
        }
        self.parse_headers()?;

        let span = trace_span!("parse_directory");
        let _enter = span.enter();

        let header_guard = self.header.borrow();
        let header = header_guard.as_ref().expect("parse_headers just succeeded");
        let block_size = header.super_block.block_size;

        // A stub layout carrying only what `create_directory_stream` reads
        // (the super block and directory block list); the real layout isn't
        // assembled until the directory payload below has been parsed.
        let stub_layout = MsfLayout {
            super_block: header.super_block,
            directory_blocks: header.directory_blocks,
            free_page_map: header.free_page_map.clone(),
            stream_sizes: &[],
            stream_map: Vec::new(),
        };
        let dir_stream = MappedBlockStream::create_directory_stream(&stub_layout, self.source.clone());

        let mut pos = 0u32;
        let num_streams = read_u32(&dir_stream, &mut pos)?;

        // `num_streams` and `expected_blocks` below are decoded from
        // untrusted directory bytes; never pre-reserve capacity from them
        // directly; `read_u32` fails fast once `pos` runs past the
        // directory stream's true length, so a huge but bogus count cannot
        // trigger an oversized allocation before that check ever runs.
        let mut stream_sizes = Vec::new();
        for _ in 0..num_streams {
            stream_sizes.push(read_u32(&dir_stream, &mut pos)?);
        }

        let mut stream_map: Vec<Vec<u32>> = Vec::new();
        for &size in &stream_sizes {
            let expected_blocks = bytes_to_blocks(size, block_size);
            let mut blocks = Vec::new();
            for _ in 0..expected_blocks {
                let b = read_u32(&dir_stream, &mut pos)?;
                let end_offset = block_to_offset(b + 1, block_size);
                if end_offset > self.source.length() {
                    return Err(Error::CorruptFile("stream block map corrupt"));
                }
                blocks.push(b);
            }
            stream_map.push(blocks);
        }

        if pos != header.super_block.num_directory_bytes {
            return Err(Error::CorruptFile("stream directory not fully consumed"));
        }

        let stream_sizes: &'a [u32] = self.arena.alloc_slice_copy(&stream_sizes);
        let stream_map: Vec<&'a [u32]> = stream_map
            .iter()
            .map(|blocks| &*self.arena.alloc_slice_copy(blocks))
            .collect();

        let layout = MsfLayout {
            super_block: header.super_block,
            directory_blocks: header.directory_blocks,
            free_page_map: header.free_page_map.clone(),
            stream_sizes,
            stream_map,
        };
        drop(header_guard);
        *self.layout.borrow_mut() = Some(layout);
        Ok(())
    }

    /// The number of streams in the directory.
    pub fn num_streams(&self) -> Result<u32> {
        self.parse_directory()?;
        Ok(self.layout.borrow().as_ref().unwrap().num_streams())
    }

    /// Returns a clone of the fully parsed layout.
    pub fn layout(&self) -> Result<MsfLayout<'a>> {
        self.parse_directory()?;
        Ok(self.layout.borrow().clone().expect("parse_directory just succeeded"))
    }

    /// Returns the (lazily constructed, cached) [`MappedBlockStream`] for
    /// stream `index`.
    pub fn stream(&self, index: u32) -> Result<Arc<MappedBlockStream>> {
        self.parse_directory()?;
        if let Some(cached) = self.stream_cache.borrow().get(&index) {
            return Ok(cached.clone());
        }
        let layout_guard = self.layout.borrow();
        let layout = layout_guard.as_ref().expect("parse_directory just succeeded");
        let stream = Arc::new(MappedBlockStream::create_indexed_stream(
            layout,
            self.source.clone(),
            index,
        )?);
        drop(layout_guard);
        self.stream_cache.borrow_mut().insert(index, stream.clone());
        Ok(stream)
    }

    /// Always fails: an `MsfFile` is a read-only view.
    pub fn set_block_data(&self, _block: u32, _data: &[u8]) -> Result<()> {
        Err(Error::NotWritable)
    }
}

fn read_u32(stream: &MappedBlockStream, pos: &mut u32) -> Result<u32> {
    let view = stream.read_bytes(*pos, 4)?;
    let value = u32::from_le_bytes(view.as_bytes().try_into().unwrap());
    *pos += 4;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MsfBuilder;
    use crate::source::SliceSource;

    fn build_and_serialize(block_size: u32, stream_sizes: &[u32]) -> Vec<u8> {
        let build_arena = Bump::new();
        let mut b = MsfBuilder::create(&build_arena, block_size, 0, true).unwrap();
        for &sz in stream_sizes {
            b.add_stream(sz).unwrap();
        }
        let layout = b.build().unwrap();
        crate::testutil::serialize(&layout)
    }

    #[test]
    fn round_trip_headers_and_directory() {
        let bytes = build_and_serialize(512, &[100, 4000, 1]);
        let arena = Bump::new();
        let source: Arc<dyn ReadableSource> = Arc::new(SliceSource::new(bytes));
        let file = MsfFile::new(source, &arena);
        file.parse_headers().unwrap();
        file.parse_directory().unwrap();
        assert_eq!(file.num_streams().unwrap(), 3);

        let layout = file.layout().unwrap();
        assert_eq!(layout.stream_sizes, &[100, 4000, 1]);
    }

    #[test]
    fn stream_accessor_reads_correct_bytes() {
        let bytes = build_and_serialize(512, &[1500]);
        let arena = Bump::new();
        let source: Arc<dyn ReadableSource> = Arc::new(SliceSource::new(bytes));
        let file = MsfFile::new(source, &arena);
        let stream = file.stream(0).unwrap();
        assert_eq!(stream.length(), 1500);
        let view = stream.read_bytes(0, 1500).unwrap();
        assert_eq!(view.as_bytes().len(), 1500);
    }

    #[test]
    fn stream_accessor_is_cached() {
        let bytes = build_and_serialize(512, &[10, 20]);
        let arena = Bump::new();
        let source: Arc<dyn ReadableSource> = Arc::new(SliceSource::new(bytes));
        let file = MsfFile::new(source, &arena);
        let a = file.stream(1).unwrap();
        let b = file.stream(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn set_block_data_rejected() {
        let bytes = build_and_serialize(512, &[10]);
        let arena = Bump::new();
        let source: Arc<dyn ReadableSource> = Arc::new(SliceSource::new(bytes));
        let file = MsfFile::new(source, &arena);
        assert!(matches!(file.set_block_data(0, &[0]), Err(Error::NotWritable)));
    }

    // S6: corrupt header.
    #[test]
    fn s6_corrupt_header() {
        let arena = Bump::new();
        let source: Arc<dyn ReadableSource> = Arc::new(SliceSource::new(vec![0u8; 4096]));
        let file = MsfFile::new(source, &arena);
        assert!(matches!(file.parse_headers(), Err(Error::CorruptFile(_))));
    }

    // S7: odd file length.
    #[test]
    fn s7_odd_file_length() {
        let mut bytes = build_and_serialize(512, &[10]);
        bytes.push(0);
        let arena = Bump::new();
        let source: Arc<dyn ReadableSource> = Arc::new(SliceSource::new(bytes));
        let file = MsfFile::new(source, &arena);
        let err = file.parse_headers().unwrap_err();
        assert!(matches!(err, Error::CorruptFile(_)));
    }
}
