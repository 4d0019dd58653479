//! Byte sources: the polymorphic backing store an [`crate::reader::MsfFile`]
//! reads from.
//!
//! Grounded on spec.md §4.4's `ReadableSource` and on the `ReadableStream`
//! abstraction `PDBFile.cpp` reads through (`Buffer->readBytes`), adapted to
//! two concrete Rust backings: an owned/borrowed byte slice and a
//! memory-mapped file (the latter's use pattern grounded on other repos in
//! this retrieval pack that layer a container format over `memmap2`, e.g.
//! `lspecian-vexfs` and `Blaidd-Drwg-ofs-convert-rs`).

use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// A zero-copy view of bytes obtained from a [`ReadableSource`].
///
/// Cheap to clone: it's a reference-counted slice, not an owned copy. This
/// lets [`crate::stream::MappedBlockStream`] hand out views that borrow
/// directly from a memory-mapped file without any copying, while still
/// supporting pooled, owned buffers when a read must gather bytes from more
/// than one block.
#[derive(Clone)]
pub struct View(Arc<dyn AsRef<[u8]> + Send + Sync>, usize, usize);

impl View {
    fn from_arc(data: Arc<dyn AsRef<[u8]> + Send + Sync>, start: usize, len: usize) -> Self {
        View(data, start, len)
    }

    /// Wraps a pooled, owned buffer (used by [`crate::stream::MappedBlockStream`]
    /// when a read has to gather bytes from more than one block).
    pub(crate) fn from_pooled(data: Arc<Vec<u8>>, start: usize, len: usize) -> Self {
        let data: Arc<dyn AsRef<[u8]> + Send + Sync> = data;
        Self::from_arc(data, start, len)
    }

    /// Borrows the bytes of this view.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0.as_ref().as_ref()[self.1..self.1 + self.2]
    }
}

impl AsRef<[u8]> for View {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").field("len", &self.2).finish()
    }
}

/// A random-access, read-only byte source.
///
/// Implementations may be backed by an in-memory buffer or a memory-mapped
/// file. `read_bytes` returns a zero-copy [`View`] whenever the requested
/// range is contained entirely within the source's backing storage (true for
/// every implementation in this crate, since both back a single contiguous
/// span); the scatter/gather required to present a *stream* (whose blocks
/// are not contiguous) is [`crate::stream::MappedBlockStream`]'s job, layered
/// on top of this trait.
pub trait ReadableSource: Send + Sync {
    /// The total length of the source, in bytes.
    fn length(&self) -> u64;

    /// Returns a view of `len` bytes starting at `offset`.
    ///
    /// Returns [`Error::CorruptFile`] (reported as an out-of-range read) if
    /// `offset + len` exceeds [`Self::length`].
    fn read_bytes(&self, offset: u64, len: u64) -> Result<View>;
}

/// An in-memory byte source, owning its backing buffer.
pub struct SliceSource {
    data: Arc<Vec<u8>>,
}

impl SliceSource {
    /// Wraps an owned buffer as a byte source.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Arc::new(data) }
    }
}

impl ReadableSource for SliceSource {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_bytes(&self, offset: u64, len: u64) -> Result<View> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::CorruptFile("read range overflows"))?;
        if end > self.length() {
            return Err(Error::CorruptFile("read out of range"));
        }
        Ok(View::from_arc(self.data.clone(), offset as usize, len as usize))
    }
}

/// A byte source backed by a memory-mapped file.
pub struct MmapSource {
    map: Arc<memmap2::Mmap>,
}

impl MmapSource {
    /// Memory-maps the file at `path` for read access.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        // Safety: the caller must not concurrently truncate or otherwise
        // shrink the underlying file while this mapping is alive; that is
        // the standard, documented caveat of `memmap2::Mmap::map`.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Self { map: Arc::new(map) })
    }
}

impl ReadableSource for MmapSource {
    fn length(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_bytes(&self, offset: u64, len: u64) -> Result<View> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::CorruptFile("read range overflows"))?;
        if end > self.length() {
            return Err(Error::CorruptFile("read out of range"));
        }
        Ok(View::from_arc(self.map.clone(), offset as usize, len as usize))
    }
}
