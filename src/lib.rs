//! Reads and builds Multi-Stream Files (MSF), the container format
//! underlying Program Database (PDB) files.
//!
//! An MSF file virtualizes a set of independent, logically contiguous byte
//! streams over a physical sequence of fixed-size blocks, the same way a
//! minimalist filesystem virtualizes files over disk sectors. This crate
//! covers exactly that container layer: a [`reader::MsfFile`] that parses an
//! existing file's super block, free-page map, and stream directory, and a
//! [`builder::MsfBuilder`] that assembles those same structures from a fresh
//! set of streams. Parsing or interpreting the *contents* of any stream
//! (DBI, TPI, symbol records, and the rest of the PDB format built on top of
//! MSF) is out of scope.

mod bitmap;
mod block;
mod builder;
mod error;
mod reader;
mod source;
mod stream;
mod superblock;

#[cfg(test)]
mod testutil;

pub use block::BlockSize;
pub use builder::{MsfBuilder, MsfLayout};
pub use error::{Error, Result};
pub use reader::MsfFile;
pub use source::{MmapSource, ReadableSource, SliceSource, View};
pub use stream::MappedBlockStream;
pub use superblock::{is_msf_header, SuperBlock};

/// Sentinel stream size meaning "deleted/absent stream": present in the
/// directory, zero blocks, round-trips faithfully (spec.md §9).
pub const NIL_STREAM_SIZE: u32 = u32::MAX;
