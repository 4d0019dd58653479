//! Error kinds returned by this crate.

use thiserror::Error;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminated error kinds for MSF parsing and building.
///
/// Errors are returned by value; there is no exception-like unwinding here.
/// Readers abandon all partial state on the first error they encounter and
/// must not be queried further (see [`crate::reader::MsfFile`]).
#[derive(Debug, Error)]
pub enum Error {
    /// The requested block size is unsupported, or some other structural
    /// field of the header is invalid on its face (independent of the rest
    /// of the file).
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),

    /// The file's contents are inconsistent with a well-formed MSF
    /// container: bad magic, a file length that isn't a multiple of the
    /// block size, or a block index that runs off the end of the file.
    #[error("corrupt file: {0}")]
    CorruptFile(&'static str),

    /// The builder needed to allocate more blocks than are free, and was not
    /// configured to grow.
    #[error("insufficient buffer: not enough free blocks and builder is not growable")]
    InsufficientBuffer,

    /// An operation tried to reserve a block that is already in use.
    #[error("block in use: block {0} is already reserved")]
    BlockInUse(u32),

    /// A policy violation that doesn't fit any of the other kinds, such as
    /// an attempt to reuse a block that a stream's block list already
    /// claims.
    #[error("{0}")]
    Unspecified(String),

    /// A write-shaped operation was attempted on a read-only [`crate::reader::MsfFile`].
    #[error("not writable: MsfFile is read-only")]
    NotWritable,
}

impl Error {
    /// Constructs an [`Error::Unspecified`] from a `fmt`-style message.
    pub(crate) fn unspecified(msg: impl Into<String>) -> Self {
        Error::Unspecified(msg.into())
    }
}

/// Converts an I/O failure (e.g. opening or mapping a file) into the single
/// discriminated error type this crate returns. Callers never see
/// `std::io::Error` directly.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::unspecified(format!("io error: {e}"))
    }
}
