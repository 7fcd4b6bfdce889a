//! Codec error type.

use thiserror::Error;

/// Error produced by the ChainPack reader and writer.
///
/// A failed call leaves the stream position undefined; callers are expected
/// to stop decoding (or drop the whole frame) once an error is returned.
#[derive(Debug, Error)]
pub enum CpError {
    /// The input does not follow the ChainPack grammar: unknown packing
    /// schema byte, reserved length marker, or a date that cannot be
    /// rescaled to milliseconds.
    #[error("malformed input: {0}")]
    MalformedInput(&'static str),

    /// A value that cannot be represented on the wire was given to the
    /// writer.
    #[error("logical error: {0}")]
    LogicalError(&'static str),

    /// The byte source was exhausted in the middle of an item.
    #[error("buffer underflow")]
    BufferUnderflow,

    /// I/O failure of the underlying reader or writer.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CpError {
    /// True when the error marks a clean end of the byte stream rather
    /// than garbled data.
    pub fn is_underflow(&self) -> bool {
        matches!(self, CpError::BufferUnderflow)
    }
}

/// Codec result type.
pub type Result<T> = std::result::Result<T, CpError>;
