//! Error types for NIfTI decoding and encoding.

use thiserror::Error;

/// Result alias used throughout the `nifti` module.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding or encoding a NIfTI byte stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure (including truncated streams).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header does not carry a recognised NIfTI magic or size field.
    #[error("invalid NIfTI magic: {0:?}")]
    InvalidMagic([u8; 4]),

    /// Datatype code is not one of the supported storage types.
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(i16),

    /// Header dimensions, spacing or offsets are inconsistent.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Stream is structurally valid NIfTI but uses a layout we do not read.
    #[error("invalid file format: {0}")]
    InvalidFileFormat(String),

    /// Gzip stream could not be inflated.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Gzip stream could not be produced.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Voxel values cannot be stored in the requested data type.
    #[error("data type mismatch: expected {expected}, got {got}")]
    DataTypeMismatch {
        /// Storage type that was requested.
        expected: String,
        /// Description of the offending value.
        got: String,
    },

    /// Array shape disagrees with the header.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}
