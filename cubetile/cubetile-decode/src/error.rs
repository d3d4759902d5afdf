//! Error types for decoding operations.

use std::fmt;

/// Errors that can occur while decoding tile image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input buffer is too small for the expected data.
    BufferTooSmall { expected: usize, actual: usize },
    /// The data signature does not match any supported image format.
    UnknownFormat,
    /// The image decoder rejected the data.
    InvalidImage {
        context: &'static str,
        detail: String,
    },
    /// Decoded pixel data does not match the reported dimensions.
    SizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { expected, actual } => {
                write!(
                    f,
                    "buffer too small: expected {expected} bytes, got {actual}"
                )
            }
            Self::UnknownFormat => write!(f, "unknown image format signature"),
            Self::InvalidImage { context, detail } => {
                write!(f, "invalid {context} image: {detail}")
            }
            Self::SizeMismatch { expected, actual } => {
                write!(
                    f,
                    "pixel data size mismatch: expected {expected} bytes, got {actual}"
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
