//! Error types for the cubetile crate.

use std::fmt;

/// Result type for cubetile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cubetile operations.
#[derive(Debug)]
pub enum Error {
    /// A tile fetch was cancelled before it completed.
    ///
    /// This is expected whenever a tile leaves the view while loading and
    /// is never reported to the user.
    FetchCancelled {
        /// The URL whose fetch was cancelled.
        url: String,
    },
    /// A tile fetch failed in transport.
    FetchFailed {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// The tile server answered with a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// Tile bytes could not be decoded.
    Decode(cubetile_decode::DecodeError),
    /// A level outside the valid range, or one without a generated grid.
    InvalidLevel {
        /// The offending level number.
        level: u32,
        /// What was wrong with it.
        reason: &'static str,
    },
    /// Camera matrices that cannot produce a frustum.
    InvalidCamera {
        /// Description of what was invalid.
        detail: &'static str,
    },
}

impl Error {
    /// Whether this error is an intentional cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::FetchCancelled { .. })
    }

    pub(crate) fn cancelled(url: &str) -> Self {
        Error::FetchCancelled {
            url: url.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FetchCancelled { url } => write!(f, "fetch of {url} was cancelled"),
            Error::FetchFailed { url, message } => {
                write!(f, "fetch of {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::InvalidLevel { level, reason } => {
                write!(f, "invalid level {level}: {reason}")
            }
            Error::InvalidCamera { detail } => write!(f, "invalid camera: {detail}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<cubetile_decode::DecodeError> for Error {
    fn from(e: cubetile_decode::DecodeError) -> Self {
        Error::Decode(e)
    }
}
