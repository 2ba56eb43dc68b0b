//! Per-attempt outcome of downloading one task.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::DownloadError;

/// What happened during a single download attempt.
///
/// The streaming downloader produces `Success` or one of the error variants;
/// the orchestrator turns `Success` into `Verified` or `ChecksumMismatch`
/// after checking the temp file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Body fully streamed to a temp file; not yet verified.
    Success {
        /// Temp file holding the downloaded content.
        temp_path: PathBuf,
        /// Bytes written to the temp file.
        bytes_written: u64,
    },

    /// Temp file content matched the expected checksum.
    Verified {
        /// Temp file holding the verified content.
        temp_path: PathBuf,
        /// Bytes in the verified file.
        bytes_written: u64,
    },

    /// Connection, timeout or body-read failure.
    NetworkError {
        /// Human-readable cause.
        detail: String,
    },

    /// Server answered with a non-2xx status.
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Server-mandated delay from a Retry-After header.
        retry_after: Option<Duration>,
    },

    /// Stream ended before the expected number of bytes arrived.
    Truncated {
        /// Expected byte count.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// Local file system failure while writing the temp file.
    LocalIo {
        /// Human-readable cause.
        detail: String,
    },

    /// Downloaded content does not match the expected checksum.
    ChecksumMismatch {
        /// Computed digest.
        actual: String,
        /// Expected digest.
        expected: String,
    },
}

impl From<DownloadError> for AttemptOutcome {
    fn from(error: DownloadError) -> Self {
        match error {
            DownloadError::HttpStatus {
                status,
                retry_after,
                ..
            } => Self::HttpError {
                status,
                retry_after,
            },
            DownloadError::Io { .. } => Self::LocalIo {
                detail: error.to_string(),
            },
            DownloadError::Network { .. }
            | DownloadError::Timeout { .. }
            | DownloadError::InvalidUrl { .. } => Self::NetworkError {
                detail: error.to_string(),
            },
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { bytes_written, .. } => write!(f, "downloaded {bytes_written} bytes"),
            Self::Verified { bytes_written, .. } => {
                write!(f, "verified {bytes_written} bytes")
            }
            Self::NetworkError { detail } => write!(f, "network error: {detail}"),
            Self::HttpError { status, .. } => write!(f, "HTTP error {status}"),
            Self::Truncated { expected, actual } => {
                write!(f, "truncated download: expected {expected} bytes, got {actual}")
            }
            Self::LocalIo { detail } => write!(f, "local IO error: {detail}"),
            Self::ChecksumMismatch { actual, expected } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}
