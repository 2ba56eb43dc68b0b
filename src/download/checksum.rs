//! Checksum verification of downloaded files.
//!
//! Files are streamed through the digest in fixed-size reads so product files
//! of several gigabytes never need to fit in memory.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use super::constants::HASH_READ_BUFFER;
use super::task::{ChecksumAlgorithm, ExpectedChecksum};

/// Result of checking a file against an expected checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Whether the computed digest equals the expected one.
    pub matches: bool,
    /// The computed lowercase hex digest, kept for diagnostics.
    pub actual: String,
}

enum RunningDigest {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl RunningDigest {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finish_hex(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Computes the lowercase hex digest of a file.
///
/// # Errors
///
/// Returns the underlying IO error if the file cannot be opened or read.
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn compute_file_digest(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, std::io::Error> {
    let mut file = File::open(path).await?;
    let mut digest = RunningDigest::new(algorithm);
    let mut buffer = vec![0u8; HASH_READ_BUFFER];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }

    Ok(digest.finish_hex())
}

/// Computes the digest of an in-memory buffer.
#[must_use]
pub fn digest_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    let mut digest = RunningDigest::new(algorithm);
    digest.update(data);
    digest.finish_hex()
}

/// Streams `path` through the expected checksum's algorithm and compares.
///
/// # Errors
///
/// Returns the underlying IO error if the file cannot be read. A digest
/// mismatch is not an error; it is reported through [`Verification::matches`].
pub async fn verify_file(
    path: &Path,
    expected: &ExpectedChecksum,
) -> Result<Verification, std::io::Error> {
    let actual = compute_file_digest(path, expected.algorithm()).await?;
    let matches = expected.matches(&actual);
    debug!(
        path = %path.display(),
        algorithm = %expected.algorithm(),
        expected = expected.hex(),
        actual = %actual,
        matches,
        "checksum verified"
    );
    Ok(Verification { matches, actual })
}
