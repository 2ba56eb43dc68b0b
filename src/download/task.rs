//! Download task definition.
//!
//! A [`DownloadTask`] is one file-download unit of work. Tasks are produced
//! by the hub planner (search results or a replayed record file) and are
//! immutable once built.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Digest algorithm used to verify a downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    /// MD5, the checksum published by DHuS hubs.
    #[default]
    Md5,
    /// SHA-256.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Returns the stable lowercase label used in config and record files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the hex digest produced by this algorithm.
    #[must_use]
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a checksum algorithm or tagged checksum.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumParseError {
    /// Algorithm label is not one of the supported ones.
    #[error("unsupported checksum algorithm '{0}' (expected md5 or sha256)")]
    UnknownAlgorithm(String),

    /// Digest is not a hex string of the right length.
    #[error("invalid {algorithm} digest '{digest}'")]
    InvalidDigest {
        /// Algorithm the digest was parsed for.
        algorithm: ChecksumAlgorithm,
        /// Offending digest text.
        digest: String,
    },

    /// Tagged form lacks the `algo:` prefix.
    #[error("checksum '{0}' is missing an algorithm tag (expected algo:hex)")]
    MissingTag(String),
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(ChecksumParseError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Expected checksum of a remote file: algorithm plus lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedChecksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ExpectedChecksum {
    /// Builds an expected checksum, normalising the digest to lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumParseError::InvalidDigest`] if the digest is not hex
    /// or has the wrong length for the algorithm.
    pub fn new(algorithm: ChecksumAlgorithm, hex: &str) -> Result<Self, ChecksumParseError> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumParseError::InvalidDigest {
                algorithm,
                digest: hex,
            });
        }
        Ok(Self { algorithm, hex })
    }

    /// Builds an expected checksum without validating the digest shape.
    ///
    /// Used for digests coming from sources that have already been checked,
    /// and in tests that use short placeholder digests.
    #[must_use]
    pub fn unchecked(algorithm: ChecksumAlgorithm, hex: &str) -> Self {
        Self {
            algorithm,
            hex: hex.trim().to_ascii_lowercase(),
        }
    }

    /// The digest algorithm.
    #[must_use]
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// The lowercase hex digest.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Case-insensitive comparison against a computed digest.
    #[must_use]
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex.trim())
    }
}

impl fmt::Display for ExpectedChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for ExpectedChecksum {
    type Err = ChecksumParseError;

    /// Parses the tagged `algo:hex` form written to record files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| ChecksumParseError::MissingTag(s.to_string()))?;
        let algorithm = algo.parse::<ChecksumAlgorithm>()?;
        Ok(Self::unchecked(algorithm, hex))
    }
}

/// One file to download and verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    remote_identifier: String,
    url: String,
    target_path: PathBuf,
    expected_checksum: ExpectedChecksum,
    expected_size: Option<u64>,
}

impl DownloadTask {
    /// Creates a task for `remote_identifier`, fetched from `url` into `target_path`.
    #[must_use]
    pub fn new(
        remote_identifier: impl Into<String>,
        url: impl Into<String>,
        target_path: impl Into<PathBuf>,
        expected_checksum: ExpectedChecksum,
    ) -> Self {
        Self {
            remote_identifier: remote_identifier.into(),
            url: url.into(),
            target_path: target_path.into(),
            expected_checksum,
            expected_size: None,
        }
    }

    /// Sets the expected byte count, enabling truncation detection.
    #[must_use]
    pub fn with_expected_size(mut self, expected_size: u64) -> Self {
        self.expected_size = Some(expected_size);
        self
    }

    /// Opaque identifier of the product on the hub.
    #[must_use]
    pub fn remote_identifier(&self) -> &str {
        &self.remote_identifier
    }

    /// Resolved fetch URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Final location of the verified file.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Checksum the downloaded content must match.
    #[must_use]
    pub fn expected_checksum(&self) -> &ExpectedChecksum {
        &self.expected_checksum
    }

    /// Expected size in bytes, when the source publishes it.
    #[must_use]
    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }
}
