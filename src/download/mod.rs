//! Reliable download of hub products to local files.
//!
//! This module turns a list of [`DownloadTask`]s into verified files on disk.
//!
//! # Features
//!
//! - Streaming downloads into a hidden `.part` file next to the target
//! - MD5 / SHA-256 verification before the file is moved into place
//! - Bounded retries with exponential backoff and `Retry-After` support
//! - Configurable handling of checksum mismatches (record or retry)
//! - Progress logging at a fixed byte interval
//!
//! # Example
//!
//! ```no_run
//! use hubfetch_core::download::{
//!     BadChecksumPolicy, ChecksumAlgorithm, DownloadOrchestrator, DownloadTask,
//!     ExpectedChecksum, HttpClient, RetryPolicy, StreamingDownloader,
//! };
//! use hubfetch_core::failure::FailureRecorder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(None)?;
//! let orchestrator = DownloadOrchestrator::new(
//!     Box::new(StreamingDownloader::new(client)),
//!     RetryPolicy::new(5, BadChecksumPolicy::Record),
//! );
//! let task = DownloadTask::new(
//!     "a1b2",
//!     "https://hub.example/odata/v1/Products('a1b2')/$value",
//!     "./out/a1b2.nc",
//!     ExpectedChecksum::new(ChecksumAlgorithm::Md5, "5d41402abc4b2a76b9719d911017c592")?,
//! );
//! let mut recorder = FailureRecorder::new("failed_downloads.txt");
//! let stats = orchestrator.run(&[task], &mut recorder).await?;
//! println!("committed {}, recorded {}", stats.committed, stats.recorded);
//! # Ok(())
//! # }
//! ```

mod checksum;
mod client;
pub mod constants;
mod error;
mod orchestrator;
mod outcome;
mod progress;
mod retry;
mod streaming;
mod task;

pub use checksum::{Verification, compute_file_digest, digest_bytes, verify_file};
pub use client::{Credentials, HttpClient};
pub use error::DownloadError;
pub use orchestrator::{
    BatchStats, DownloadOrchestrator, EngineError, INTERRUPTED_BEFORE_DOWNLOAD,
    INTERRUPTED_DURING_DOWNLOAD, TaskResolution, TaskState,
};
pub use outcome::AttemptOutcome;
pub use progress::{ProgressLogger, ProgressReport, pretty_bytes};
pub use retry::{
    BadChecksumPolicy, DEFAULT_NUM_TRIES, DEFAULT_RETRY_DELAY, NextAction, RetryPolicy,
    parse_retry_after,
};
pub use streaming::{Fetch, StreamingDownloader, temp_path_for};
pub use task::{ChecksumAlgorithm, ChecksumParseError, DownloadTask, ExpectedChecksum};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
