//! hubfetch core library
//!
//! Reliable batch download of satellite data products from a data hub:
//! streamed to disk, verified against the hub's checksum, retried with
//! backoff, and recorded in a resumable failure log when they cannot be
//! fetched.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Streaming downloader, checksum verification, retry policy
//!   and the per-task orchestrator
//! - [`failure`] - Append-only record of failed tasks and resume support
//! - [`hub`] - Hub search, checksum lookup and task planning
//! - [`config`] - INI configuration with `DEFAULT` fallback
//! - [`shutdown`] - Ctrl+C coordination

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod failure;
pub mod hub;
pub mod shutdown;
#[cfg(test)]
pub(crate) mod test_support;
mod user_agent;

// Re-export commonly used types
pub use config::HubConfig;
pub use download::{
    BadChecksumPolicy, BatchStats, DownloadOrchestrator, DownloadTask, EngineError, HttpClient,
    RetryPolicy, StreamingDownloader,
};
pub use failure::{FailureRecord, FailureRecorder, RecordError};
pub use hub::{HubClient, TaskPlan, TaskPlanner};
