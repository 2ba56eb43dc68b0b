//! Streaming download of a single task into a temp file.
//!
//! The body is written to `.<file_name>.part` next to the task's target so
//! the final rename stays on one filesystem. Failures never escape as `Err`:
//! every problem is folded into an [`AttemptOutcome`] and the temp file is
//! removed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, map_reqwest_error};
use super::constants::{DEFAULT_BLOCK_SIZE, PARTIAL_SUFFIX};
use super::error::DownloadError;
use super::outcome::AttemptOutcome;
use super::progress::{ProgressLogger, pretty_bytes};
use super::task::DownloadTask;

/// Something that can perform one download attempt for a task.
///
/// [`StreamingDownloader`] is the HTTP implementation; tests substitute fake
/// transports to drive the orchestrator deterministically.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Downloads `task` into its temp file and reports the outcome.
    async fn fetch(&self, task: &DownloadTask, progress: &mut ProgressLogger) -> AttemptOutcome;
}

/// Returns the temp path used while downloading `target`.
#[must_use]
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!(".{name}{PARTIAL_SUFFIX}"))
}

/// HTTP implementation of [`Fetch`].
#[derive(Debug, Clone)]
pub struct StreamingDownloader {
    client: HttpClient,
    block_size: usize,
}

impl StreamingDownloader {
    /// Creates a downloader with the default 1 MiB block size.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self::with_block_size(client, DEFAULT_BLOCK_SIZE)
    }

    /// Creates a downloader writing in blocks of `block_size` bytes.
    #[must_use]
    pub fn with_block_size(client: HttpClient, block_size: u64) -> Self {
        let block_size = usize::try_from(block_size.max(1)).unwrap_or(usize::MAX);
        Self { client, block_size }
    }

    /// Configured write block size.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    async fn stream_to_temp(
        &self,
        task: &DownloadTask,
        temp_path: &Path,
        progress: &mut ProgressLogger,
    ) -> Result<AttemptOutcome, DownloadError> {
        let url = task.url();
        let response = self.client.get(url).await?;
        let expected_size = task.expected_size().or_else(|| response.content_length());

        if let Some(parent) = temp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }
        let file = File::create(temp_path)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        let mut writer = BlockWriter::new(file, self.block_size);

        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
            writer
                .push(&chunk, progress, expected_size)
                .await
                .map_err(|e| DownloadError::io(temp_path, e))?;
        }
        writer
            .finish(progress, expected_size)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;

        let bytes_written = writer.bytes_written();
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;

        if let Some(expected) = expected_size
            && bytes_written < expected
        {
            return Ok(AttemptOutcome::Truncated {
                expected,
                actual: bytes_written,
            });
        }

        Ok(AttemptOutcome::Success {
            temp_path: temp_path.to_path_buf(),
            bytes_written,
        })
    }
}

/// Buffers body chunks and writes them out in `block_size` pieces.
///
/// Progress is recorded after every write, so a single chunk spanning
/// several blocks still produces one report per block.
struct BlockWriter<W> {
    inner: W,
    block: Vec<u8>,
    block_size: usize,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> BlockWriter<W> {
    fn new(inner: W, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            inner,
            block: Vec::with_capacity(block_size.min(16 * 1024 * 1024)),
            block_size,
            bytes_written: 0,
        }
    }

    /// Buffers `chunk` and writes every full block it completes.
    async fn push(
        &mut self,
        chunk: &[u8],
        progress: &mut ProgressLogger,
        expected_size: Option<u64>,
    ) -> std::io::Result<()> {
        self.block.extend_from_slice(chunk);

        let mut start = 0;
        while self.block.len() - start >= self.block_size {
            let end = start + self.block_size;
            self.inner.write_all(&self.block[start..end]).await?;
            start = end;
            self.bytes_written += self.block_size as u64;
            progress.record(self.bytes_written, expected_size);
        }
        self.block.drain(..start);
        Ok(())
    }

    /// Writes the trailing partial block and flushes.
    async fn finish(
        &mut self,
        progress: &mut ProgressLogger,
        expected_size: Option<u64>,
    ) -> std::io::Result<()> {
        if !self.block.is_empty() {
            self.inner.write_all(&self.block).await?;
            self.bytes_written += self.block.len() as u64;
            self.block.clear();
            progress.record(self.bytes_written, expected_size);
        }
        self.inner.flush().await
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

async fn remove_temp(temp_path: &Path) {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => debug!(path = %temp_path.display(), "removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp_path.display(), error = %e, "failed to remove partial file"),
    }
}

#[async_trait]
impl Fetch for StreamingDownloader {
    #[instrument(skip(self, task, progress), fields(id = task.remote_identifier(), target = %task.target_path().display()))]
    async fn fetch(&self, task: &DownloadTask, progress: &mut ProgressLogger) -> AttemptOutcome {
        let temp_path = temp_path_for(task.target_path());
        let label = task
            .target_path()
            .file_name()
            .map_or_else(|| task.remote_identifier().to_string(), |n| n.to_string_lossy().into_owned());
        progress.reset(label);

        let outcome = match self.stream_to_temp(task, &temp_path, progress).await {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!(error = %error, "download attempt failed");
                error.into()
            }
        };

        match &outcome {
            AttemptOutcome::Success { bytes_written, .. } => {
                info!(
                    file = %temp_path.display(),
                    downloaded = %pretty_bytes(*bytes_written),
                    "download complete"
                );
            }
            failure => {
                warn!(
                    downloaded = %pretty_bytes(progress.bytes_so_far()),
                    outcome = %failure,
                    "download failed"
                );
                remove_temp(&temp_path).await;
            }
        }

        outcome
    }
}
