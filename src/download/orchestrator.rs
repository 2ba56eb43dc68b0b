//! Per-task state machine and sequential batch driver.
//!
//! Each [`DownloadTask`] moves through
//!
//! ```text
//! Pending -> Downloading -> Verifying -> Committed
//!                 |              |
//!                 v              v
//!              Retrying  <-------+
//!                 |
//!                 v
//!              Recorded
//! ```
//!
//! The [`RetryPolicy`] decides every transition; this module only performs
//! the side effects: fetching, verifying, renaming into place and handing
//! failures to the [`FailureRecorder`].
//!
//! A task's target path only ever appears by atomic rename of a verified
//! temp file. Every task ends exactly one of committed, skipped or recorded.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::checksum::verify_file;
use super::constants::DEFAULT_LOG_BLOCK_SIZE;
use super::outcome::AttemptOutcome;
use super::progress::{ProgressLogger, pretty_bytes};
use super::retry::{NextAction, RetryPolicy};
use super::streaming::{Fetch, temp_path_for};
use super::task::DownloadTask;
use crate::failure::{FailureRecord, FailureRecorder, RecordError};
use crate::shutdown::SharedShutdown;

/// Reason recorded for tasks not started because of an interrupt.
pub const INTERRUPTED_BEFORE_DOWNLOAD: &str = "interrupted before download";

/// Reason recorded for the task in flight when an interrupt arrived.
pub const INTERRUPTED_DURING_DOWNLOAD: &str = "interrupted during download";

/// Errors that abort a whole batch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A failure could not be written to the record file.
    #[error("failed to record download failure: {0}")]
    Recording(#[from] RecordError),
}

/// Lifecycle state of a task, used for transition logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not yet attempted.
    Pending,
    /// Streaming to the temp file.
    Downloading,
    /// Hashing the temp file.
    Verifying,
    /// Waiting out the backoff before another attempt.
    Retrying,
    /// Renamed into place.
    Committed,
    /// Handed to the failure recorder.
    Recorded,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Retrying => "retrying",
            Self::Committed => "committed",
            Self::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

/// How a single task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResolution {
    /// The verified file is at its target path.
    Committed {
        /// Final path of the file.
        path: PathBuf,
        /// File size in bytes.
        bytes: u64,
        /// Attempts used, including the successful one.
        attempts: u32,
    },

    /// A valid target already existed and skipping was enabled.
    Skipped,

    /// The task failed permanently and must be recorded.
    Recorded {
        /// Record to append to the record file.
        record: FailureRecord,
        /// Attempts used.
        attempts: u32,
    },
}

impl TaskResolution {
    fn attempts(&self) -> u32 {
        match self {
            Self::Committed { attempts, .. } | Self::Recorded { attempts, .. } => *attempts,
            Self::Skipped => 0,
        }
    }

    /// True when an interrupt cut this task short.
    fn was_interrupted(&self) -> bool {
        matches!(self, Self::Recorded { record, .. } if record.reason == INTERRUPTED_DURING_DOWNLOAD)
    }
}

/// Counts from one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Tasks whose file was committed.
    pub committed: usize,
    /// Tasks appended to the record file.
    pub recorded: usize,
    /// Tasks skipped because a valid target already existed.
    pub skipped: usize,
    /// Extra attempts made beyond each task's first.
    pub retried: usize,
    /// True when the run stopped early on an interrupt.
    pub interrupted: bool,
}

impl BatchStats {
    /// Total tasks resolved.
    #[must_use]
    pub fn total(&self) -> usize {
        self.committed + self.recorded + self.skipped
    }

    /// True when every task ended committed or skipped.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.recorded == 0 && !self.interrupted
    }

    /// Adds another run's counts to this one.
    pub fn merge(&mut self, other: &BatchStats) {
        self.committed += other.committed;
        self.recorded += other.recorded;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.interrupted |= other.interrupted;
    }
}

/// Drives tasks one at a time through fetch, verify and commit.
pub struct DownloadOrchestrator {
    fetcher: Box<dyn Fetch>,
    policy: RetryPolicy,
    log_block_size: u64,
    skip_existing: bool,
    shutdown: Option<SharedShutdown>,
}

impl fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("policy", &self.policy)
            .field("log_block_size", &self.log_block_size)
            .field("skip_existing", &self.skip_existing)
            .field("shutdown", &self.shutdown.is_some())
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    /// Creates an orchestrator around a transport and a retry policy.
    #[must_use]
    pub fn new(fetcher: Box<dyn Fetch>, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy,
            log_block_size: DEFAULT_LOG_BLOCK_SIZE,
            skip_existing: false,
            shutdown: None,
        }
    }

    /// Sets the progress logging interval in bytes.
    #[must_use]
    pub fn with_log_block_size(mut self, log_block_size: u64) -> Self {
        self.log_block_size = log_block_size;
        self
    }

    /// Skips tasks whose target already exists with the expected checksum.
    #[must_use]
    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    /// Stops early when `shutdown` is requested.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    /// Processes `tasks` in order, recording every permanent failure.
    ///
    /// When shutdown is requested the in-flight task and all remaining tasks
    /// are recorded so a resume retries them.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Recording`] if a failure cannot be persisted;
    /// processing stops at that point.
    #[instrument(skip(self, tasks, recorder), fields(tasks = tasks.len(), record_file = %recorder.path().display()))]
    pub async fn run(
        &self,
        tasks: &[DownloadTask],
        recorder: &mut FailureRecorder,
    ) -> Result<BatchStats, EngineError> {
        let mut stats = BatchStats::default();
        info!(count = tasks.len(), "starting downloads");

        for (index, task) in tasks.iter().enumerate() {
            if self.shutdown_requested() {
                warn!(
                    remaining = tasks.len() - index,
                    "interrupt received, recording remaining tasks"
                );
                for pending in &tasks[index..] {
                    recorder
                        .append(&FailureRecord::from_task(pending, INTERRUPTED_BEFORE_DOWNLOAD))
                        .await?;
                    stats.recorded += 1;
                }
                stats.interrupted = true;
                break;
            }

            info!(
                index = index + 1,
                total = tasks.len(),
                id = task.remote_identifier(),
                "processing task"
            );
            let resolution = self.process_task(task).await;
            stats.retried += resolution.attempts().saturating_sub(1) as usize;
            stats.interrupted |= resolution.was_interrupted();

            match resolution {
                TaskResolution::Committed { .. } => stats.committed += 1,
                TaskResolution::Skipped => stats.skipped += 1,
                TaskResolution::Recorded { record, .. } => {
                    recorder.append(&record).await?;
                    stats.recorded += 1;
                }
            }
        }

        info!(
            committed = stats.committed,
            recorded = stats.recorded,
            skipped = stats.skipped,
            retried = stats.retried,
            interrupted = stats.interrupted,
            "downloads finished"
        );
        Ok(stats)
    }

    /// Runs one task to a terminal state. Never fails: problems become a
    /// [`TaskResolution::Recorded`].
    #[instrument(skip(self, task), fields(id = task.remote_identifier(), target = %task.target_path().display()))]
    pub async fn process_task(&self, task: &DownloadTask) -> TaskResolution {
        if self.skip_existing && existing_target_is_valid(task).await {
            info!("target exists with matching checksum, skipping");
            return TaskResolution::Skipped;
        }

        let mut progress = ProgressLogger::new(self.log_block_size);
        let mut attempts: u32 = 1;
        let mut state = StateTrail::default();
        state.advance(TaskState::Downloading, attempts);
        let Some(mut outcome) = self.fetch_once(task, &mut progress).await else {
            return interrupted(task, attempts);
        };

        loop {
            match self.policy.next_action(&outcome, attempts) {
                NextAction::Verify => {
                    state.advance(TaskState::Verifying, attempts);
                    outcome = verify_outcome(task, outcome).await;
                }
                NextAction::Commit => match commit(task, &outcome).await {
                    Ok((path, bytes)) => {
                        state.advance(TaskState::Committed, attempts);
                        info!(
                            path = %path.display(),
                            size = %pretty_bytes(bytes),
                            attempts,
                            "download committed"
                        );
                        return TaskResolution::Committed {
                            path,
                            bytes,
                            attempts,
                        };
                    }
                    Err(failure) => outcome = failure,
                },
                NextAction::Retry { delay, attempt } => {
                    state.advance(TaskState::Retrying, attempts);
                    warn!(
                        outcome = %outcome,
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, will retry"
                    );
                    if !self.sleep_unless_shutdown(delay).await {
                        return interrupted(task, attempts);
                    }
                    attempts = attempt;
                    state.advance(TaskState::Downloading, attempts);
                    match self.fetch_once(task, &mut progress).await {
                        Some(next) => outcome = next,
                        None => return interrupted(task, attempts),
                    }
                }
                NextAction::RecordFailure { reason } => {
                    state.advance(TaskState::Recorded, attempts);
                    return TaskResolution::Recorded {
                        record: FailureRecord::from_task(task, reason),
                        attempts,
                    };
                }
            }
        }
    }

    /// One fetch, abandoned if shutdown is requested mid-stream.
    async fn fetch_once(
        &self,
        task: &DownloadTask,
        progress: &mut ProgressLogger,
    ) -> Option<AttemptOutcome> {
        let Some(shutdown) = &self.shutdown else {
            return Some(self.fetcher.fetch(task, progress).await);
        };

        tokio::select! {
            outcome = self.fetcher.fetch(task, progress) => Some(outcome),
            () = shutdown.wait_for_shutdown() => {
                remove_temp(&temp_path_for(task.target_path())).await;
                None
            }
        }
    }

    /// Returns false if shutdown interrupted the wait.
    async fn sleep_unless_shutdown(&self, delay: std::time::Duration) -> bool {
        match &self.shutdown {
            None => {
                tokio::time::sleep(delay).await;
                true
            }
            Some(shutdown) => tokio::select! {
                () = tokio::time::sleep(delay) => true,
                () = shutdown.wait_for_shutdown() => false,
            },
        }
    }
}

async fn existing_target_is_valid(task: &DownloadTask) -> bool {
    match verify_file(task.target_path(), task.expected_checksum()).await {
        Ok(verification) if verification.matches => true,
        Ok(verification) => {
            debug!(actual = %verification.actual, "existing target has wrong checksum");
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            debug!(error = %e, "cannot read existing target");
            false
        }
    }
}

/// Current state of one task; every change is logged from where it was.
#[derive(Debug)]
struct StateTrail {
    current: TaskState,
}

impl Default for StateTrail {
    fn default() -> Self {
        Self {
            current: TaskState::Pending,
        }
    }
}

impl StateTrail {
    /// Moves to `to` and returns the state left behind.
    fn advance(&mut self, to: TaskState, attempt: u32) -> TaskState {
        let from = std::mem::replace(&mut self.current, to);
        debug!(%from, %to, attempt, "task state change");
        from
    }
}

fn interrupted(task: &DownloadTask, attempts: u32) -> TaskResolution {
    warn!(id = task.remote_identifier(), "download interrupted");
    TaskResolution::Recorded {
        record: FailureRecord::from_task(task, INTERRUPTED_DURING_DOWNLOAD),
        attempts,
    }
}

/// Turns a `Success` into `Verified` or `ChecksumMismatch`.
///
/// On mismatch or read failure the temp file is removed.
async fn verify_outcome(task: &DownloadTask, outcome: AttemptOutcome) -> AttemptOutcome {
    let AttemptOutcome::Success {
        temp_path,
        bytes_written,
    } = outcome
    else {
        return outcome;
    };

    let expected = task.expected_checksum();
    match verify_file(&temp_path, expected).await {
        Ok(verification) if verification.matches => {
            debug!(algorithm = %expected.algorithm(), "checksum verified");
            AttemptOutcome::Verified {
                temp_path,
                bytes_written,
            }
        }
        Ok(verification) => {
            warn!(
                expected = expected.hex(),
                actual = %verification.actual,
                "checksum mismatch"
            );
            remove_temp(&temp_path).await;
            AttemptOutcome::ChecksumMismatch {
                actual: verification.actual,
                expected: expected.hex().to_string(),
            }
        }
        Err(e) => {
            remove_temp(&temp_path).await;
            AttemptOutcome::LocalIo {
                detail: format!("failed to hash {}: {e}", temp_path.display()),
            }
        }
    }
}

/// Atomically renames a verified temp file onto the task's target.
async fn commit(
    task: &DownloadTask,
    outcome: &AttemptOutcome,
) -> Result<(PathBuf, u64), AttemptOutcome> {
    let AttemptOutcome::Verified {
        temp_path,
        bytes_written,
    } = outcome
    else {
        return Err(AttemptOutcome::LocalIo {
            detail: format!("cannot commit unverified outcome: {outcome}"),
        });
    };

    let target = task.target_path();
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty())
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        remove_temp(temp_path).await;
        return Err(AttemptOutcome::LocalIo {
            detail: format!("failed to create {}: {e}", parent.display()),
        });
    }

    if let Err(e) = tokio::fs::rename(temp_path, target).await {
        remove_temp(temp_path).await;
        return Err(AttemptOutcome::LocalIo {
            detail: format!(
                "failed to move {} to {}: {e}",
                temp_path.display(),
                target.display()
            ),
        });
    }

    Ok((target.to_path_buf(), *bytes_written))
}

async fn remove_temp(temp_path: &Path) {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => debug!(path = %temp_path.display(), "removed temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp_path.display(), error = %e, "failed to remove temp file"),
    }
}
