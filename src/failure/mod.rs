//! Durable record of tasks that exhausted their attempts.
//!
//! The record file is a plain-text, append-only log with one failed task per
//! line. It is written by [`FailureRecorder`] during a run and read back
//! wholesale by [`load_all`] when resuming with `dlfailed`.
//!
//! # Format
//!
//! ```text
//! # comments and blank lines are ignored
//! <target_path>\t<remote_identifier>\t<algo:hex | ->\t<reason>
//! ```
//!
//! Backslash, tab, carriage return and newline inside a field are written
//! as `\\`, `\t`, `\r` and `\n`, so every record loads back exactly.
//!
//! Lines without a tab are read in the older `<file_name>  <id>  <md5>`
//! layout, separated by whitespace. Such a bare file name is resolved
//! against the output directory when the record is replayed.

use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::download::{ChecksumAlgorithm, DownloadTask, ExpectedChecksum};

/// Placeholder written when no checksum is known for a record.
const NO_CHECKSUM: &str = "-";

/// Reason given to records read from the whitespace-separated layout.
pub const LEGACY_RECORD_REASON: &str = "recorded by an earlier version";

/// Errors reading or writing the record file.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record file could not be opened, written or synced.
    #[error("record file IO error at {path}: {source}")]
    Io {
        /// Record file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line of the record file could not be parsed.
    #[error("malformed record at {path}:{line}: {reason}")]
    Malformed {
        /// Record file path.
        path: PathBuf,
        /// 1-indexed line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },
}

impl RecordError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One permanently failed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Hub identifier of the product.
    pub remote_identifier: String,
    /// Where the file should have been written.
    pub target_path: PathBuf,
    /// Checksum known at failure time, kept for inspection.
    pub expected_checksum: Option<ExpectedChecksum>,
    /// Why the task failed.
    pub reason: String,
}

impl FailureRecord {
    /// Creates a record for a failed task.
    #[must_use]
    pub fn from_task(task: &DownloadTask, reason: impl Into<String>) -> Self {
        Self {
            remote_identifier: task.remote_identifier().to_string(),
            target_path: task.target_path().to_path_buf(),
            expected_checksum: Some(task.expected_checksum().clone()),
            reason: reason.into(),
        }
    }

    /// Creates a record for a product that never became a task.
    #[must_use]
    pub fn unresolved(
        remote_identifier: impl Into<String>,
        target_path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            remote_identifier: remote_identifier.into(),
            target_path: target_path.into(),
            expected_checksum: None,
            reason: reason.into(),
        }
    }

    /// Serialises the record as one line, without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        let checksum = self
            .expected_checksum
            .as_ref()
            .map_or_else(|| NO_CHECKSUM.to_string(), ToString::to_string);
        [
            escape_field(&self.target_path.to_string_lossy()),
            escape_field(&self.remote_identifier),
            checksum,
            escape_field(&self.reason),
        ]
        .join("\t")
    }

    /// Parses one record line (without newline).
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the line has too few
    /// fields, an empty identifier, or an unparseable checksum.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        if !line.contains('\t') {
            return Self::parse_legacy_line(line);
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            return Err(format!(
                "expected at least 2 tab-separated fields, found {}",
                fields.len()
            ));
        }

        let target_path = PathBuf::from(unescape_field(fields[0])?);
        let remote_identifier = unescape_field(fields[1])?;
        if remote_identifier.is_empty() {
            return Err("empty remote identifier".to_string());
        }

        let expected_checksum = match fields.get(2).copied() {
            None | Some("" | NO_CHECKSUM) => None,
            Some(tagged) => Some(
                tagged
                    .parse::<ExpectedChecksum>()
                    .map_err(|e| e.to_string())?,
            ),
        };

        let reason = match fields.get(3) {
            Some(raw) => unescape_field(raw)?,
            None => String::new(),
        };
        if fields.len() > 4 {
            return Err(format!("expected at most 4 fields, found {}", fields.len()));
        }

        Ok(Self {
            remote_identifier,
            target_path,
            expected_checksum,
            reason,
        })
    }
}

impl FailureRecord {
    /// Parses `<file_name> <id> <md5>` separated by any whitespace.
    fn parse_legacy_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [file_name, id, md5] = fields[..] else {
            return Err(format!(
                "expected 4 tab-separated or 3 whitespace-separated fields, found {}",
                fields.len()
            ));
        };
        let checksum =
            ExpectedChecksum::new(ChecksumAlgorithm::Md5, md5).map_err(|e| e.to_string())?;

        Ok(Self {
            remote_identifier: id.to_string(),
            target_path: PathBuf::from(file_name),
            expected_checksum: Some(checksum),
            reason: LEGACY_RECORD_REASON.to_string(),
        })
    }
}

fn escape_field(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_field(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("unknown escape sequence '\\{other}'")),
            None => return Err("dangling escape at end of field".to_string()),
        }
    }
    Ok(out)
}

/// Append-only writer for the record file.
///
/// The file is opened lazily on the first failure, in append mode, and never
/// truncated. Each record is flushed and synced before `append` returns.
/// One recorder per run; concurrent writers are not supported.
#[derive(Debug)]
pub struct FailureRecorder {
    path: PathBuf,
    file: Option<File>,
    appended: usize,
}

impl FailureRecorder {
    /// Creates a recorder for `path` without touching the file system.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            appended: 0,
        }
    }

    /// Record file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended by this recorder.
    #[must_use]
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Durably appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Io`] if the file cannot be opened, written or
    /// synced. Callers must treat this as fatal: a lost record means a
    /// silently dropped task.
    #[instrument(level = "debug", skip(self, record), fields(path = %self.path.display(), id = %record.remote_identifier))]
    pub async fn append(&mut self, record: &FailureRecord) -> Result<(), RecordError> {
        let path = self.path.clone();
        let file = match &mut self.file {
            Some(file) => file,
            slot @ None => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| RecordError::io(parent, e))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|e| RecordError::io(&path, e))?;
                debug!("opened record file");
                slot.insert(file)
            }
        };

        let mut line = record.to_line();
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| RecordError::io(&path, e))?;
        file.flush().await.map_err(|e| RecordError::io(&path, e))?;
        file.sync_data()
            .await
            .map_err(|e| RecordError::io(&path, e))?;

        self.appended += 1;
        warn!(
            id = %record.remote_identifier,
            target = %record.target_path.display(),
            reason = %record.reason,
            "recorded failed download"
        );
        Ok(())
    }
}

/// Loads every record from `path`, in file order.
///
/// A missing file yields an empty list.
///
/// # Errors
///
/// Returns [`RecordError::Io`] if the file exists but cannot be read, and
/// [`RecordError::Malformed`] for the first line that does not parse.
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn load_all(path: &Path) -> Result<Vec<FailureRecord>, RecordError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("record file absent, nothing to load");
            return Ok(Vec::new());
        }
        Err(e) => return Err(RecordError::io(path, e)),
    };

    let mut records = Vec::new();
    for (index, raw_line) in raw.lines().enumerate() {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let record = FailureRecord::parse_line(line).map_err(|reason| RecordError::Malformed {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        })?;
        records.push(record);
    }

    debug!(count = records.len(), "loaded failure records");
    Ok(records)
}

/// Moves an existing record file aside before it is reused for a new run.
///
/// The file is renamed to `<path>.bak.<YYYYmmddTHHMMSS>`; returns the backup
/// path, or `None` when there was nothing to move.
///
/// # Errors
///
/// Returns [`RecordError::Io`] if the rename fails.
pub async fn rotate_for_resume(path: &Path) -> Result<Option<PathBuf>, RecordError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RecordError::io(path, e)),
    }

    let stamp = Local::now().format("%Y%m%dT%H%M%S");
    let mut backup = PathBuf::from(format!("{}.bak.{stamp}", path.display()));
    let mut suffix = 1;
    while tokio::fs::try_exists(&backup).await.unwrap_or(false) {
        backup = PathBuf::from(format!("{}.bak.{stamp}.{suffix}", path.display()));
        suffix += 1;
    }

    tokio::fs::rename(path, &backup)
        .await
        .map_err(|e| RecordError::io(path, e))?;
    info!(
        from = %path.display(),
        to = %backup.display(),
        "backed up record file before it is rewritten"
    );
    Ok(Some(backup))
}
