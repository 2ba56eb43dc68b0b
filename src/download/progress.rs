//! Periodic progress reporting for streamed downloads.

use tracing::info;

/// One emitted progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    /// Cumulative bytes written when the report fired.
    pub bytes_so_far: u64,
    /// Expected total, when known.
    pub total_expected: Option<u64>,
}

/// Emits a progress report every `log_block_size` bytes of a download.
///
/// State is reset per download via [`ProgressLogger::reset`]; the streaming
/// loop is the only caller of [`ProgressLogger::record`].
#[derive(Debug, Clone)]
pub struct ProgressLogger {
    interval: u64,
    next_threshold: u64,
    bytes_so_far: u64,
    reports: u32,
    label: String,
}

impl ProgressLogger {
    /// Creates a logger firing every `log_block_size` bytes (minimum 1).
    #[must_use]
    pub fn new(log_block_size: u64) -> Self {
        let interval = log_block_size.max(1);
        Self {
            interval,
            next_threshold: interval,
            bytes_so_far: 0,
            reports: 0,
            label: String::new(),
        }
    }

    /// Starts tracking a new download named `label`.
    pub fn reset(&mut self, label: impl Into<String>) {
        self.next_threshold = self.interval;
        self.bytes_so_far = 0;
        self.reports = 0;
        self.label = label.into();
    }

    /// Records the cumulative byte count after a chunk was written.
    ///
    /// Returns the report when a threshold was crossed. Several thresholds
    /// crossed by a single large chunk produce one report.
    pub fn record(&mut self, bytes_so_far: u64, total_expected: Option<u64>) -> Option<ProgressReport> {
        self.bytes_so_far = bytes_so_far;
        if bytes_so_far < self.next_threshold {
            return None;
        }

        self.next_threshold = (bytes_so_far / self.interval + 1) * self.interval;
        self.reports += 1;

        match total_expected {
            Some(total) if total > 0 => {
                let percent = bytes_so_far.saturating_mul(100) / total;
                info!(
                    file = %self.label,
                    downloaded = %pretty_bytes(bytes_so_far),
                    total = %pretty_bytes(total),
                    percent,
                    "download progress"
                );
            }
            _ => {
                info!(
                    file = %self.label,
                    downloaded = %pretty_bytes(bytes_so_far),
                    "download progress"
                );
            }
        }

        Some(ProgressReport {
            bytes_so_far,
            total_expected,
        })
    }

    /// Bytes seen in the current download.
    #[must_use]
    pub fn bytes_so_far(&self) -> u64 {
        self.bytes_so_far
    }

    /// Number of reports emitted for the current download.
    #[must_use]
    pub fn reports(&self) -> u32 {
        self.reports
    }

    /// Configured reporting interval in bytes.
    #[must_use]
    pub fn interval(&self) -> u64 {
        self.interval
    }
}

/// Formats a byte count with binary units, e.g. `12.50 MB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn pretty_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b > KIB * KIB * KIB {
        format!("{:.2} GB", b / (KIB * KIB * KIB))
    } else if b > KIB * KIB {
        format!("{:.2} MB", b / (KIB * KIB))
    } else if b > KIB {
        format!("{:.2} KB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}
