//! Retry decisions for download attempts.
//!
//! [`RetryPolicy::next_action`] is a pure function of an attempt's outcome
//! and the attempt count. It decides whether the orchestrator should verify,
//! commit, retry (and after what delay) or record the task as failed.
//!
//! # Rules
//!
//! - [`AttemptOutcome::Success`] is never terminal: the file must be verified.
//! - [`AttemptOutcome::Verified`] commits.
//! - Network, HTTP, truncation and local IO failures retry while
//!   `attempts_made < max_attempts`, then record.
//! - [`AttemptOutcome::ChecksumMismatch`] records immediately under
//!   [`BadChecksumPolicy::Record`]; under [`BadChecksumPolicy::Retry`] it is
//!   treated like any other failure.
//!
//! # Example
//!
//! ```
//! use hubfetch_core::download::{AttemptOutcome, BadChecksumPolicy, NextAction, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, BadChecksumPolicy::Record);
//! let outcome = AttemptOutcome::HttpError { status: 503, retry_after: None };
//!
//! match policy.next_action(&outcome, 1) {
//!     NextAction::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     other => println!("{:?}", other),
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::constants::MAX_RETRY_AFTER;
use super::outcome::AttemptOutcome;

/// Default number of attempts per task.
pub const DEFAULT_NUM_TRIES: u32 = 5;

/// Default base delay for exponential backoff (5 seconds).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default maximum delay cap (2 minutes).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// What to do when a downloaded file fails checksum verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BadChecksumPolicy {
    /// Record the task as failed without another attempt.
    #[default]
    Record,
    /// Count the mismatch against `num_tries` and download again.
    Retry,
}

impl BadChecksumPolicy {
    /// Returns the stable config label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for BadChecksumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BadChecksumPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "retry" => Ok(Self::Retry),
            other => Err(format!(
                "invalid on_bad_checksum value '{other}' (expected record or retry)"
            )),
        }
    }
}

/// Next step for a task after an attempt outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Check the downloaded temp file against the expected checksum.
    Verify,

    /// Move the verified temp file into place.
    Commit,

    /// Download again after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Give up and hand the task to the failure recorder.
    RecordFailure {
        /// Human-readable reason stored in the record file.
        reason: String,
    },
}

/// Retry configuration: attempt limit, bad-checksum handling and backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// A `Retry-After` header on an HTTP error replaces the computed delay.
/// With a zero base delay no jitter is added, so retries are immediate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Handling of checksum mismatches.
    bad_checksum: BadChecksumPolicy,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_NUM_TRIES,
            bad_checksum: BadChecksumPolicy::default(),
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `num_tries` attempts and default backoff.
    #[must_use]
    pub fn new(num_tries: u32, bad_checksum: BadChecksumPolicy) -> Self {
        Self {
            max_attempts: num_tries.max(1),
            bad_checksum,
            ..Self::default()
        }
    }

    /// Replaces the base backoff delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Replaces the backoff cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Policy with no waiting between attempts.
    #[must_use]
    pub fn immediate(num_tries: u32, bad_checksum: BadChecksumPolicy) -> Self {
        Self::new(num_tries, bad_checksum).with_base_delay(Duration::ZERO)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured bad-checksum handling.
    #[must_use]
    pub fn bad_checksum(&self) -> BadChecksumPolicy {
        self.bad_checksum
    }

    /// Decides the next step after `outcome` on attempt `attempts_made` (1-indexed).
    #[instrument(level = "debug", skip(self, outcome), fields(max_attempts = self.max_attempts))]
    pub fn next_action(&self, outcome: &AttemptOutcome, attempts_made: u32) -> NextAction {
        match outcome {
            AttemptOutcome::Success { .. } => NextAction::Verify,
            AttemptOutcome::Verified { .. } => NextAction::Commit,
            AttemptOutcome::ChecksumMismatch { .. }
                if self.bad_checksum == BadChecksumPolicy::Record =>
            {
                NextAction::RecordFailure {
                    reason: outcome.to_string(),
                }
            }
            AttemptOutcome::HttpError {
                retry_after: Some(server_delay),
                ..
            } => self.retry_or_record(outcome, attempts_made, Some(*server_delay)),
            _ => self.retry_or_record(outcome, attempts_made, None),
        }
    }

    fn retry_or_record(
        &self,
        outcome: &AttemptOutcome,
        attempts_made: u32,
        server_delay: Option<Duration>,
    ) -> NextAction {
        if attempts_made >= self.max_attempts {
            debug!(attempts_made, max = self.max_attempts, "max attempts reached");
            return NextAction::RecordFailure {
                reason: format!("{outcome} (after {attempts_made} attempts)"),
            };
        }

        let delay = server_delay
            .map_or_else(|| self.calculate_delay(attempts_made), |d| d.min(MAX_RETRY_AFTER));

        debug!(
            attempts_made,
            next_attempt = attempts_made + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        NextAction::Retry {
            delay,
            attempt: attempts_made + 1,
        }
    }

    /// Calculates the delay for a retry attempt with exponential backoff and jitter.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 = 2^0 = 1x base
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + calculate_jitter()
    }
}

/// Generates random jitter between 0 and `MAX_JITTER`.
#[allow(clippy::cast_possible_truncation)]
fn calculate_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Values beyond one hour are capped; negative values and dates in the past
/// yield `None`.
///
/// ```
/// use std::time::Duration;
/// use hubfetch_core::download::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        return Some(cap_retry_after(Duration::from_secs(seconds)));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(SystemTime::now()) {
        Ok(duration) => Some(cap_retry_after(duration)),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, ignoring");
            None
        }
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        MAX_RETRY_AFTER
    } else {
        duration
    }
}
