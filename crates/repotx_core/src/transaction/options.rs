//! Transaction configuration.
//!
//! [`TxOptions`] is an immutable value. Every `with_*` method consumes the
//! options and returns a modified copy.

use std::fmt;
use std::time::Duration;

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Serializable read-write transaction.
    #[default]
    SerializableReadWrite,
    /// Read-only, reads the latest committed state consistently.
    OnlineConsistentReadOnly,
    /// Read-only, each read may see a different committed state.
    OnlineInconsistentReadOnly,
    /// Read-only, consistent but possibly slightly stale.
    StaleConsistentReadOnly,
    /// Read-only snapshot of the state at transaction start.
    Snapshot,
}

impl IsolationLevel {
    /// Returns true only for [`IsolationLevel::SerializableReadWrite`].
    pub const fn is_read_write(self) -> bool {
        matches!(self, Self::SerializableReadWrite)
    }

    /// Returns true for every read-only level.
    pub const fn is_read_only(self) -> bool {
        !self.is_read_write()
    }

    /// Suffix appended to transaction ids in logs.
    pub const fn tx_id_suffix(self) -> &'static str {
        match self {
            Self::SerializableReadWrite => "",
            Self::OnlineConsistentReadOnly => "OC",
            Self::OnlineInconsistentReadOnly => "OI",
            Self::StaleConsistentReadOnly => "SC",
            Self::Snapshot => "SP",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SerializableReadWrite => "SERIALIZABLE_READ_WRITE",
            Self::OnlineConsistentReadOnly => "ONLINE_CONSISTENT_READ_ONLY",
            Self::OnlineInconsistentReadOnly => "ONLINE_INCONSISTENT_READ_ONLY",
            Self::StaleConsistentReadOnly => "STALE_CONSISTENT_READ_ONLY",
            Self::Snapshot => "SNAPSHOT",
        };
        f.write_str(name)
    }
}

/// Verbosity of the per-attempt transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogLevel {
    /// Statements and summaries.
    #[default]
    Debug,
    /// Summaries only.
    Info,
    /// Nothing.
    Off,
}

impl LogLevel {
    /// Returns true if a message logged at `message_level` is kept.
    pub const fn accepts(self, message_level: LogLevel) -> bool {
        match self {
            Self::Debug => !matches!(message_level, Self::Off),
            Self::Info => matches!(message_level, Self::Info),
            Self::Off => false,
        }
    }
}

/// When writes reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteMode {
    /// Writes are buffered and sent on commit.
    #[default]
    Delayed,
    /// Writes are sent as soon as they are issued.
    Immediate,
}

/// Whether conditionally retryable failures may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConditionalRetryMode {
    /// Never retry.
    Never,
    /// Retry unless a commit of a mutable transaction was attempted.
    #[default]
    UntilCommit,
    /// Always retry.
    Always,
}

/// Retry options of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RetryOptions {
    /// Handling of conditionally retryable failures.
    pub conditional_retry_mode: ConditionalRetryMode,
}

impl RetryOptions {
    /// Creates retry options with the given conditional retry mode.
    #[must_use]
    pub const fn new(conditional_retry_mode: ConditionalRetryMode) -> Self {
        Self {
            conditional_retry_mode,
        }
    }
}

/// Options of a scan transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanOptions {
    /// Maximum number of rows a scan may return.
    pub max_size: u64,
    /// Scan timeout.
    pub timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl ScanOptions {
    /// Sets the maximum number of rows.
    #[must_use]
    pub const fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the scan timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Statement timeout of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutOptions {
    /// Transport timeout.
    pub timeout: Duration,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}

impl TimeoutOptions {
    const MIN_CANCEL_AFTER_DIFF: Duration = Duration::from_millis(50);
    const MAX_CANCEL_AFTER_DIFF: Duration = Duration::from_millis(100);
    const CANCEL_AFTER_DIFF_RATIO: f64 = 0.02;

    /// Creates timeout options.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Server-side cancellation delay: 2% less than the transport timeout,
    /// but never less than 50ms nor more than 100ms less.
    ///
    /// Timeouts too short to subtract from are returned unchanged.
    pub fn cancel_after(&self) -> Duration {
        let timeout_nanos = self.timeout.as_nanos() as f64;
        let diff = Duration::from_nanos((timeout_nanos * Self::CANCEL_AFTER_DIFF_RATIO).round() as u64)
            .clamp(Self::MIN_CANCEL_AFTER_DIFF, Self::MAX_CANCEL_AFTER_DIFF);
        self.timeout.checked_sub(diff).unwrap_or(self.timeout)
    }
}

/// Immutable transaction options.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOptions {
    isolation_level: IsolationLevel,
    first_level_cache: bool,
    log_level: LogLevel,
    log_statement_on_success: bool,
    scan: Option<ScanOptions>,
    timeout: Option<TimeoutOptions>,
    retry: RetryOptions,
    dry_run: bool,
    write_mode: WriteMode,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self::create(IsolationLevel::SerializableReadWrite)
    }
}

impl TxOptions {
    /// Creates options with defaults for the given isolation level.
    pub fn create(isolation_level: IsolationLevel) -> Self {
        Self {
            isolation_level,
            first_level_cache: true,
            log_level: LogLevel::Debug,
            log_statement_on_success: true,
            scan: None,
            timeout: None,
            retry: RetryOptions::default(),
            dry_run: false,
            write_mode: WriteMode::Delayed,
        }
    }

    /// Isolation level.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Whether the first-level cache is enabled.
    pub fn first_level_cache(&self) -> bool {
        self.first_level_cache
    }

    /// Transaction log level.
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Whether the transaction log is printed after a successful commit.
    pub fn log_statement_on_success(&self) -> bool {
        self.log_statement_on_success
    }

    /// Scan options, present only for scan transactions.
    pub fn scan_options(&self) -> Option<ScanOptions> {
        self.scan
    }

    /// Explicit timeout, if any.
    pub fn timeout_options(&self) -> Option<TimeoutOptions> {
        self.timeout
    }

    /// Retry options.
    pub fn retry_options(&self) -> RetryOptions {
        self.retry
    }

    /// Whether the transaction is always rolled back.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Write mode.
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Whether writes are sent immediately.
    pub fn is_immediate_writes(&self) -> bool {
        self.write_mode == WriteMode::Immediate
    }

    /// Whether this is a scan transaction.
    pub fn is_scan(&self) -> bool {
        self.scan.is_some()
    }

    /// Whether the isolation level is read-write.
    pub fn is_read_write(&self) -> bool {
        self.isolation_level.is_read_write()
    }

    /// Whether the isolation level is read-only.
    pub fn is_read_only(&self) -> bool {
        !self.is_read_write()
    }

    /// Whether the transaction may write.
    pub fn is_mutable(&self) -> bool {
        self.is_read_write() && !self.is_scan()
    }

    /// Decides whether a conditionally retryable failure may be retried.
    pub fn can_conditionally_retry(&self, commit_attempted: bool) -> bool {
        match self.retry.conditional_retry_mode {
            ConditionalRetryMode::Always => true,
            ConditionalRetryMode::Never => false,
            ConditionalRetryMode::UntilCommit => {
                !commit_attempted || self.is_read_only() || self.is_scan()
            }
        }
    }

    /// Picks the shorter of the configured timeout and an external deadline.
    pub fn min_timeout_options(&self, external: Option<Duration>) -> TimeoutOptions {
        match (self.timeout, external) {
            (None, None) => TimeoutOptions::default(),
            (None, Some(external)) => TimeoutOptions::new(external),
            (Some(own), None) => own,
            (Some(own), Some(external)) if own.timeout < external => own,
            (Some(_), Some(external)) => TimeoutOptions::new(external),
        }
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn with_isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = isolation_level;
        self
    }

    /// Enables or disables the first-level cache.
    #[must_use]
    pub fn with_first_level_cache(mut self, enabled: bool) -> Self {
        self.first_level_cache = enabled;
        self
    }

    /// Sets the transaction log level.
    #[must_use]
    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// Sets whether the log is printed after a successful commit.
    #[must_use]
    pub fn with_log_statement_on_success(mut self, enabled: bool) -> Self {
        self.log_statement_on_success = enabled;
        self
    }

    /// Turns the options into scan options.
    #[must_use]
    pub fn with_scan_options(mut self, scan: Option<ScanOptions>) -> Self {
        self.scan = scan;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_options(mut self, timeout: Option<TimeoutOptions>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry options.
    #[must_use]
    pub fn with_retry_options(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables dry-run.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the write mode.
    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }
}
