//! Transaction manager and retry loop.
//!
//! [`StdTxManager`] is an immutable configuration plus the outer retry loop.
//! Every `with_*` call returns a new manager; statistics are shared between
//! a manager and the managers derived from it.

use super::name::{TxName, TxNameGenerator};
use super::options::{
    IsolationLevel, LogLevel, RetryOptions, ScanOptions, TimeoutOptions, TxOptions, WriteMode,
};
use super::repository::{Repository, RepositoryTransaction};
use super::tx::Tx;
use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::stats::TxStats;
use std::cell::Cell;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, warn};

/// Default number of attempts per `tx()` call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

static NEXT_LOG_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE_ATTEMPTS: Cell<usize> = const { Cell::new(0) };
}

/// Returns true while a transaction body runs on the current thread.
pub fn in_transaction() -> bool {
    ACTIVE_ATTEMPTS.with(|active| active.get() > 0)
}

struct ActiveAttempt;

impl ActiveAttempt {
    fn enter() -> Self {
        ACTIVE_ATTEMPTS.with(|active| active.set(active.get() + 1));
        Self
    }
}

impl Drop for ActiveAttempt {
    fn drop(&mut self) {
        ACTIVE_ATTEMPTS.with(|active| active.set(active.get().saturating_sub(1)));
    }
}

/// What happens when `tx()` is called while another transaction body runs
/// on the same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeparatePolicy {
    /// Run the new transaction independently.
    Allow,
    /// Run it, but warn.
    #[default]
    Log,
    /// Fail before the first attempt.
    Strict,
}

/// Read-only view of a manager's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxManagerState {
    /// Whether the first-level cache is enabled.
    pub first_level_cache: bool,
    /// Isolation level; `None` for scans.
    pub isolation_level: Option<IsolationLevel>,
    /// Whether transactions are read-only.
    pub read_only: bool,
    /// Whether transactions are scans.
    pub scan: bool,
    /// Whether transactions are always rolled back.
    pub dry_run: bool,
}

impl TxManagerState {
    fn of(options: &TxOptions) -> Self {
        Self {
            first_level_cache: options.first_level_cache(),
            isolation_level: (!options.is_scan()).then(|| options.isolation_level()),
            read_only: options.is_read_only(),
            scan: options.is_scan(),
            dry_run: options.is_dry_run(),
        }
    }
}

/// Entry point for running code in transactions.
///
/// A body passed to [`tx`](Self::tx) may run several times, so it must be
/// idempotent and free of side effects outside the transaction. Use
/// [`Tx::defer`] for effects that must happen only after commit.
pub trait TxManager: Sized {
    /// Store transaction type.
    type Transaction: RepositoryTransaction;

    /// Runs `body` in a transaction, retrying on retryable failures.
    fn tx<'env, T, F>(&self, body: F) -> CoreResult<T>
    where
        F: FnMut(&Tx<'env, Self::Transaction>) -> CoreResult<T>;

    /// Options used for new transactions.
    fn options(&self) -> &TxOptions;

    /// Manager with different transaction options.
    fn with_options(&self, options: TxOptions) -> Self;

    /// Manager with an explicit transaction name.
    fn with_name(&self, name: impl Into<String>) -> Self;

    /// Manager whose log name carries `context`.
    fn with_log_context(&self, context: impl Into<String>) -> Self;

    /// Manager that may start transactions while another one is active.
    fn separate(&self) -> Self;

    /// Manager that fails when started while another transaction is active.
    fn fail_on_unknown_separate_tx(&self) -> Self;

    /// Manager making at most `1 + max_retries` attempts.
    fn with_max_retries(&self, max_retries: u32) -> Self;

    /// Read-only transactions.
    fn read_only(&self) -> ReadOnlyBuilder<Self> {
        ReadOnlyBuilder {
            options: self
                .options()
                .clone()
                .with_isolation_level(IsolationLevel::OnlineConsistentReadOnly),
            manager: self.with_options(self.options().clone()),
        }
    }

    /// Scan transactions.
    fn scan(&self) -> ScanBuilder<Self> {
        ScanBuilder {
            scan: ScanOptions::default(),
            manager: self.with_options(self.options().clone()),
        }
    }

    /// Configuration view.
    fn state(&self) -> TxManagerState {
        TxManagerState::of(self.options())
    }

    /// Manager without first-level cache.
    fn no_first_level_cache(&self) -> Self {
        self.with_options(self.options().clone().with_first_level_cache(false))
    }

    /// Manager buffering writes until commit.
    fn delayed_writes(&self) -> Self {
        self.with_options(self.options().clone().with_write_mode(WriteMode::Delayed))
    }

    /// Manager sending writes immediately.
    fn immediate_writes(&self) -> Self {
        self.with_options(self.options().clone().with_write_mode(WriteMode::Immediate))
    }

    /// Manager that always rolls back.
    fn with_dry_run(&self, dry_run: bool) -> Self {
        self.with_options(self.options().clone().with_dry_run(dry_run))
    }

    /// Manager with a statement timeout.
    fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_options(
            self.options()
                .clone()
                .with_timeout_options(Some(TimeoutOptions::new(timeout))),
        )
    }

    /// Manager with a transaction log level.
    fn with_log_level(&self, level: LogLevel) -> Self {
        self.with_options(self.options().clone().with_log_level(level))
    }

    /// Manager logging every statement.
    fn with_verbose_logging(&self) -> Self {
        self.with_log_level(LogLevel::Debug)
    }

    /// Manager logging summaries only.
    fn with_brief_logging(&self) -> Self {
        self.with_log_level(LogLevel::Info)
    }

    /// Manager without a transaction log.
    fn no_logging(&self) -> Self {
        self.with_log_level(LogLevel::Off)
    }

    /// Manager that does or does not print the log after commit.
    fn with_log_statement_on_success(&self, enabled: bool) -> Self {
        self.with_options(self.options().clone().with_log_statement_on_success(enabled))
    }

    /// Manager with different retry options.
    fn with_retry_options(&self, retry: RetryOptions) -> Self {
        self.with_options(self.options().clone().with_retry_options(retry))
    }
}

/// Builder for read-only transactions.
#[derive(Debug, Clone)]
pub struct ReadOnlyBuilder<M> {
    manager: M,
    options: TxOptions,
}

impl<M: TxManager> ReadOnlyBuilder<M> {
    /// Uses another read-only isolation level.
    pub fn with_statement_isolation_level(mut self, level: IsolationLevel) -> CoreResult<Self> {
        if !level.is_read_only() {
            return Err(CoreError::invalid_argument(format!(
                "isolation level must be read-only, got {level}"
            )));
        }
        self.options = self.options.with_isolation_level(level);
        Ok(self)
    }

    /// Enables or disables the first-level cache.
    #[must_use]
    pub fn with_first_level_cache(mut self, enabled: bool) -> Self {
        self.options = self.options.with_first_level_cache(enabled);
        self
    }

    /// Disables the first-level cache.
    #[must_use]
    pub fn no_first_level_cache(self) -> Self {
        self.with_first_level_cache(false)
    }

    /// Runs `body` in a read-only transaction.
    #[track_caller]
    pub fn run<'env, T, F>(self, body: F) -> CoreResult<T>
    where
        F: FnMut(&Tx<'env, M::Transaction>) -> CoreResult<T>,
    {
        self.manager.with_options(self.options).tx(body)
    }
}

/// Builder for scan transactions.
#[derive(Debug, Clone)]
pub struct ScanBuilder<M> {
    manager: M,
    scan: ScanOptions,
}

impl<M: TxManager> ScanBuilder<M> {
    /// Limits the number of rows a scan may return.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.scan = self.scan.max_size(max_size);
        self
    }

    /// Sets the scan timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.scan = self.scan.timeout(timeout);
        self
    }

    /// Runs `body` in a scan transaction. Scans never use the first-level
    /// cache.
    #[track_caller]
    pub fn run<'env, T, F>(self, body: F) -> CoreResult<T>
    where
        F: FnMut(&Tx<'env, M::Transaction>) -> CoreResult<T>,
    {
        let options = self
            .manager
            .options()
            .clone()
            .with_scan_options(Some(self.scan))
            .with_first_level_cache(false);
        self.manager.with_options(options).tx(body)
    }
}

/// Standard [`TxManager`] over a [`Repository`].
pub struct StdTxManager<R: Repository> {
    repository: Arc<R>,
    options: TxOptions,
    max_attempts: u32,
    name: Option<String>,
    log_context: Option<String>,
    separate_policy: SeparatePolicy,
    name_generator: TxNameGenerator,
    cancellation: CancellationToken,
    stats: Arc<TxStats>,
}

impl<R: Repository> Clone for StdTxManager<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            options: self.options.clone(),
            max_attempts: self.max_attempts,
            name: self.name.clone(),
            log_context: self.log_context.clone(),
            separate_policy: self.separate_policy,
            name_generator: self.name_generator,
            cancellation: self.cancellation.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<R: Repository> fmt::Debug for StdTxManager<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdTxManager")
            .field("options", &self.options)
            .field("max_attempts", &self.max_attempts)
            .field("name", &self.name)
            .field("log_context", &self.log_context)
            .field("separate_policy", &self.separate_policy)
            .finish_non_exhaustive()
    }
}

impl<R: Repository> StdTxManager<R> {
    /// Creates a manager with default options.
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            options: TxOptions::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            name: None,
            log_context: None,
            separate_policy: SeparatePolicy::default(),
            name_generator: TxNameGenerator::default(),
            cancellation: CancellationToken::new(),
            stats: Arc::new(TxStats::new()),
        }
    }

    /// The repository.
    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Statistics shared with derived managers.
    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    /// Maximum attempts per `tx()` call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Policy for nested transactions.
    pub fn separate_policy(&self) -> SeparatePolicy {
        self.separate_policy
    }

    /// Manager generating names with `generator`.
    #[must_use]
    pub fn with_name_generator(&self, generator: TxNameGenerator) -> Self {
        let mut next = self.clone();
        next.name_generator = generator;
        next
    }

    /// Manager whose backoff sleeps are interrupted by `token`.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        let mut next = self.clone();
        next.cancellation = token;
        next
    }

    /// Manager with a different nested transaction policy.
    #[must_use]
    pub fn with_separate_policy(&self, policy: SeparatePolicy) -> Self {
        let mut next = self.clone();
        next.separate_policy = policy;
        next
    }

    fn check_separate_policy(&self, name: &TxName) -> CoreResult<()> {
        if !in_transaction() {
            return Ok(());
        }
        match self.separate_policy {
            SeparatePolicy::Allow => Ok(()),
            SeparatePolicy::Log => {
                warn!(
                    "Transaction '{}' was run when another transaction is active. \
                     Perhaps unexpected behavior. Use TxManager::separate() to avoid this message",
                    name.log_name()
                );
                Ok(())
            }
            SeparatePolicy::Strict => Err(CoreError::NestedTransaction {
                name: name.log_name().to_owned(),
            }),
        }
    }

    fn run_with_retries<'env, T, F>(&self, name: &TxName, body: &mut F) -> CoreResult<T>
    where
        F: FnMut(&Tx<'env, R::Transaction>) -> CoreResult<T>,
    {
        let isolation = self.options.isolation_level();
        let tx_id = format_tx_id(NEXT_LOG_ID.fetch_add(1, Ordering::Relaxed), isolation);
        let span = debug_span!("tx", id = %tx_id, name = %name);
        let _entered = span.enter();

        let started = Instant::now();
        let mut last_tx: Option<Tx<'env, R::Transaction>> = None;
        let result = self.attempt_loop(name, body, &mut last_tx);
        if let Some(tx) = last_tx {
            tx.run_finally();
        }
        self.stats.record_total(started.elapsed());
        result
    }

    fn attempt_loop<'env, T, F>(
        &self,
        name: &TxName,
        body: &mut F,
        last_tx: &mut Option<Tx<'env, R::Transaction>>,
    ) -> CoreResult<T>
    where
        F: FnMut(&Tx<'env, R::Transaction>) -> CoreResult<T>,
    {
        let isolation = self.options.isolation_level();
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            let attempt_started = Instant::now();
            let (outcome, commit_attempted) = self.run_attempt(name, body, last_tx);
            self.stats.record_attempt(attempt_started.elapsed());

            let error = match outcome {
                Ok(value) => {
                    let outcome = if self.options.is_dry_run() {
                        self.stats.record_dry_run();
                        "dry_run"
                    } else {
                        self.stats.record_commit();
                        "commit"
                    };
                    debug!(attempt, %isolation, outcome, "transaction attempt finished");
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                self.stats.record_rollback();
                debug!(attempt, %isolation, outcome = "rollback", "transaction attempt finished: {error}");
                return Err(error);
            }

            if error.kind() == ErrorKind::ConditionallyRetryable
                && !self.options.can_conditionally_retry(commit_attempted)
            {
                self.stats.record_rollback();
                debug!(attempt, %isolation, outcome = "rollback", "conditional retry not allowed: {error}");
                return Err(error.fail_immediately());
            }

            self.stats.record_retry(error.retry_reason());
            debug!(
                attempt,
                %isolation,
                outcome = "retry",
                reason = error.retry_reason(),
                "transaction attempt finished: {error}"
            );
            if attempt < self.max_attempts {
                let delay = error.retry_policy().map_or(Duration::ZERO, |p| p.calc_duration(attempt));
                if let Err(interrupted) = self.cancellation.sleep(delay) {
                    self.stats.record_fail();
                    warn!(attempt, "transaction retries interrupted: {error}");
                    return Err(interrupted);
                }
            }
            last_error = Some(error);
        }

        self.stats.record_fail();
        match last_error {
            Some(error) => {
                warn!(attempts = self.max_attempts, "transaction retries failed: {error}");
                Err(error.rethrow())
            }
            None => Err(CoreError::invalid_operation("no transaction attempts were made")),
        }
    }

    /// Runs one attempt; the flag tells whether this attempt reached commit.
    fn run_attempt<'env, T, F>(
        &self,
        name: &TxName,
        body: &mut F,
        last_tx: &mut Option<Tx<'env, R::Transaction>>,
    ) -> (CoreResult<T>, bool)
    where
        F: FnMut(&Tx<'env, R::Transaction>) -> CoreResult<T>,
    {
        let transaction = match self.repository.start_transaction(&self.options) {
            Ok(transaction) => transaction,
            Err(error) => return (Err(error), false),
        };
        let tx = last_tx.insert(Tx::new(name.clone(), transaction));
        let _active = ActiveAttempt::enter();
        let outcome = tx.run(body);
        (outcome, tx.was_commit_attempted())
    }
}

impl<R: Repository> TxManager for StdTxManager<R> {
    type Transaction = R::Transaction;

    #[track_caller]
    fn tx<'env, T, F>(&self, mut body: F) -> CoreResult<T>
    where
        F: FnMut(&Tx<'env, Self::Transaction>) -> CoreResult<T>,
    {
        let name = match &self.name {
            Some(name) => TxName::new(name.clone()),
            None => self.name_generator.generate(Location::caller()),
        };
        let name = name.with_context(self.log_context.as_deref());
        self.check_separate_policy(&name)?;
        self.run_with_retries(&name, &mut body)
    }

    fn options(&self) -> &TxOptions {
        &self.options
    }

    fn with_options(&self, options: TxOptions) -> Self {
        let mut next = self.clone();
        next.options = options;
        next
    }

    fn with_name(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.name = Some(name.into());
        next
    }

    fn with_log_context(&self, context: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.log_context = Some(context.into());
        next
    }

    fn separate(&self) -> Self {
        self.with_separate_policy(SeparatePolicy::Allow)
    }

    fn fail_on_unknown_separate_tx(&self) -> Self {
        self.with_separate_policy(SeparatePolicy::Strict)
    }

    fn with_max_retries(&self, max_retries: u32) -> Self {
        let mut next = self.clone();
        next.max_attempts = max_retries.saturating_add(1);
        next
    }
}

/// Formats a log id in base 36, left-padded to 6 digits, followed by the
/// isolation level suffix.
pub fn format_tx_id(id: u64, isolation: IsolationLevel) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = Vec::new();
    let mut rest = id;
    loop {
        digits.push(DIGITS[(rest % 36) as usize]);
        rest /= 36;
        if rest == 0 {
            break;
        }
    }
    while digits.len() < 6 {
        digits.push(b'0');
    }
    digits.reverse();
    let mut formatted = String::from_utf8_lossy(&digits).into_owned();
    formatted.push_str(isolation.tx_id_suffix());
    formatted
}
