//! Error types for repotx core.
//!
//! Every error belongs to one [`ErrorKind`]. The transaction manager decides
//! whether to retry by matching on the kind, never on individual variants.

use crate::retry::RetryPolicy;
use std::error::Error as StdError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed error raised by user code inside a transaction body.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Classification used by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient failure; the whole transaction may be retried.
    Retryable,
    /// Outcome is unknown; retried only when the retry mode allows it.
    ConditionallyRetryable,
    /// Concurrent modification detected; retryable, and outranks a business
    /// error raised in the same attempt.
    OptimisticLock,
    /// Cancellation signal; never retried.
    Interrupted,
    /// Everything else; never retried.
    Fatal,
}

impl ErrorKind {
    /// Returns true for the kinds the retry loop may retry.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Retryable | Self::ConditionallyRetryable | Self::OptimisticLock
        )
    }
}

/// Errors that can occur in repotx operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Data read or written by the transaction was modified concurrently.
    #[error("optimistic lock failed: {message}")]
    OptimisticLock {
        /// Description of the conflict.
        message: String,
    },

    /// Transient store failure (overload, busy session, lost transport).
    #[error("retryable failure [{reason}]: {message}")]
    Retryable {
        /// Short failure name used in retry statistics.
        reason: String,
        /// Description of the failure.
        message: String,
        /// Backoff to apply before the next attempt.
        policy: RetryPolicy,
    },

    /// Failure with an indeterminate outcome, e.g. a timeout during commit.
    #[error("conditionally retryable failure [{reason}]: {message}")]
    ConditionallyRetryable {
        /// Short failure name used in retry statistics.
        reason: String,
        /// Description of the failure.
        message: String,
        /// Backoff to apply before the next attempt.
        policy: RetryPolicy,
    },

    /// The store stayed unavailable; raised once retrying stops.
    #[error("{message}: {source}")]
    Unavailable {
        /// Description of what was given up.
        message: String,
        /// Whether retries were attempted before giving up.
        already_retried: bool,
        /// The last retryable failure.
        #[source]
        source: Box<CoreError>,
    },

    /// The calling thread was asked to stop.
    #[error("interrupted: {message}")]
    Interrupted {
        /// Description of the interrupted operation.
        message: String,
    },

    /// Insert of an entity whose id is already taken.
    #[error("entity already exists: {id}")]
    EntityAlreadyExists {
        /// Debug rendering of the id.
        id: String,
    },

    /// Range bounds cannot be expressed as one contiguous id interval.
    #[error("invalid range: {message}")]
    InvalidRange {
        /// Description of the problem.
        message: String,
    },

    /// Identifier type cannot be used as an entity id.
    #[error("invalid id schema for {type_name}: {message}")]
    InvalidSchema {
        /// Name of the identifier type.
        type_name: String,
        /// Description of the problem.
        message: String,
    },

    /// Argument rejected by an operation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of why the argument is invalid.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A transaction was started while another one is active on this thread.
    #[error("transaction {name} was run when another transaction is active")]
    NestedTransaction {
        /// Name of the offending transaction.
        name: String,
    },

    /// Error raised by the transaction body.
    #[error(transparent)]
    Business(BoxError),
}

impl CoreError {
    /// Creates an optimistic lock error.
    pub fn optimistic_lock(message: impl Into<String>) -> Self {
        Self::OptimisticLock {
            message: message.into(),
        }
    }

    /// Creates a retryable error with the given backoff.
    pub fn retryable(reason: impl Into<String>, message: impl Into<String>, policy: RetryPolicy) -> Self {
        Self::Retryable {
            reason: reason.into(),
            message: message.into(),
            policy,
        }
    }

    /// Creates a conditionally retryable error with the given backoff.
    pub fn conditionally_retryable(
        reason: impl Into<String>,
        message: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self::ConditionallyRetryable {
            reason: reason.into(),
            message: message.into(),
            policy,
        }
    }

    /// Creates an interrupted error.
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::Interrupted {
            message: message.into(),
        }
    }

    /// Creates an entity-already-exists error.
    pub fn entity_already_exists(id: impl std::fmt::Debug) -> Self {
        Self::EntityAlreadyExists {
            id: format!("{id:?}"),
        }
    }

    /// Creates an invalid range error.
    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRange {
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps an error raised by user code.
    pub fn business(error: impl Into<BoxError>) -> Self {
        Self::Business(error.into())
    }

    /// Returns the retry classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OptimisticLock { .. } => ErrorKind::OptimisticLock,
            Self::Retryable { .. } => ErrorKind::Retryable,
            Self::ConditionallyRetryable { .. } => ErrorKind::ConditionallyRetryable,
            Self::Interrupted { .. } => ErrorKind::Interrupted,
            _ => ErrorKind::Fatal,
        }
    }

    /// Returns true if the retry loop may run another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Backoff policy of a retryable error.
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        match self {
            Self::OptimisticLock { .. } => Some(RetryPolicy::retry_immediately()),
            Self::Retryable { policy, .. } | Self::ConditionallyRetryable { policy, .. } => {
                Some(*policy)
            }
            _ => None,
        }
    }

    /// Failure name used to break retry statistics down by cause.
    pub fn retry_reason(&self) -> &str {
        match self {
            Self::OptimisticLock { .. } => "OptimisticLock",
            Self::Retryable { reason, .. } | Self::ConditionallyRetryable { reason, .. } => reason,
            Self::Interrupted { .. } => "Interrupted",
            _ => "Fatal",
        }
    }

    /// Converts the last retryable error into the fatal error reported once
    /// the attempt budget is exhausted.
    pub fn rethrow(self) -> Self {
        let message = match self.kind() {
            ErrorKind::ConditionallyRetryable => "Conditional retries failed",
            ErrorKind::Retryable | ErrorKind::OptimisticLock => "Retries failed",
            _ => return self,
        };
        Self::Unavailable {
            message: message.into(),
            already_retried: true,
            source: Box::new(self),
        }
    }

    /// Converts a conditionally retryable error that must not be retried.
    pub fn fail_immediately(self) -> Self {
        Self::Unavailable {
            message: "Conditional retries not attempted".into(),
            already_retried: false,
            source: Box::new(self),
        }
    }

    /// Returns the business error if this is one.
    pub fn as_business(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Business(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("insufficient funds")]
    struct InsufficientFunds;

    #[test]
    fn kinds() {
        assert_eq!(CoreError::optimistic_lock("x").kind(), ErrorKind::OptimisticLock);
        assert_eq!(
            CoreError::retryable("Overloaded", "busy", RetryPolicy::default()).kind(),
            ErrorKind::Retryable
        );
        assert_eq!(
            CoreError::conditionally_retryable("Timeout", "t", RetryPolicy::default()).kind(),
            ErrorKind::ConditionallyRetryable
        );
        assert_eq!(CoreError::interrupted("x").kind(), ErrorKind::Interrupted);
        assert_eq!(CoreError::business(InsufficientFunds).kind(), ErrorKind::Fatal);
        assert!(!CoreError::invalid_range("x").is_retryable());
        assert!(!ErrorKind::Interrupted.is_retryable());
    }

    #[test]
    fn optimistic_lock_retries_immediately() {
        let policy = CoreError::optimistic_lock("row").retry_policy().unwrap();
        assert_eq!(policy.calc_duration(3), Duration::ZERO);
        assert!(CoreError::business(InsufficientFunds).retry_policy().is_none());
    }

    #[test]
    fn rethrow_wraps_retryable() {
        let err = CoreError::retryable("Overloaded", "busy", RetryPolicy::retry_immediately()).rethrow();
        match &err {
            CoreError::Unavailable {
                message,
                already_retried,
                source,
            } => {
                assert_eq!(message, "Retries failed");
                assert!(*already_retried);
                assert_eq!(source.retry_reason(), "Overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(err.to_string().starts_with("Retries failed"));
    }

    #[test]
    fn conditional_rethrow_messages() {
        let make = || CoreError::conditionally_retryable("Timeout", "t", RetryPolicy::default());
        assert!(matches!(
            make().rethrow(),
            CoreError::Unavailable { ref message, already_retried: true, .. } if message == "Conditional retries failed"
        ));
        assert!(matches!(
            make().fail_immediately(),
            CoreError::Unavailable { ref message, already_retried: false, .. } if message == "Conditional retries not attempted"
        ));
    }

    #[test]
    fn rethrow_keeps_fatal_errors() {
        let err = CoreError::invalid_operation("closed").rethrow();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn business_error_is_transparent() {
        let err = CoreError::business(InsufficientFunds);
        assert_eq!(err.to_string(), "insufficient funds");
        assert!(err.as_business().unwrap().is::<InsufficientFunds>());
    }
}
