//! Cooperative cancellation for backoff sleeps.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable cancellation flag that can wake sleeping threads.
///
/// The transaction manager sleeps on this token between attempts; cancelling
/// it turns the sleep into [`CoreError::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every sleeper.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wakeup.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Fails with [`CoreError::Interrupted`] if the token is cancelled.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            return Err(CoreError::interrupted("DB query interrupted"));
        }
        Ok(())
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// A duration past the clock's range waits until cancelled.
    pub fn sleep(&self, duration: Duration) -> CoreResult<()> {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if self.inner.wakeup.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.wakeup.wait(&mut cancelled),
            }
        }
        if *cancelled {
            return Err(CoreError::interrupted("DB query interrupted"));
        }
        Ok(())
    }
}
