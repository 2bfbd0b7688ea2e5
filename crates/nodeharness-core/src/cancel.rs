//! Cancellation token for bounding node start-up.
//!
//! A `CancellationToken` can be shared across tasks for cooperative
//! cancellation. It fires either when `cancel()` is called on any clone or
//! when its optional deadline passes, and can be awaited without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A cancellation token with an optional deadline.
///
/// This token can be cloned and shared across tasks. When `cancel()` is called
/// on any clone, all clones will observe the cancellation.
///
/// # Example
///
/// ```
/// use nodeharness::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let token_clone = token.clone();
///
/// token_clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Create a new cancellation token without a deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that fires `timeout` from now.
    ///
    /// The deadline is measured on the tokio clock, so a paused test runtime
    /// controls it.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Create a token that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Inner::default()
            }),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancellation has been requested or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// The deadline of this token, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Check cancellation and return the reason if the token has fired.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Err(CancelledError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CancelledError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Wait until the token fires and return why it fired.
    pub async fn cancelled(&self) -> CancelledError {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the flag so a concurrent
            // cancel() between the check and the await is not lost.
            notified.as_mut().enable();

            if let Err(reason) = self.check() {
                return reason;
            }

            match self.inner.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelledError {
    /// `cancel()` was called.
    Cancelled,
    /// The token's deadline passed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelledError::Cancelled => write!(f, "operation was cancelled"),
            CancelledError::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl std::error::Error for CancelledError {}
