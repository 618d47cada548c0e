//! Cooperative cancellation for workflow instances.
//!
//! A [`CancellationTokenSource`] is owned by whoever may cancel a workflow
//! (the engine); cloned [`CancellationToken`]s are handed to the coordinator
//! and to every stage through its context.
//!
//! # Example
//!
//! ```ignore
//! use riskgate_core::CancellationTokenSource;
//!
//! let source = CancellationTokenSource::new();
//! let token = source.token();
//!
//! tokio::spawn(async move {
//!     tokio::select! {
//!         _ = token.cancelled() => { /* stop */ }
//!         _ = do_work() => {}
//!     }
//! });
//!
//! source.cancel();
//! ```

use tokio_util::sync::CancellationToken as SharedToken;

/// Cancellation token handed to the coordinator and to stages.
///
/// Cloning a token creates a new reference to the same cancellation state.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: SharedToken,
}

impl CancellationToken {
    /// A token that is never cancelled, for stand-alone stage invocations.
    pub fn never() -> Self {
        Self::default()
    }

    /// Returns true if the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Completes once the token is cancelled.
    ///
    /// Safe to use as a `tokio::select!` branch; returns immediately if the
    /// token is already cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Creates a source whose token is also cancelled when this one is.
    ///
    /// Cancelling the child leaves this token untouched.
    pub fn child_source(&self) -> CancellationTokenSource {
        CancellationTokenSource {
            token: CancellationToken {
                inner: self.inner.child_token(),
            },
        }
    }
}

/// Owner of a cancellation token.
///
/// Cloning a source creates a new handle to the same underlying token.
#[derive(Clone, Debug, Default)]
pub struct CancellationTokenSource {
    token: CancellationToken,
}

impl CancellationTokenSource {
    /// Creates a new cancellation source with a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token sharing this source's state.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the token and wakes every waiter. Idempotent.
    pub fn cancel(&self) {
        self.token.inner.cancel();
    }

    /// Returns true if cancel() has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
