//! Cancellation token shared by a workflow instance and its attached children.
//!
//! A token is a checkpoint flag: it never interrupts work that is already
//! running, it only gates the *next* effect operation issued through an
//! [`Environment`](crate::Environment) bound to it.

use crate::error::SagaError;

/// Shared, settable-once cancel flag.
///
/// Clones share the same flag. Cancelling is idempotent and there is no reset.
///
/// # Example
///
/// ```ignore
/// let token = CancellationToken::new();
/// let attached = token.clone();
///
/// token.cancel();
/// token.cancel(); // no-op
///
/// assert!(attached.is_canceled());
/// assert!(attached.checkpoint().is_err());
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create a fresh token that is not canceled.
    pub fn new() -> Self {
        Self {
            inner: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Set the flag. Calling this on an already-canceled token does nothing.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on this token or a clone.
    pub fn is_canceled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Fail with [`SagaError::Cancelled`] if the flag is set.
    pub fn checkpoint(&self) -> Result<(), SagaError> {
        if self.is_canceled() {
            Err(SagaError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the token is canceled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_token_is_not_canceled() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_canceled());
        assert!(matches!(token.checkpoint(), Err(SagaError::Cancelled)));
    }

    #[test]
    fn test_clones_share_the_flag() {
        let token = CancellationToken::new();
        let attached = token.clone();

        attached.cancel();

        assert!(token.is_canceled());
    }

    #[test]
    fn test_fresh_tokens_are_independent() {
        let parent = CancellationToken::new();
        let child = CancellationToken::new();

        parent.cancel();

        assert!(!child.is_canceled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() did not resolve")
            .unwrap();
    }

    #[test]
    fn test_debug_shows_flag() {
        let token = CancellationToken::new();
        assert!(format!("{:?}", token).contains("canceled: false"));
    }
}
