//! Handle to a spawned, independently cancellable workflow.

use tokio::sync::oneshot;

use crate::cancel::CancellationToken;
use crate::error::SagaError;

/// A spawned workflow: its eventual result and a way to cancel it.
///
/// Cancelling a task sets the child's own token; the parent is unaffected,
/// and cancelling the parent never cancels the task.
///
/// # Example
///
/// ```ignore
/// let task = env.spawn(poll_inbox, (user_id,))?;
/// // ...
/// task.cancel();
/// match task.result().await {
///     Err(e) if e.is_cancelled() => {}
///     other => other?,
/// }
/// ```
pub struct Task<T> {
    result: oneshot::Receiver<Result<T, SagaError>>,
    token: CancellationToken,
}

impl<T> Task<T> {
    pub(crate) fn new(
        result: oneshot::Receiver<Result<T, SagaError>>,
        token: CancellationToken,
    ) -> Self {
        Self { result, token }
    }

    /// A task whose result is already known.
    pub(crate) fn ready(value: T, token: CancellationToken) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(value));
        Self::new(rx, token)
    }

    /// Set the task's token. Its workflow fails at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_canceled()
    }

    /// The task's own cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait for the workflow's outcome.
    pub async fn result(self) -> Result<T, SagaError> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(SagaError::TaskAborted),
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_task_yields_value() {
        let task = Task::ready(5u32, CancellationToken::new());
        assert_eq!(task.result().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_aborted() {
        let (tx, rx) = oneshot::channel::<Result<u32, SagaError>>();
        drop(tx);

        let task = Task::new(rx, CancellationToken::new());
        assert!(matches!(task.result().await, Err(SagaError::TaskAborted)));
    }

    #[test]
    fn test_cancel_sets_own_token_only() {
        let other = CancellationToken::new();
        let task = Task::ready((), CancellationToken::new());

        task.cancel();

        assert!(task.is_canceled());
        assert!(!other.is_canceled());
    }
}
