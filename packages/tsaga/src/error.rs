//! Structured error types for tsaga.
//!
//! [`SagaError`] is what every effect operation returns. Its
//! [`Cancelled`](SagaError::Cancelled) variant is the expected way a workflow
//! instance ends after its token was set; the runtime swallows it at the
//! instance boundary.
//!
//! [`HarnessError`] is what the deterministic test harness reports. Harness
//! failures are hard test failures.
//!
//! # Example
//!
//! ```ignore
//! match env.dispatch(SAVED.create(doc)) {
//!     Ok(_) => {}
//!     Err(e) if e.is_cancelled() => return Ok(()),
//!     Err(e) => return Err(e),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

/// Error returned by effect operations and workflow bodies.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The environment's cancellation token was set.
    #[error("saga has been cancelled")]
    Cancelled,

    /// A message with the awaited tag carried a payload of another type.
    #[error("message {kind} does not carry a {expected} payload")]
    UnexpectedPayload {
        /// Type tag of the message.
        kind: &'static str,
        /// Payload type the creator expected.
        expected: &'static str,
    },

    /// The store binding went away while a `take` was suspended.
    #[error("message source closed while waiting for {kind}")]
    Disconnected {
        /// Type tag that was awaited.
        kind: &'static str,
    },

    /// A spawned task ended without producing a result (it panicked).
    #[error("spawned task ended without producing a result")]
    TaskAborted,

    /// Harness failure surfaced through an effect call.
    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// Failure raised by workflow code itself.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl SagaError {
    /// Returns true for the cancellation condition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SagaError::Cancelled)
    }
}

/// Failure reported by the effect test harness.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// Mocks were left in the pool after the saga completed.
    #[error("unused mocks after the saga completed: {}", .mocks.join(", "))]
    UnusedMocks {
        /// Description of every unconsumed mock, in pool order.
        mocks: Vec<String>,
    },

    /// Final tracked state differs from the expected state.
    #[error("final state mismatch\n  expected: {expected}\n  actual: {actual}")]
    StateMismatch {
        expected: String,
        actual: String,
    },

    /// A dispatch mock matched by type but its payload differs.
    #[error("dispatch of {kind} payload mismatch\n  expected: {expected}\n  actual: {actual}")]
    PayloadMismatch {
        kind: &'static str,
        expected: String,
        actual: String,
    },

    /// A mock matched an effect but holds a value of the wrong type.
    #[error("mock for {effect} holds a {found} value, expected {expected}")]
    MockTypeMismatch {
        effect: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The run was started without a reducer to track state.
    #[error("expect_saga({saga}) needs with_reducer(..) before when_run_with")]
    MissingReducer { saga: &'static str },

    /// The saga returned an error other than cancellation.
    #[error("saga failed: {message}")]
    SagaFailed { message: String },

    /// The saga (or work it spawned) did not finish in time.
    #[error("saga did not complete within {duration:?}")]
    TimedOut { duration: Duration },
}
