//! Deterministic effect test harness for sagas.
//!
//! The harness runs a saga handler against a tracked in-memory state and a
//! pool of [`Mock`]s instead of a live runtime. Every effect the workflow
//! performs is first matched against the pool; a match hands back the
//! recorded value, anything else runs for real against the tracked state.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tsaga = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use tsaga::mock::{calls_async, selects};
//! use tsaga::testing::expect_saga;
//!
//! expect_saga(&Saga::every(POST_STRING, post_string))
//!     .with_reducer(posts_reducer)
//!     .with_initial_state(Posts { count: 0 })
//!     .after_it([
//!         selects(text_longer_than_count).receiving(true),
//!         calls_async(api::post).receiving(200),
//!     ])
//!     .to_have_final_state(Posts { count: 0 })
//!     .when_run_with(String::new())
//!     .await?;
//! ```
//!
//! # What gets checked
//!
//! After the handler and everything it spawned have finished, in order:
//!
//! 1. The first failure recorded while running (payload or type mismatch)
//! 2. The handler's own error, unless it is cancellation
//! 3. Mocks left in the pool
//! 4. Final tracked state against the expected state
//!
//! The whole run is bounded by [`DEFAULT_HARNESS_TIMEOUT`] unless
//! [`SagaTest::with_timeout`] says otherwise.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, trace};

use crate::awaiting::AwaitingMessages;
use crate::cancel::CancellationToken;
use crate::effect::EffectKey;
use crate::environment::{Environment, Interpreter, MockValue, ValueType};
use crate::error::{HarnessError, SagaError};
use crate::inflight::Inflight;
use crate::message::{Message, Payload};
use crate::mock::{Mock, MockPool};
use crate::runtime::lock;
use crate::saga::Saga;
use crate::store::{Reducer, ReducerStore, Store};

/// Upper bound on one harness run, including spawned work.
pub const DEFAULT_HARNESS_TIMEOUT: Duration = Duration::from_secs(5);

/// State owned by one harness run. Never shared across runs.
struct Harness<S> {
    store: ReducerStore<S>,
    mocks: Mutex<MockPool>,
    awaiting: Mutex<AwaitingMessages>,
    failure: Mutex<Option<HarnessError>>,
    inflight: Arc<Inflight>,
}

impl<S: Send + Sync + 'static> Harness<S> {
    /// Keep the first failure for the report and hand it back to the workflow.
    fn record(&self, error: HarnessError) -> SagaError {
        let mut failure = lock(&self.failure);
        if failure.is_none() {
            *failure = Some(error.clone());
        }
        error.into()
    }

    fn report(&self, outcome: Result<(), SagaError>, expected: Option<&S>) -> Result<(), HarnessError>
    where
        S: PartialEq + Debug,
    {
        if let Some(failure) = lock(&self.failure).take() {
            return Err(failure);
        }

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("saga under test ended by cancellation"),
            Err(e) => {
                return Err(HarnessError::SagaFailed {
                    message: e.to_string(),
                })
            }
        }

        let mocks = lock(&self.mocks);
        if !mocks.is_empty() {
            return Err(HarnessError::UnusedMocks {
                mocks: mocks.describe(),
            });
        }

        if let Some(expected) = expected {
            let actual = self.store.get_state();
            if *actual != *expected {
                return Err(HarnessError::StateMismatch {
                    expected: format!("{:?}", expected),
                    actual: format!("{:?}", actual),
                });
            }
        }

        Ok(())
    }
}

/// Interpreter that consults the mock pool before acting on tracked state.
struct HarnessInterpreter<S> {
    harness: Arc<Harness<S>>,
    token: CancellationToken,
}

impl<S: Send + Sync + 'static> Interpreter<S> for HarnessInterpreter<S> {
    fn token(&self) -> Option<&CancellationToken> {
        Some(&self.token)
    }

    fn state(&self) -> Arc<S> {
        self.harness.store.get_state()
    }

    fn substitute(
        &self,
        key: &EffectKey,
        expects: ValueType,
    ) -> Result<Option<MockValue>, SagaError> {
        let substituted = lock(&self.harness.mocks).take_value(key, expects);
        match substituted {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                debug!(effect = %key, "no mock, running for real");
                Ok(None)
            }
            Err(e) => Err(self.harness.record(e)),
        }
    }

    fn dispatch(&self, message: Message) -> Result<Message, SagaError> {
        let matched = lock(&self.harness.mocks).take_dispatch(&message);
        match matched {
            Ok(true) => {}
            Ok(false) => trace!(kind = message.kind(), "unmocked dispatch"),
            Err(e) => return Err(self.harness.record(e)),
        }

        // Mocked or not, the message goes through the real reducer.
        let message = self.harness.store.dispatch(message);
        lock(&self.harness.awaiting).resolve(&message);
        Ok(message)
    }

    fn take(&self, kind: &'static str) -> BoxFuture<'static, Result<Message, SagaError>> {
        let receiver = lock(&self.harness.awaiting).register(kind);
        let token = self.token.clone();

        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(SagaError::Cancelled),
                received = receiver => received.map_err(|_| SagaError::Disconnected { kind }),
            }
        }
        .boxed()
    }

    /// Detached work runs against the same harness state under its own token.
    fn detach(&self) -> (Arc<dyn Interpreter<S>>, CancellationToken) {
        let token = CancellationToken::new();
        let child = HarnessInterpreter {
            harness: self.harness.clone(),
            token: token.clone(),
        };
        (Arc::new(child), token)
    }

    /// A spawned task's token is connected to nothing, so `Task::cancel` is inert.
    fn task_token(&self, _child_token: CancellationToken) -> CancellationToken {
        CancellationToken::new()
    }

    fn launch(&self, work: BoxFuture<'static, ()>) {
        self.harness.inflight.launch(work);
    }
}

/// Fluent builder for one harness run of a saga.
///
/// Created with [`expect_saga`]; see the module docs for an example.
pub struct SagaTest<S, P> {
    saga: Saga<S, P>,
    reducer: Option<Reducer<S>>,
    initial_state: Option<S>,
    mocks: Vec<Mock>,
    expected: Option<S>,
    timeout: Duration,
}

/// Start describing a harness run of `saga`.
pub fn expect_saga<S, P>(saga: &Saga<S, P>) -> SagaTest<S, P>
where
    S: PartialEq + Debug + Send + Sync + 'static,
    P: Payload,
{
    SagaTest {
        saga: saga.clone(),
        reducer: None,
        initial_state: None,
        mocks: Vec::new(),
        expected: None,
        timeout: DEFAULT_HARNESS_TIMEOUT,
    }
}

impl<S, P> SagaTest<S, P>
where
    S: PartialEq + Debug + Send + Sync + 'static,
    P: Payload,
{
    /// Reducer that tracks state for the run. Required.
    pub fn with_reducer<R>(self, reducer: R) -> Self
    where
        R: Fn(Option<&S>, &Message) -> S + Send + Sync + 'static,
    {
        self.with_shared_reducer(Arc::new(reducer))
    }

    pub fn with_shared_reducer(mut self, reducer: Reducer<S>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// State before the trigger message. Defaults to the reducer's setup state.
    pub fn with_initial_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Mocks the saga is expected to consume, in any order.
    pub fn after_it<I>(mut self, mocks: I) -> Self
    where
        I: IntoIterator<Item = Mock>,
    {
        self.mocks.extend(mocks);
        self
    }

    /// State the run must end in. Without it, final state is not compared.
    pub fn to_have_final_state(mut self, state: S) -> Self {
        self.expected = Some(state);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the saga with its trigger `payload` and check the outcome.
    pub async fn when_run_with(self, payload: P) -> Result<(), HarnessError> {
        let Some(reducer) = self.reducer else {
            return Err(HarnessError::MissingReducer {
                saga: self.saga.creator().kind(),
            });
        };

        let store = match self.initial_state {
            Some(state) => ReducerStore::from_reducer_with_state(reducer, state),
            None => ReducerStore::from_reducer(reducer),
        };
        store.dispatch(self.saga.creator().create(payload.clone()));

        let harness = Arc::new(Harness {
            store,
            mocks: Mutex::new(MockPool::new(self.mocks)),
            awaiting: Mutex::new(AwaitingMessages::new()),
            failure: Mutex::new(None),
            inflight: Arc::new(Inflight::new()),
        });
        let env = Environment::new(Arc::new(HarnessInterpreter {
            harness: harness.clone(),
            token: CancellationToken::new(),
        }));

        debug!(saga = self.saga.creator().kind(), "running saga under harness");
        let run = async {
            let outcome = self.saga.start(env, payload).await;
            harness.inflight.wait_idle().await;
            outcome
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(outcome) => harness.report(outcome, self.expected.as_ref()),
            Err(_) => match lock(&harness.failure).take() {
                Some(failure) => Err(failure),
                None => Err(HarnessError::TimedOut {
                    duration: self.timeout,
                }),
            },
        }
    }
}

impl<S, P> std::fmt::Debug for SagaTest<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaTest")
            .field("saga", &self.saga)
            .field("mocks", &self.mocks.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// One-call form of [`expect_saga`].
///
/// `initial_message` must be a trigger of `saga`; its payload is what the
/// handler receives.
pub async fn test_saga_with_state<S, P, R>(
    saga: &Saga<S, P>,
    initial_message: Message,
    mocks: Vec<Mock>,
    initial_state: Option<S>,
    reducer: R,
    final_state: S,
) -> Result<(), HarnessError>
where
    S: PartialEq + Debug + Send + Sync + 'static,
    P: Payload,
    R: Fn(Option<&S>, &Message) -> S + Send + Sync + 'static,
{
    let Some(payload) = saga.creator().payload_of(&initial_message).cloned() else {
        return Err(HarnessError::SagaFailed {
            message: format!(
                "{} does not trigger saga {}",
                initial_message.kind(),
                saga.creator().kind()
            ),
        });
    };

    let mut test = expect_saga(saga)
        .with_reducer(reducer)
        .after_it(mocks)
        .to_have_final_state(final_state);
    if let Some(state) = initial_state {
        test = test.with_initial_state(state);
    }
    test.when_run_with(payload).await
}
