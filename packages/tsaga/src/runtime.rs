//! Saga runtime: the production interpreter and dispatch policy.
//!
//! The `SagaRuntime` wraps a store. Every message dispatched through it, from
//! edge code or from a running saga, goes through the same three steps:
//!
//! 1. The store applies its reducer (exactly once)
//! 2. Every `take` waiting for that message kind is resolved
//! 3. Every registered saga whose trigger matches starts an instance
//!
//! All three happen before `dispatch` returns, so code that reads state right
//! after a dispatch sees the post-dispatch state, and resumed `take`s run no
//! later than the next scheduler tick.
//!
//! ```text
//! dispatch(msg) ──► Store.dispatch ──► resolve takes ──► trigger sagas
//!      ▲                                                     │
//!      │                                  tokio::spawn(instance, new token)
//!      │                                                     │
//!      └──────────────── env.dispatch(..) ◄──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let runtime = SagaRuntime::builder(ReducerStore::new(reducer))
//!     .with_saga(Saga::latest(SEARCH, search))
//!     .with_saga(Saga::every(SAVE, save))
//!     .build();
//!
//! runtime.dispatch(SEARCH.create("rust".into()));
//! runtime.settled().await;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::awaiting::AwaitingMessages;
use crate::cancel::CancellationToken;
use crate::environment::{Environment, Interpreter};
use crate::error::SagaError;
use crate::inflight::Inflight;
use crate::message::{Message, Payload};
use crate::saga::{Saga, SagaMode};
use crate::store::Store;

/// Identifier of one running saga instance, used in tracing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// =============================================================================
// Runtime core
// =============================================================================

struct RuntimeInner<S> {
    store: Arc<dyn Store<S>>,
    awaiting: Mutex<AwaitingMessages>,
    sagas: Vec<Box<dyn RegisteredSaga<S>>>,
    /// Token of every instance still running, for shutdown.
    running: DashMap<InstanceId, CancellationToken>,
    inflight: Arc<Inflight>,
}

impl<S: Send + Sync + 'static> RuntimeInner<S> {
    fn dispatch(self: &Arc<Self>, message: Message) -> Message {
        let message = self.store.dispatch(message);

        let resolved = lock(&self.awaiting).resolve(&message);
        if resolved > 0 {
            trace!(kind = message.kind(), resolved, "resolved waiting takes");
        }

        for saga in &self.sagas {
            saga.trigger(self, &message);
        }

        message
    }
}

/// Production interpreter: acts on the store, gated by an optional token.
struct StoreInterpreter<S> {
    runtime: Arc<RuntimeInner<S>>,
    token: Option<CancellationToken>,
}

impl<S: Send + Sync + 'static> Interpreter<S> for StoreInterpreter<S> {
    fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    fn state(&self) -> Arc<S> {
        self.runtime.store.get_state()
    }

    fn dispatch(&self, message: Message) -> Result<Message, SagaError> {
        Ok(self.runtime.dispatch(message))
    }

    fn take(&self, kind: &'static str) -> BoxFuture<'static, Result<Message, SagaError>> {
        let receiver = lock(&self.runtime.awaiting).register(kind);
        let token = self.token.clone();

        async move {
            // A suspended take wakes as soon as its token is set, so superseded
            // instances do not wait for a message that may never come.
            let received = match token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(SagaError::Cancelled),
                    received = receiver => received,
                },
                None => receiver.await,
            };
            received.map_err(|_| SagaError::Disconnected { kind })
        }
        .boxed()
    }

    fn detach(&self) -> (Arc<dyn Interpreter<S>>, CancellationToken) {
        let token = CancellationToken::new();
        let child = StoreInterpreter {
            runtime: self.runtime.clone(),
            token: Some(token.clone()),
        };
        (Arc::new(child), token)
    }

    fn launch(&self, work: BoxFuture<'static, ()>) {
        self.runtime.inflight.launch(work);
    }
}

// =============================================================================
// Registrations
// =============================================================================

/// Type-erased saga registration.
trait RegisteredSaga<S>: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Start an instance if `message` is this saga's trigger.
    fn trigger(&self, runtime: &Arc<RuntimeInner<S>>, message: &Message);
}

struct Registration<S, P> {
    saga: Saga<S, P>,
    /// Instance started by the latest trigger (`Latest` mode only).
    current: Arc<Mutex<Option<(InstanceId, CancellationToken)>>>,
}

impl<S, P> RegisteredSaga<S> for Registration<S, P>
where
    S: Send + Sync + 'static,
    P: Payload,
{
    fn kind(&self) -> &'static str {
        self.saga.creator().kind()
    }

    fn trigger(&self, runtime: &Arc<RuntimeInner<S>>, message: &Message) {
        let Some(payload) = self.saga.creator().payload_of(message).cloned() else {
            return;
        };

        let saga = self.kind();
        let mode = self.saga.mode();
        let id = InstanceId::new();
        let token = CancellationToken::new();

        if mode == SagaMode::Latest {
            let previous = lock(&self.current).replace((id, token.clone()));
            if let Some((previous_id, previous_token)) = previous {
                debug!(saga, instance = %previous_id, "cancelling superseded instance");
                previous_token.cancel();
            }
        }

        runtime.running.insert(id, token.clone());
        let guard = RunningGuard {
            runtime: runtime.clone(),
            current: self.current.clone(),
            id,
        };

        let env = Environment::new(Arc::new(StoreInterpreter {
            runtime: runtime.clone(),
            token: Some(token),
        }));
        let work = self.saga.start(env, payload);

        debug!(saga, instance = %id, %mode, "starting saga instance");
        runtime.inflight.launch(
            async move {
                match work.await {
                    Ok(()) => debug!(saga, instance = %id, "saga instance completed"),
                    Err(e) if e.is_cancelled() => {
                        debug!(saga, instance = %id, "saga instance cancelled")
                    }
                    Err(e) => error!(saga, instance = %id, error = %e, "saga instance failed"),
                }
                drop(guard);
            }
            .boxed(),
        );
    }
}

/// Removes a finished instance from the running table (and the latest slot).
///
/// Runs on drop, so a panicking instance is still cleaned up.
struct RunningGuard<S> {
    runtime: Arc<RuntimeInner<S>>,
    current: Arc<Mutex<Option<(InstanceId, CancellationToken)>>>,
    id: InstanceId,
}

impl<S> Drop for RunningGuard<S> {
    fn drop(&mut self) {
        self.runtime.running.remove(&self.id);

        let mut current = lock(&self.current);
        if matches!(*current, Some((id, _)) if id == self.id) {
            *current = None;
        }
    }
}

// =============================================================================
// Public runtime
// =============================================================================

/// A store wrapped with registered sagas.
///
/// Cheap to clone; clones share the store, waiters and running instances.
/// Dispatching a message that triggers a saga spawns onto the current tokio
/// runtime, so `dispatch` must be called from within one.
pub struct SagaRuntime<S> {
    inner: Arc<RuntimeInner<S>>,
}

impl<S> Clone for SagaRuntime<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> SagaRuntime<S> {
    /// Start building a runtime over `store`.
    pub fn builder<St>(store: St) -> SagaRuntimeBuilder<S>
    where
        St: Store<S> + 'static,
    {
        SagaRuntimeBuilder::new(store)
    }

    /// Dispatch a message: reduce, resolve takes, trigger sagas. Returns the message.
    pub fn dispatch(&self, message: Message) -> Message {
        self.inner.dispatch(message)
    }

    /// Current store state.
    pub fn state(&self) -> Arc<S> {
        self.inner.store.get_state()
    }

    /// Root environment over this runtime's store, with no cancellation token.
    ///
    /// Useful for running a workflow outside of any registered saga.
    pub fn environment(&self) -> Environment<S> {
        Environment::new(Arc::new(StoreInterpreter {
            runtime: self.inner.clone(),
            token: None,
        }))
    }

    /// Number of saga instances currently running.
    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    /// Number of registered sagas.
    pub fn saga_count(&self) -> usize {
        self.inner.sagas.len()
    }

    /// Number of `take` waiters not yet resolved.
    pub fn pending_takes(&self) -> usize {
        lock(&self.inner.awaiting).len()
    }

    /// Wait until no saga instance or spawned task is in flight.
    pub async fn settled(&self) {
        self.inner.inflight.wait_idle().await;
    }

    /// Cancel every running saga instance.
    ///
    /// Instances observe the cancellation at their next checkpoint; spawned
    /// tasks have their own tokens and are not affected.
    pub fn shutdown(&self) {
        let count = self.inner.running.len();
        for entry in self.inner.running.iter() {
            entry.value().cancel();
        }
        info!(cancelled = count, "saga runtime shut down");
    }
}

impl<S: Send + Sync + 'static> Store<S> for SagaRuntime<S> {
    fn get_state(&self) -> Arc<S> {
        self.state()
    }

    fn dispatch(&self, message: Message) -> Message {
        SagaRuntime::dispatch(self, message)
    }
}

impl<S> fmt::Debug for SagaRuntime<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = self.inner.sagas.iter().map(|saga| saga.kind()).collect();
        f.debug_struct("SagaRuntime")
            .field("sagas", &kinds)
            .field("running", &self.inner.running.len())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`SagaRuntime`].
///
/// # Example
///
/// ```ignore
/// let runtime = SagaRuntimeBuilder::new(store)
///     .with_saga(Saga::every(ADD_TODO, persist_todo))
///     .with_saga(Saga::latest(SEARCH, search))
///     .build();
/// ```
pub struct SagaRuntimeBuilder<S> {
    store: Arc<dyn Store<S>>,
    sagas: Vec<Box<dyn RegisteredSaga<S>>>,
}

impl<S: Send + Sync + 'static> SagaRuntimeBuilder<S> {
    pub fn new<St>(store: St) -> Self
    where
        St: Store<S> + 'static,
    {
        Self::with_arc(Arc::new(store))
    }

    /// Use a store that is shared with other parts of the system.
    pub fn with_arc(store: Arc<dyn Store<S>>) -> Self {
        Self {
            store,
            sagas: Vec::new(),
        }
    }

    /// Register a saga. Sagas are triggered in registration order.
    pub fn with_saga<P: Payload>(mut self, saga: Saga<S, P>) -> Self {
        self.sagas.push(Box::new(Registration {
            saga,
            current: Arc::new(Mutex::new(None)),
        }));
        self
    }

    pub fn build(self) -> SagaRuntime<S> {
        info!(saga_count = self.sagas.len(), "saga runtime built");

        SagaRuntime {
            inner: Arc::new(RuntimeInner {
                store: self.store,
                awaiting: Mutex::new(AwaitingMessages::new()),
                sagas: self.sagas,
                running: DashMap::new(),
                inflight: Arc::new(Inflight::new()),
            }),
        }
    }
}

impl<S> fmt::Debug for SagaRuntimeBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaRuntimeBuilder")
            .field("saga_count", &self.sagas.len())
            .finish_non_exhaustive()
    }
}
