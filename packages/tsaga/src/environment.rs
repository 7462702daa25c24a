//! The effect environment handed to workflow code.
//!
//! Every operation goes through the same three steps:
//!
//! 1. **Checkpoint** - fail with [`SagaError::Cancelled`] if the bound token is set
//! 2. **Substitute** - ask the interpreter for a recorded value (the test harness has mocks,
//!    production never does)
//! 3. **Act** - call the function, read state, dispatch, run or spawn for real
//!
//! The interpreter behind the environment is the only thing that differs
//! between production ([`SagaRuntime`](crate::SagaRuntime)) and tests
//! (`testing::expect_saga`). Workflow code is written once against
//! [`Environment`].
//!
//! # Attached vs detached
//!
//! - `run`/`run_effect` execute inline with the *same* environment, so the child
//!   shares the parent's token and observes the parent's cancellation at its next
//!   checkpoint.
//! - `spawn`/`spawn_effect`/`create_detached_child_environment` derive a child
//!   environment with a *new* token. Cancelling the parent never reaches it.

use std::any::{type_name, Any, TypeId};
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::trace;

use crate::cancel::CancellationToken;
use crate::effect::{Callable, Effect, EffectId, EffectKey, EffectKind, Selector, Workflow};
use crate::error::{HarnessError, SagaError};
use crate::message::{Message, MessageCreator, Payload};
use crate::task::Task;

/// Recorded value handed back instead of running an effect.
pub(crate) type MockValue = Box<dyn Any + Send>;

/// Type a substituted value must have to be accepted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValueType {
    pub(crate) id: TypeId,
    pub(crate) name: &'static str,
}

impl ValueType {
    pub(crate) fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

/// The seam between [`Environment`] and whatever acts on its requests.
pub(crate) trait Interpreter<S>: Send + Sync {
    /// Token gating this binding, if any.
    fn token(&self) -> Option<&CancellationToken>;

    fn checkpoint(&self) -> Result<(), SagaError> {
        match self.token() {
            Some(token) => token.checkpoint(),
            None => Ok(()),
        }
    }

    fn state(&self) -> Arc<S>;

    /// A recorded value for `key`, consuming it.
    fn substitute(
        &self,
        _key: &EffectKey,
        _expects: ValueType,
    ) -> Result<Option<MockValue>, SagaError> {
        Ok(None)
    }

    fn dispatch(&self, message: Message) -> Result<Message, SagaError>;

    /// Register a waiter for `kind` now; the future resolves with the message.
    fn take(&self, kind: &'static str) -> BoxFuture<'static, Result<Message, SagaError>>;

    /// A child binding over the same store with a fresh token.
    fn detach(&self) -> (Arc<dyn Interpreter<S>>, CancellationToken);

    /// Token handed back in a spawned [`Task`] for a child detached with
    /// `child_token`.
    fn task_token(&self, child_token: CancellationToken) -> CancellationToken {
        child_token
    }

    /// Schedule detached work.
    fn launch(&self, work: BoxFuture<'static, ()>);
}

/// Effect environment: a store binding plus an optional cancellation token.
///
/// Cheap to clone; clones share the binding and the token.
///
/// # Example
///
/// ```ignore
/// async fn post_string(env: Environment<AppState>, text: String) -> Result<(), SagaError> {
///     if env.select(text_longer_than_count, (text.clone(),))? {
///         let status = env.call_async(api::post, (text,)).await?;
///         if status != 200 {
///             env.dispatch(POST_FAILED.create(status))?;
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct Environment<S> {
    interpreter: Arc<dyn Interpreter<S>>,
}

impl<S> Clone for Environment<S> {
    fn clone(&self) -> Self {
        Self {
            interpreter: self.interpreter.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> Environment<S> {
    pub(crate) fn new(interpreter: Arc<dyn Interpreter<S>>) -> Self {
        Self { interpreter }
    }

    /// The token this environment checks, if it has one.
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.interpreter.token().cloned()
    }

    pub fn is_canceled(&self) -> bool {
        self.interpreter.checkpoint().is_err()
    }

    /// Dispatch a message to the store. Returns the message.
    pub fn dispatch(&self, message: Message) -> Result<Message, SagaError> {
        self.interpreter.checkpoint()?;
        self.interpreter.dispatch(message)
    }

    /// Apply `selector` to the current state plus `args`.
    pub fn select<F, A>(&self, selector: F, args: A) -> Result<F::Output, SagaError>
    where
        F: Selector<S, A>,
        F::Output: 'static,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Select, EffectId::of::<F>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(value);
        }

        let state = self.interpreter.state();
        Ok(selector.select(&state, args))
    }

    /// Call `f` with `args`.
    ///
    /// This exists so cancellation is checked and tests can substitute the result.
    pub fn call<F, A>(&self, f: F, args: A) -> Result<F::Output, SagaError>
    where
        F: Callable<A>,
        F::Output: 'static,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Call, EffectId::of::<F>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(value);
        }

        Ok(f.invoke(args))
    }

    /// Call an asynchronous `f` with `args` and await its output.
    ///
    /// Substituted values are the *awaited* output.
    pub async fn call_async<F, A>(
        &self,
        f: F,
        args: A,
    ) -> Result<<F::Output as Future>::Output, SagaError>
    where
        F: Callable<A>,
        F::Output: Future,
        <F::Output as Future>::Output: 'static,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Call, EffectId::of::<F>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(value);
        }

        Ok(f.invoke(args).await)
    }

    /// Run a workflow function inline, attached to this environment's token.
    pub async fn run<F, A>(&self, workflow: F, args: A) -> Result<F::Output, SagaError>
    where
        F: Workflow<S, A>,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Run, EffectId::of::<F>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(value);
        }

        workflow.start(self.clone(), args).await
    }

    /// Run a bound effect inline, attached to this environment's token.
    pub async fn run_effect<E>(&self, effect: E) -> Result<E::Output, SagaError>
    where
        E: Effect<S>,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Run, EffectId::bound::<E>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(value);
        }

        effect.run(self.clone()).await
    }

    /// Start a workflow function in a detached child environment.
    ///
    /// The returned [`Task`] cancels only the child.
    pub fn spawn<F, A>(&self, workflow: F, args: A) -> Result<Task<F::Output>, SagaError>
    where
        F: Workflow<S, A>,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Spawn, EffectId::of::<F>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(Task::ready(value, CancellationToken::new()));
        }

        let (child, token) = self.interpreter.detach();
        trace!(effect = %key, "spawning detached workflow");
        let work = workflow.start(Environment::new(child), args);
        Ok(self.launch(work, self.interpreter.task_token(token)))
    }

    /// Start a bound effect in a detached child environment.
    pub fn spawn_effect<E>(&self, effect: E) -> Result<Task<E::Output>, SagaError>
    where
        E: Effect<S>,
    {
        self.interpreter.checkpoint()?;
        let key = EffectKey::new(EffectKind::Spawn, EffectId::bound::<E>());
        if let Some(value) = self.substitute(&key)? {
            return Ok(Task::ready(value, CancellationToken::new()));
        }

        let (child, token) = self.interpreter.detach();
        trace!(effect = %key, "spawning detached effect");
        let work = effect.run(Environment::new(child));
        Ok(self.launch(work, self.interpreter.task_token(token)))
    }

    /// Wait for the next message produced by `creator` and yield its payload.
    ///
    /// The waiter is registered when `take` is called, not when the future is
    /// first polled, so a message dispatched in between is not missed.
    pub fn take<P: Payload>(
        &self,
        creator: &MessageCreator<P>,
    ) -> impl Future<Output = Result<P, SagaError>> + Send + 'static {
        let creator = *creator;
        let pending = self
            .interpreter
            .checkpoint()
            .map(|()| self.interpreter.take(creator.kind()));

        async move {
            let message = pending?.await?;
            creator
                .payload_of(&message)
                .cloned()
                .ok_or(SagaError::UnexpectedPayload {
                    kind: creator.kind(),
                    expected: creator.payload_type(),
                })
        }
    }

    /// A child environment over the same store with its own token.
    ///
    /// Cancelling this environment never cancels the child.
    pub fn create_detached_child_environment(
        &self,
    ) -> Result<(Environment<S>, CancellationToken), SagaError> {
        self.interpreter.checkpoint()?;
        let (child, token) = self.interpreter.detach();
        Ok((Environment::new(child), token))
    }

    fn substitute<T: 'static>(&self, key: &EffectKey) -> Result<Option<T>, SagaError> {
        let Some(value) = self.interpreter.substitute(key, ValueType::of::<T>())? else {
            return Ok(None);
        };

        match value.downcast::<T>() {
            Ok(value) => Ok(Some(*value)),
            Err(_) => Err(HarnessError::MockTypeMismatch {
                effect: key.to_string(),
                expected: type_name::<T>(),
                found: "another type",
            }
            .into()),
        }
    }

    fn launch<T, Fut>(&self, work: Fut, token: CancellationToken) -> Task<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, SagaError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.interpreter.launch(Box::pin(async move {
            let _ = tx.send(work.await);
        }));
        Task::new(rx, token)
    }
}

impl<S> std::fmt::Debug for Environment<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("token", &self.interpreter.token())
            .finish_non_exhaustive()
    }
}
