//! Saga registration: trigger, handler and dispatch policy.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::environment::Environment;
use crate::error::SagaError;
use crate::message::{MessageCreator, Payload};

/// How a saga reacts to repeated trigger messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaMode {
    /// Start a new independent instance for every trigger.
    Every,
    /// Cancel the still-running previous instance, then start a new one.
    Latest,
}

impl fmt::Display for SagaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaMode::Every => write!(f, "every"),
            SagaMode::Latest => write!(f, "latest"),
        }
    }
}

type Handler<S, P> =
    Arc<dyn Fn(Environment<S>, P) -> BoxFuture<'static, Result<(), SagaError>> + Send + Sync>;

/// A workflow triggered by one message kind.
///
/// # Example
///
/// ```ignore
/// pub const POST_STRING: MessageCreator<String> = MessageCreator::new("posts/POST_STRING");
///
/// async fn post_string(env: Environment<AppState>, text: String) -> Result<(), SagaError> {
///     // ...
///     Ok(())
/// }
///
/// let saga = Saga::latest(POST_STRING, post_string);
/// ```
pub struct Saga<S, P> {
    creator: MessageCreator<P>,
    handler: Handler<S, P>,
    mode: SagaMode,
}

impl<S, P> Saga<S, P>
where
    S: Send + Sync + 'static,
    P: Payload,
{
    /// Register `handler` for `creator`'s messages with the given mode.
    pub fn new<F, Fut>(creator: MessageCreator<P>, mode: SagaMode, handler: F) -> Self
    where
        F: Fn(Environment<S>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SagaError>> + Send + 'static,
    {
        Self {
            creator,
            handler: Arc::new(move |env, payload| handler(env, payload).boxed()),
            mode,
        }
    }

    /// Start an instance on every matching message.
    pub fn every<F, Fut>(creator: MessageCreator<P>, handler: F) -> Self
    where
        F: Fn(Environment<S>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SagaError>> + Send + 'static,
    {
        Self::new(creator, SagaMode::Every, handler)
    }

    /// Keep only the instance started by the latest matching message.
    pub fn latest<F, Fut>(creator: MessageCreator<P>, handler: F) -> Self
    where
        F: Fn(Environment<S>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SagaError>> + Send + 'static,
    {
        Self::new(creator, SagaMode::Latest, handler)
    }

    pub fn creator(&self) -> &MessageCreator<P> {
        &self.creator
    }

    pub fn mode(&self) -> SagaMode {
        self.mode
    }

    /// Run the handler body for one trigger payload.
    pub(crate) fn start(&self, env: Environment<S>, payload: P) -> BoxFuture<'static, Result<(), SagaError>> {
        (self.handler)(env, payload)
    }
}

impl<S, P> Clone for Saga<S, P> {
    fn clone(&self) -> Self {
        Self {
            creator: self.creator,
            handler: self.handler.clone(),
            mode: self.mode,
        }
    }
}

impl<S, P> fmt::Debug for Saga<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saga")
            .field("trigger", &self.creator.kind())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
