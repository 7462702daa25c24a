//! Store contract and a minimal in-memory reducer store.
//!
//! The runtime only needs two things from a store: the current state and a
//! way to dispatch a message. Both production and test paths drive state
//! through the same pure [`Reducer`].

use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::message::Message;

/// Pure state transition: `(previous state or None, message) -> next state`.
///
/// `None` asks the reducer for its initial state.
pub type Reducer<S> = Arc<dyn Fn(Option<&S>, &Message) -> S + Send + Sync>;

/// The narrow store interface consumed by the saga runtime.
pub trait Store<S>: Send + Sync {
    /// Snapshot of the current state.
    fn get_state(&self) -> Arc<S>;

    /// Apply `message` and return it.
    fn dispatch(&self, message: Message) -> Message;
}

/// In-memory store that applies a reducer on every dispatch.
///
/// # Example
///
/// ```ignore
/// let store = ReducerStore::new(counter_reducer);
/// store.dispatch(INCREMENT.create(2));
/// assert_eq!(store.get_state().count, 2);
/// ```
pub struct ReducerStore<S> {
    state: RwLock<Arc<S>>,
    reducer: Reducer<S>,
}

impl<S: Send + Sync + 'static> ReducerStore<S> {
    /// Create a store whose initial state comes from the reducer's setup pass.
    pub fn new<R>(reducer: R) -> Self
    where
        R: Fn(Option<&S>, &Message) -> S + Send + Sync + 'static,
    {
        Self::from_reducer(Arc::new(reducer))
    }

    /// Create a store from an already shared reducer.
    pub fn from_reducer(reducer: Reducer<S>) -> Self {
        let initial = reducer(None, &Message::setup());
        Self {
            state: RwLock::new(Arc::new(initial)),
            reducer,
        }
    }

    /// Create a store with an explicit initial state.
    pub fn with_state<R>(reducer: R, state: S) -> Self
    where
        R: Fn(Option<&S>, &Message) -> S + Send + Sync + 'static,
    {
        Self {
            state: RwLock::new(Arc::new(state)),
            reducer: Arc::new(reducer),
        }
    }

    /// Create a store from a shared reducer and an explicit initial state.
    pub fn from_reducer_with_state(reducer: Reducer<S>, state: S) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
            reducer,
        }
    }
}

impl<S: Send + Sync + 'static> Store<S> for ReducerStore<S> {
    fn get_state(&self) -> Arc<S> {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("store lock was poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    fn dispatch(&self, message: Message) -> Message {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let next = (self.reducer)(Some(&**guard), &message);
        *guard = Arc::new(next);
        message
    }
}

impl<S> std::fmt::Debug for ReducerStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerStore").finish_non_exhaustive()
    }
}
