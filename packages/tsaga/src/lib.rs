//! # tsaga
//!
//! Effect-driven sagas over a shared reducer store, with structured
//! cancellation and a deterministic mock harness.
//!
//! ## Core Concepts
//!
//! Workflow code never acts directly. It asks an [`Environment`] to act:
//! - [`Message`] = Facts dispatched to the store (a type tag plus payload)
//! - [`Saga`] = A workflow started by one message kind
//! - [`Environment`] = The only way a workflow reads state, calls out,
//!   dispatches, runs children or waits for messages
//!
//! The key principle: **every effect is interpretable**. In production the
//! [`SagaRuntime`] performs it; under test the harness may substitute a
//! recorded value instead.
//!
//! ## Architecture
//!
//! ```text
//! Edge (API/UI)
//!     │
//!     ▼ dispatch()
//! SagaRuntime ─────────────────────────────────────┐
//!     │                                            │
//!     ├─► Store.dispatch() (reducer, once)         │
//!     │                                            │
//!     ├─► resolve pending take()s                  │
//!     │                                            │
//!     └─► matching Saga ─► new instance + token    │
//!                              │                   │
//!                              ▼                   │
//!                         Environment              │
//!                              │                   │
//!          select / call / run / spawn / take      │
//!                              │                   │
//!                              └─► env.dispatch() ─┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Checkpoint first** - every environment operation fails with
//!    [`SagaError::Cancelled`] once its token is set
//! 2. **Detached means independent** - `spawn`ed children and saga instances
//!    get their own token; cancelling a parent never reaches them
//! 3. **Attached means shared** - `run` children share the parent's token
//! 4. **Reducer exactly once** - every dispatched message, mocked or not, goes
//!    through the reducer once, then pending `take`s are resolved
//! 5. **Mocks are consumed once** - leftovers fail the harness run
//!
//! ## Example
//!
//! ```ignore
//! use tsaga::{Environment, MessageCreator, ReducerStore, Saga, SagaError, SagaRuntime};
//!
//! pub const POST_STRING: MessageCreator<String> = MessageCreator::new("posts/POST_STRING");
//! pub const POST_FAILED: MessageCreator<u16> = MessageCreator::new("posts/POST_FAILED");
//!
//! async fn post_string(env: Environment<Posts>, text: String) -> Result<(), SagaError> {
//!     if env.select(text_longer_than_count, ("sample",))? {
//!         let status = env.call_async(api::post, (text,)).await?;
//!         if status != 200 {
//!             env.dispatch(POST_FAILED.create(status))?;
//!         }
//!     }
//!     Ok(())
//! }
//!
//! let runtime = SagaRuntime::builder(ReducerStore::new(posts_reducer))
//!     .with_saga(Saga::latest(POST_STRING, post_string))
//!     .build();
//!
//! runtime.dispatch(POST_STRING.create("hello".into()));
//! runtime.settled().await;
//! ```
//!
//! ## What This Is Not
//!
//! tsaga is **not**:
//! - A durable workflow engine (instances live in memory)
//! - A retry or timeout policy layer
//! - Preemptive: cancellation is observed at the next checkpoint only

mod awaiting;
mod cancel;
mod effect;
mod environment;
mod error;
mod inflight;
mod message;
mod runtime;
mod saga;
mod store;
mod task;

// Mocks and the harness (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod mock;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Scenario tests (test-only)
#[cfg(test)]
mod scenario_tests;


pub use cancel::CancellationToken;
pub use effect::{Callable, Effect, EffectId, EffectKey, EffectKind, Selector, Target, Workflow};
pub use environment::Environment;
pub use error::{HarnessError, SagaError};
pub use message::{is_type, Message, MessageCreator, Payload, SETUP_KIND};
pub use runtime::{InstanceId, SagaRuntime, SagaRuntimeBuilder};
pub use saga::{Saga, SagaMode};
pub use store::{Reducer, ReducerStore, Store};
pub use task::Task;

// Re-export commonly used external types
pub use async_trait::async_trait;
