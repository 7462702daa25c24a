//! End-to-end scenarios against the production runtime.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::effect::Effect;
use crate::environment::Environment;
use crate::error::SagaError;
use crate::message::{Message, MessageCreator};
use crate::runtime::SagaRuntime;
use crate::saga::Saga;
use crate::store::{ReducerStore, Store};

// ==========================================================================
// Test Types
// ==========================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct Board {
    results: Vec<u32>,
    done: usize,
}

const SEARCH: MessageCreator<u32> = MessageCreator::new("board/SEARCH");
const RESULT: MessageCreator<u32> = MessageCreator::new("board/RESULT");
const GATE: MessageCreator<()> = MessageCreator::new("board/GATE");
const DONE: MessageCreator<()> = MessageCreator::new("board/DONE");
const START: MessageCreator<()> = MessageCreator::new("board/START");
const NEVER: MessageCreator<()> = MessageCreator::new("board/NEVER");
const X: MessageCreator<u32> = MessageCreator::new("board/X");
const Y: MessageCreator<u32> = MessageCreator::new("board/Y");

fn board(state: Option<&Board>, message: &Message) -> Board {
    let mut next = state.cloned().unwrap_or_default();
    if let Some(result) = RESULT.payload_of(message) {
        next.results.push(*result);
    }
    if DONE.matches(message) {
        next.done += 1;
    }
    next
}

fn runtime_with(saga: Saga<Board, u32>) -> SagaRuntime<Board> {
    SagaRuntime::builder(ReducerStore::new(board))
        .with_saga(saga)
        .build()
}

/// Yield to spawned instances until `condition` holds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never became true");
}

async fn settle(runtime: &SagaRuntime<Board>) {
    tokio::time::timeout(Duration::from_secs(1), runtime.settled())
        .await
        .expect("runtime did not settle");
}

// ==========================================================================
// Workflows
// ==========================================================================

async fn gated_search(env: Environment<Board>, query: u32) -> Result<(), SagaError> {
    env.take(&GATE).await?;
    env.dispatch(RESULT.create(query))?;
    Ok(())
}

async fn gated_step(env: Environment<Board>) -> Result<(), SagaError> {
    env.take(&GATE).await?;
    env.dispatch(DONE.create(()))?;
    Ok(())
}

async fn gated_run(env: Environment<Board>, _query: u32) -> Result<(), SagaError> {
    env.run(gated_step, ()).await
}

// ==========================================================================
// Latest vs every
// ==========================================================================

#[tokio::test]
async fn test_latest_cancels_superseded_instance() {
    let tokens: Arc<Mutex<Vec<(u32, CancellationToken)>>> = Arc::default();
    let seen = tokens.clone();

    let runtime = runtime_with(Saga::latest(SEARCH, move |env: Environment<Board>, query| {
        if let Some(token) = env.cancellation_token() {
            seen.lock().unwrap().push((query, token));
        }
        gated_search(env, query)
    }));

    runtime.dispatch(SEARCH.create(1));
    runtime.dispatch(SEARCH.create(2));

    wait_until(|| runtime.running_count() == 1 && runtime.pending_takes() == 1).await;
    runtime.dispatch(GATE.create(()));
    settle(&runtime).await;

    let tokens = tokens.lock().unwrap();
    let token_of = |query| {
        tokens
            .iter()
            .find(|(q, _)| *q == query)
            .map(|(_, token)| token.is_canceled())
    };
    assert_eq!(token_of(1), Some(true), "first instance was not cancelled");
    assert_eq!(token_of(2), Some(false));

    assert_eq!(runtime.state().results, vec![2]);
    assert_eq!(runtime.running_count(), 0);
}

#[tokio::test]
async fn test_latest_wakes_suspended_take() {
    let runtime = runtime_with(Saga::latest(SEARCH, gated_search));

    runtime.dispatch(SEARCH.create(1));
    wait_until(|| runtime.pending_takes() == 1).await;

    // Instance 1 is suspended in take; superseding it must end it now.
    runtime.dispatch(SEARCH.create(2));
    wait_until(|| runtime.running_count() == 1 && runtime.pending_takes() == 1).await;

    runtime.dispatch(GATE.create(()));
    settle(&runtime).await;

    assert_eq!(runtime.state().results, vec![2]);
}

#[tokio::test]
async fn test_every_runs_all_instances() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));

    for query in 1..=3 {
        runtime.dispatch(SEARCH.create(query));
    }
    assert_eq!(runtime.running_count(), 3);

    wait_until(|| runtime.pending_takes() == 3).await;
    runtime.dispatch(GATE.create(()));
    settle(&runtime).await;

    let mut results = runtime.state().results.clone();
    results.sort_unstable();
    assert_eq!(results, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_attached_run_observes_parent_cancellation() {
    let runtime = runtime_with(Saga::latest(SEARCH, gated_run));

    runtime.dispatch(SEARCH.create(1));
    wait_until(|| runtime.pending_takes() == 1).await;
    runtime.dispatch(SEARCH.create(2));
    wait_until(|| runtime.running_count() == 1 && runtime.pending_takes() == 1).await;

    runtime.dispatch(GATE.create(()));
    settle(&runtime).await;

    assert_eq!(runtime.state().done, 1);
}

// ==========================================================================
// take
// ==========================================================================

#[tokio::test]
async fn test_take_resolves_with_dispatched_payload_only() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));
    let env = runtime.environment();

    let x = env.take(&X);
    let y = env.take(&Y);
    assert_eq!(runtime.pending_takes(), 2);

    runtime.dispatch(X.create(42));

    assert_eq!(x.await.unwrap(), 42);
    assert_eq!(runtime.pending_takes(), 1);

    let still_waiting = tokio::time::timeout(Duration::from_millis(20), y).await;
    assert!(still_waiting.is_err(), "take for another kind was resolved");
}

#[tokio::test]
async fn test_take_registered_before_poll_is_not_missed() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));
    let env = runtime.environment();

    let pending = env.take(&X);
    runtime.dispatch(X.create(7));

    assert_eq!(pending.await.unwrap(), 7);
}

#[tokio::test]
async fn test_one_dispatch_resolves_every_waiter() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));
    let env = runtime.environment();

    let first = env.take(&X);
    let second = env.take(&X);
    runtime.dispatch(X.create(5));

    assert_eq!(first.await.unwrap(), 5);
    assert_eq!(second.await.unwrap(), 5);
}

// ==========================================================================
// Tokens, detached children, shutdown
// ==========================================================================

async fn spawns_gated_child(env: Environment<Board>, _query: u32) -> Result<(), SagaError> {
    let _child = env.spawn(gated_step, ())?;
    env.take(&NEVER).await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_cancels_instances_not_spawned_children() {
    let runtime = runtime_with(Saga::every(SEARCH, spawns_gated_child));

    runtime.dispatch(SEARCH.create(1));
    wait_until(|| runtime.pending_takes() == 2).await;

    runtime.shutdown();
    wait_until(|| runtime.running_count() == 0).await;

    // The spawned child has its own token and is still waiting.
    runtime.dispatch(GATE.create(()));
    settle(&runtime).await;

    assert_eq!(runtime.state().done, 1);
}

#[tokio::test]
async fn test_task_cancel_ends_child_only() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));
    let env = runtime.environment();

    let task = env.spawn(gated_step, ()).unwrap();
    wait_until(|| runtime.pending_takes() == 1).await;

    task.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task.result())
        .await
        .expect("cancelled task never finished");

    assert!(matches!(result, Err(SagaError::Cancelled)));
    assert!(!env.is_canceled());
    assert!(env.dispatch(START.create(())).is_ok());
}

struct GatedDone;

#[async_trait]
impl Effect<Board> for GatedDone {
    type Output = ();

    async fn run(self, env: Environment<Board>) -> Result<(), SagaError> {
        gated_step(env).await
    }
}

#[tokio::test]
async fn test_spawned_effect_cancel_ends_child_only() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));
    let env = runtime.environment();

    let task = env.spawn_effect(GatedDone).unwrap();
    wait_until(|| runtime.pending_takes() == 1).await;

    task.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task.result())
        .await
        .expect("cancelled effect never finished");

    assert!(matches!(result, Err(SagaError::Cancelled)));
    assert!(!env.is_canceled());

    // The cancelled child never reaches its dispatch.
    runtime.dispatch(GATE.create(()));
    settle(&runtime).await;
    assert_eq!(runtime.state().done, 0);
}

#[tokio::test]
async fn test_detached_child_environment_is_independent() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));
    let root = runtime.environment();
    assert!(root.cancellation_token().is_none());

    let (child, child_token) = root.create_detached_child_environment().unwrap();
    let (grandchild, grandchild_token) = child.create_detached_child_environment().unwrap();

    child_token.cancel();

    assert!(child.is_canceled());
    assert!(matches!(
        child.dispatch(DONE.create(())),
        Err(SagaError::Cancelled)
    ));
    assert!(matches!(
        child.take(&GATE).await,
        Err(SagaError::Cancelled)
    ));

    assert!(!grandchild_token.is_canceled());
    assert!(grandchild.dispatch(DONE.create(())).is_ok());
    assert!(root.dispatch(DONE.create(())).is_ok());
    assert_eq!(runtime.state().done, 2);
}

// ==========================================================================
// Failures
// ==========================================================================

async fn fails(_env: Environment<Board>, query: u32) -> Result<(), SagaError> {
    Err(anyhow::anyhow!("search {} failed", query).into())
}

async fn panics(_env: Environment<Board>, _query: u32) -> Result<(), SagaError> {
    panic!("saga panicked");
}

#[tokio::test]
async fn test_failing_instance_does_not_stop_runtime() {
    let runtime = SagaRuntime::builder(ReducerStore::new(board))
        .with_saga(Saga::every(SEARCH, fails))
        .with_saga(Saga::every(SEARCH, |env: Environment<Board>, query: u32| async move {
            env.dispatch(RESULT.create(query))?;
            Ok::<(), SagaError>(())
        }))
        .build();

    assert_eq!(runtime.saga_count(), 2);

    runtime.dispatch(SEARCH.create(4));
    settle(&runtime).await;

    assert_eq!(runtime.state().results, vec![4]);
    assert_eq!(runtime.running_count(), 0);
}

#[tokio::test]
async fn test_panicking_instance_is_cleaned_up() {
    let runtime = runtime_with(Saga::latest(SEARCH, panics));

    runtime.dispatch(SEARCH.create(1));
    settle(&runtime).await;

    assert_eq!(runtime.running_count(), 0);

    // The latest slot was cleared too; a new trigger starts normally.
    runtime.dispatch(SEARCH.create(2));
    settle(&runtime).await;
    assert_eq!(runtime.running_count(), 0);
}

// ==========================================================================
// Store
// ==========================================================================

#[tokio::test]
async fn test_dispatch_reduces_before_returning() {
    let runtime = runtime_with(Saga::every(SEARCH, gated_search));

    let returned = runtime.dispatch(RESULT.create(9));

    assert_eq!(returned, RESULT.create(9));
    assert_eq!(runtime.state().results, vec![9]);
}

#[tokio::test]
async fn test_runtime_layers_as_store() {
    let inner = runtime_with(Saga::every(SEARCH, |env: Environment<Board>, query: u32| async move {
        env.dispatch(RESULT.create(query * 10))?;
        Ok::<(), SagaError>(())
    }));
    let outer = SagaRuntime::builder(inner.clone())
        .with_saga(Saga::every(SEARCH, |env: Environment<Board>, query: u32| async move {
            env.dispatch(RESULT.create(query))?;
            Ok::<(), SagaError>(())
        }))
        .build();

    Store::dispatch(&outer, SEARCH.create(3));
    settle(&inner).await;
    settle(&outer).await;

    let mut results = outer.get_state().results.clone();
    results.sort_unstable();
    assert_eq!(results, vec![3, 30]);
}
