//! Mocks consumed by the effect test harness.
//!
//! A mock says "when the workflow performs *this* effect, hand back *this*
//! value instead of running it". Mocks are built with the typed helpers below
//! so the recorded value always has the type the effect produces:
//!
//! ```ignore
//! use tsaga::mock::{calls_async, dispatches, selects};
//!
//! let mocks = vec![
//!     selects(text_longer_than_count).receiving(true),
//!     calls_async(api::post).receiving(200),
//!     dispatches(POSTED.create(())),
//! ];
//! ```
//!
//! Effects are matched by operation kind plus identity (the function item,
//! closure or bound effect type). Dispatch mocks match by message kind and
//! assert payload equality.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use tracing::debug;

use crate::effect::{Callable, Effect, EffectId, EffectKey, EffectKind, Selector, Workflow};
use crate::environment::{MockValue, ValueType};
use crate::error::HarnessError;
use crate::message::Message;

/// A type-erased value recorded for one effect.
pub struct MockedValue {
    value: MockValue,
    value_type: ValueType,
}

impl MockedValue {
    fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            value_type: ValueType::of::<T>(),
        }
    }

    /// Name of the recorded value's type.
    pub fn type_name(&self) -> &'static str {
        self.value_type.name
    }
}

impl fmt::Debug for MockedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.value_type.name)
    }
}

/// One expected effect and what it should produce.
#[derive(Debug)]
pub enum Mock {
    Call { func: EffectId, value: MockedValue },
    Select { selector: EffectId, value: MockedValue },
    Run { target: EffectId, value: MockedValue },
    Spawn { target: EffectId, value: MockedValue },
    Dispatch { message: Message },
}

impl Mock {
    pub fn kind(&self) -> EffectKind {
        match self {
            Mock::Call { .. } => EffectKind::Call,
            Mock::Select { .. } => EffectKind::Select,
            Mock::Run { .. } => EffectKind::Run,
            Mock::Spawn { .. } => EffectKind::Spawn,
            Mock::Dispatch { .. } => EffectKind::Dispatch,
        }
    }

    /// Lookup key for value mocks; `None` for dispatch mocks.
    pub fn key(&self) -> Option<EffectKey> {
        match self {
            Mock::Call { func: id, .. }
            | Mock::Select { selector: id, .. }
            | Mock::Run { target: id, .. }
            | Mock::Spawn { target: id, .. } => Some(EffectKey::new(self.kind(), *id)),
            Mock::Dispatch { .. } => None,
        }
    }

    /// Human-readable description used in failure reports.
    pub fn describe(&self) -> String {
        match (self, self.key()) {
            (Mock::Dispatch { message }, _) => {
                format!("dispatch({}, {})", message.kind(), message.payload_debug())
            }
            (mock, Some(key)) => match mock.value_type() {
                Some(value_type) => format!("{} -> {}", key, value_type.name),
                None => key.to_string(),
            },
            (mock, None) => mock.kind().to_string(),
        }
    }

    fn value_type(&self) -> Option<ValueType> {
        match self {
            Mock::Call { value, .. }
            | Mock::Select { value, .. }
            | Mock::Run { value, .. }
            | Mock::Spawn { value, .. } => Some(value.value_type),
            Mock::Dispatch { .. } => None,
        }
    }

    fn into_value(self) -> Option<MockValue> {
        match self {
            Mock::Call { value, .. }
            | Mock::Select { value, .. }
            | Mock::Run { value, .. }
            | Mock::Spawn { value, .. } => Some(value.value),
            Mock::Dispatch { .. } => None,
        }
    }
}

impl fmt::Display for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Ordered pool of live mocks. Each match removes exactly one entry.
#[derive(Debug, Default)]
pub(crate) struct MockPool {
    mocks: Vec<Mock>,
}

impl MockPool {
    pub(crate) fn new(mocks: Vec<Mock>) -> Self {
        Self { mocks }
    }

    /// Remove and return the value of the first mock matching `key`.
    ///
    /// A mock whose value has the wrong type is reported and stays in the pool.
    pub(crate) fn take_value(
        &mut self,
        key: &EffectKey,
        expects: ValueType,
    ) -> Result<Option<MockValue>, HarnessError> {
        let Some(index) = self.mocks.iter().position(|mock| mock.key() == Some(*key)) else {
            return Ok(None);
        };

        if let Some(found) = self.mocks[index].value_type() {
            if found.id != expects.id {
                return Err(HarnessError::MockTypeMismatch {
                    effect: key.to_string(),
                    expected: expects.name,
                    found: found.name,
                });
            }
        }

        debug!(effect = %key, "consumed mock");
        Ok(self.mocks.remove(index).into_value())
    }

    /// Consume the first dispatch mock for `message`'s kind.
    ///
    /// Returns `Ok(false)` when no dispatch mock has that kind. A payload
    /// mismatch is reported and the mock stays in the pool.
    pub(crate) fn take_dispatch(&mut self, message: &Message) -> Result<bool, HarnessError> {
        let found = self.mocks.iter().position(|mock| match mock {
            Mock::Dispatch { message: expected } => expected.kind() == message.kind(),
            _ => false,
        });
        let Some(index) = found else {
            return Ok(false);
        };

        if let Mock::Dispatch { message: expected } = &self.mocks[index] {
            if !expected.payload_eq(message) {
                return Err(HarnessError::PayloadMismatch {
                    kind: message.kind(),
                    expected: expected.payload_debug(),
                    actual: message.payload_debug(),
                });
            }
        }

        debug!(kind = message.kind(), "consumed dispatch mock");
        self.mocks.remove(index);
        Ok(true)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.mocks.len()
    }

    /// Descriptions of every remaining mock, in pool order.
    pub(crate) fn describe(&self) -> Vec<String> {
        self.mocks.iter().map(Mock::describe).collect()
    }
}

/// First half of a value mock: the effect is known, the value comes next.
#[must_use = "call .receiving(value) to build the mock"]
pub struct ValueMockBuilder<T> {
    id: EffectId,
    make: fn(EffectId, MockedValue) -> Mock,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ValueMockBuilder<T> {
    fn new(id: EffectId, make: fn(EffectId, MockedValue) -> Mock) -> Self {
        Self {
            id,
            make,
            _value: PhantomData,
        }
    }

    /// The value the effect produces under test.
    pub fn receiving(self, value: T) -> Mock {
        (self.make)(self.id, MockedValue::new(value))
    }
}

impl<T> fmt::Debug for ValueMockBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueMockBuilder").field(&self.id).finish()
    }
}

fn call_mock(func: EffectId, value: MockedValue) -> Mock {
    Mock::Call { func, value }
}

fn select_mock(selector: EffectId, value: MockedValue) -> Mock {
    Mock::Select { selector, value }
}

fn run_mock(target: EffectId, value: MockedValue) -> Mock {
    Mock::Run { target, value }
}

fn spawn_mock(target: EffectId, value: MockedValue) -> Mock {
    Mock::Spawn { target, value }
}

/// Mock a synchronous `env.call(f, ..)`.
pub fn calls<F, A>(_f: F) -> ValueMockBuilder<F::Output>
where
    F: Callable<A>,
    F::Output: Send + 'static,
{
    ValueMockBuilder::new(EffectId::of::<F>(), call_mock)
}

/// Mock an `env.call_async(f, ..)`. The value is the awaited output.
pub fn calls_async<F, A>(_f: F) -> ValueMockBuilder<<F::Output as Future>::Output>
where
    F: Callable<A>,
    F::Output: Future,
    <F::Output as Future>::Output: Send + 'static,
{
    ValueMockBuilder::new(EffectId::of::<F>(), call_mock)
}

/// Mock an `env.select(selector, ..)`.
pub fn selects<F, S, A>(_selector: F) -> ValueMockBuilder<F::Output>
where
    F: Selector<S, A>,
    F::Output: Send + 'static,
{
    ValueMockBuilder::new(EffectId::of::<F>(), select_mock)
}

/// Mock an `env.run(workflow, ..)`.
pub fn runs<F, S, A>(_workflow: F) -> ValueMockBuilder<F::Output>
where
    F: Workflow<S, A>,
{
    ValueMockBuilder::new(EffectId::of::<F>(), run_mock)
}

/// Mock an `env.run_effect(..)` for any value of the effect's type.
pub fn runs_effect<E, S>(_effect: &E) -> ValueMockBuilder<E::Output>
where
    E: Effect<S>,
    S: Send + Sync + 'static,
{
    ValueMockBuilder::new(EffectId::bound::<E>(), run_mock)
}

/// Mock an `env.spawn(workflow, ..)`. The value becomes the task's result.
pub fn spawns<F, S, A>(_workflow: F) -> ValueMockBuilder<F::Output>
where
    F: Workflow<S, A>,
{
    ValueMockBuilder::new(EffectId::of::<F>(), spawn_mock)
}

/// Mock an `env.spawn_effect(..)` for any value of the effect's type.
pub fn spawns_effect<E, S>(_effect: &E) -> ValueMockBuilder<E::Output>
where
    E: Effect<S>,
    S: Send + Sync + 'static,
{
    ValueMockBuilder::new(EffectId::bound::<E>(), spawn_mock)
}

/// Expect `env.dispatch(..)` of a message equal to `message`.
///
/// The dispatched message still goes through the reducer.
pub fn dispatches(message: Message) -> Mock {
    Mock::Dispatch { message }
}
