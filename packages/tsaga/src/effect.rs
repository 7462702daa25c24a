//! Effect identity and the capability traits the environment interprets.
//!
//! Workflow code never runs side effects directly. It hands a function, a
//! selector, a workflow or a bound [`Effect`] to the [`Environment`], which
//! decides whether to run it for real or to substitute a recorded value.
//!
//! # Identity
//!
//! Every function item and closure in Rust has its own type, so an effect is
//! identified by the [`TypeId`] of the value handed to the environment. The
//! same function passed to a mock builder and to the environment produces the
//! same [`EffectId`]. Function *pointers* (`fn(u32) -> u32`) erase that
//! identity; pass the function item itself.
//!
//! # Arguments
//!
//! Arguments are passed as a tuple, `()` for none:
//!
//! ```ignore
//! let status = env.call_async(fetch_status, ("https://example.com",)).await?;
//! let total = env.call(add, (1, 2))?;
//! let long = env.select(text_longer_than_count, ("sample",))?;
//! let child = env.run(reload_profile, (user_id,)).await?;
//! ```

use std::any::{type_name, TypeId};
use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use crate::environment::Environment;
use crate::error::SagaError;

/// Discriminant of an effect operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Call,
    Select,
    Run,
    Spawn,
    Dispatch,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectKind::Call => write!(f, "call"),
            EffectKind::Select => write!(f, "select"),
            EffectKind::Run => write!(f, "run"),
            EffectKind::Spawn => write!(f, "spawn"),
            EffectKind::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// What a `run`/`spawn` target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// A plain function taking the environment and arguments.
    Function,
    /// A value implementing [`Effect`].
    Bound,
}

/// Identity of a function, selector, workflow or bound effect type.
///
/// Equality is by `TypeId`; the name is kept for diagnostics.
#[derive(Clone, Copy)]
pub struct EffectId {
    type_id: TypeId,
    name: &'static str,
    target: Target,
}

impl EffectId {
    /// Identity of a function item, closure or selector.
    pub fn of<F: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<F>(),
            name: type_name::<F>(),
            target: Target::Function,
        }
    }

    /// Identity of a bound effect type.
    pub fn bound<E: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: type_name::<E>(),
            target: Target::Bound,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn target(&self) -> Target {
        self.target
    }
}

impl PartialEq for EffectId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EffectId {}

impl fmt::Debug for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Lookup key for substitution: operation kind plus target identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectKey {
    pub kind: EffectKind,
    pub id: EffectId,
}

impl EffectKey {
    pub fn new(kind: EffectKind, id: EffectId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// A function the environment can `call`.
///
/// Implemented for every `FnOnce` of arity 0 to 4, with the arguments packed
/// in a tuple.
pub trait Callable<Args>: 'static {
    type Output;

    fn invoke(self, args: Args) -> Self::Output;
}

/// A selector the environment can apply to the current state.
///
/// Implemented for every `FnOnce(&S, ..)` of extra arity 0 to 4.
pub trait Selector<S, Args>: 'static {
    type Output;

    fn select(self, state: &S, args: Args) -> Self::Output;
}

/// A workflow function the environment can `run` or `spawn`.
///
/// Implemented for every `FnOnce(Environment<S>, ..) -> impl Future<Output = Result<T, SagaError>>`
/// of extra arity 0 to 4, which covers plain `async fn`s taking the
/// environment first.
pub trait Workflow<S, Args>: Send + 'static {
    type Output: Send + 'static;
    type Future: Future<Output = Result<Self::Output, SagaError>> + Send + 'static;

    fn start(self, env: Environment<S>, args: Args) -> Self::Future;
}

macro_rules! impl_capabilities {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Callable<($($arg,)*)> for F
        where
            F: FnOnce($($arg),*) -> R + 'static,
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn invoke(self, ($($arg,)*): ($($arg,)*)) -> R {
                (self)($($arg),*)
            }
        }

        impl<S, F, R, $($arg,)*> Selector<S, ($($arg,)*)> for F
        where
            F: FnOnce(&S, $($arg),*) -> R + 'static,
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn select(self, state: &S, ($($arg,)*): ($($arg,)*)) -> R {
                (self)(state, $($arg),*)
            }
        }

        impl<S, F, Fut, T, $($arg,)*> Workflow<S, ($($arg,)*)> for F
        where
            F: FnOnce(Environment<S>, $($arg),*) -> Fut + Send + 'static,
            Fut: Future<Output = Result<T, SagaError>> + Send + 'static,
            T: Send + 'static,
        {
            type Output = T;
            type Future = Fut;

            #[allow(non_snake_case)]
            fn start(self, env: Environment<S>, ($($arg,)*): ($($arg,)*)) -> Fut {
                (self)(env, $($arg),*)
            }
        }
    };
}

impl_capabilities!();
impl_capabilities!(A1);
impl_capabilities!(A1, A2);
impl_capabilities!(A1, A2, A3);
impl_capabilities!(A1, A2, A3, A4);

/// A reusable effect that carries its own arguments.
///
/// Bound effects are identified by their type: a mock registered with
/// `runs_effect::<FetchProfile>()` substitutes any `FetchProfile` value.
///
/// # Example
///
/// ```ignore
/// struct FetchProfile {
///     user_id: u32,
/// }
///
/// #[async_trait]
/// impl Effect<AppState> for FetchProfile {
///     type Output = Profile;
///
///     async fn run(self, env: Environment<AppState>) -> Result<Profile, SagaError> {
///         let profile = env.call_async(api::profile, (self.user_id,)).await?;
///         env.dispatch(PROFILE_LOADED.create(profile.clone()))?;
///         Ok(profile)
///     }
/// }
///
/// let profile = env.run_effect(FetchProfile { user_id: 1 }).await?;
/// ```
#[async_trait]
pub trait Effect<S: Send + Sync + 'static>: Send + 'static {
    type Output: Send + 'static;

    async fn run(self, env: Environment<S>) -> Result<Self::Output, SagaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(n: u32) -> u32 {
        n * 2
    }

    fn triple(n: u32) -> u32 {
        n * 3
    }

    fn add(a: i32, b: i32) -> i32 {
        a + b
    }

    fn answer() -> u8 {
        42
    }

    fn len_plus(state: &String, extra: usize) -> usize {
        state.len() + extra
    }

    fn id_of<F: 'static>(_: &F) -> EffectId {
        EffectId::of::<F>()
    }

    #[test]
    fn test_callable_arities() {
        assert_eq!(answer.invoke(()), 42);
        assert_eq!(double.invoke((4,)), 8);
        assert_eq!(add.invoke((2, 3)), 5);
        assert_eq!((|a: u8, b: u8, c: u8| a + b + c).invoke((1, 2, 3)), 6);
    }

    #[test]
    fn test_selector_receives_state_first() {
        let state = String::from("abc");
        assert_eq!(len_plus.select(&state, (2,)), 5);
        assert_eq!((|s: &String| s.len()).select(&state, ()), 3);
    }

    #[test]
    fn test_identity_distinguishes_functions() {
        assert_eq!(id_of(&double), id_of(&double));
        assert_ne!(id_of(&double), id_of(&triple));
    }

    #[test]
    fn test_identity_names_the_function() {
        assert!(id_of(&double).name().ends_with("double"));
        assert_eq!(id_of(&double).target(), Target::Function);
    }

    #[test]
    fn test_effect_key_display() {
        let key = EffectKey::new(EffectKind::Call, id_of(&answer));
        assert!(key.to_string().starts_with("call("));
        assert!(key.to_string().contains("answer"));
    }
}
