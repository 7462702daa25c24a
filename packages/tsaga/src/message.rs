//! Messages and message creators.
//!
//! A [`Message`] is a type tag plus a type-erased payload. Reducers, `take`
//! and dispatch mocks identify messages by their tag through a typed
//! [`MessageCreator`].
//!
//! ```ignore
//! pub const INCREMENT: MessageCreator<i64> = MessageCreator::new("counter/INCREMENT");
//!
//! let message = INCREMENT.create(5);
//! assert!(is_type(&message, &INCREMENT));
//! assert_eq!(INCREMENT.payload_of(&message), Some(&5));
//! ```

use std::any::{type_name, Any};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type tag of the message the store receives once on construction.
pub const SETUP_KIND: &str = "@@tsaga/INTERNAL_SETUP";

/// A value that can ride inside a [`Message`].
///
/// **Note**: This trait is automatically implemented for any type that is
/// `Clone + PartialEq + Debug + Send + Sync + 'static`.
pub trait Payload: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static> Payload for T {}

/// Object-safe view of a payload: downcasting plus deep equality.
trait ErasedPayload: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn eq_erased(&self, other: &dyn ErasedPayload) -> bool;
}

impl<T: Payload> ErasedPayload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_erased(&self, other: &dyn ErasedPayload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }
}

/// A dispatched message: type tag plus payload.
///
/// Cloning is cheap; the payload is shared.
#[derive(Clone)]
pub struct Message {
    kind: &'static str,
    payload: Arc<dyn ErasedPayload>,
}

impl Message {
    /// Build a message directly from a tag and payload.
    ///
    /// Prefer [`MessageCreator::create`], which keeps tag and payload type together.
    pub fn new<P: Payload>(kind: &'static str, payload: P) -> Self {
        Self {
            kind,
            payload: Arc::new(payload),
        }
    }

    /// The internal message used to obtain a reducer's initial state.
    pub fn setup() -> Self {
        Self::new(SETUP_KIND, ())
    }

    /// The message's type tag.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Downcast the payload.
    pub fn payload<P: Any>(&self) -> Option<&P> {
        self.payload.as_any().downcast_ref()
    }

    /// Deep equality of payloads, ignoring the tag.
    pub fn payload_eq(&self, other: &Message) -> bool {
        self.payload.eq_erased(other.payload.as_ref())
    }

    /// Debug rendering of the payload alone.
    pub fn payload_debug(&self) -> String {
        format!("{:?}", self.payload)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.payload_eq(other)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Typed constructor and matcher for one message kind.
///
/// Creators are `const`-constructible so they can live as module constants
/// shared by reducers, sagas and tests.
pub struct MessageCreator<P> {
    kind: &'static str,
    _payload: PhantomData<fn() -> P>,
}

impl<P> MessageCreator<P> {
    /// Create a creator for the given type tag.
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            _payload: PhantomData,
        }
    }

    /// The type tag this creator produces and matches.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Returns true if `message` carries this creator's tag.
    pub fn matches(&self, message: &Message) -> bool {
        message.kind == self.kind
    }
}

impl<P: Payload> MessageCreator<P> {
    /// Build a message with this creator's tag.
    pub fn create(&self, payload: P) -> Message {
        Message::new(self.kind, payload)
    }

    /// The typed payload, if `message` was produced by this creator.
    pub fn payload_of<'a>(&self, message: &'a Message) -> Option<&'a P> {
        if self.matches(message) {
            message.payload()
        } else {
            None
        }
    }

    /// Name of the payload type, for diagnostics.
    pub fn payload_type(&self) -> &'static str {
        type_name::<P>()
    }
}

impl<P> Clone for MessageCreator<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for MessageCreator<P> {}

impl<P> fmt::Debug for MessageCreator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageCreator").field(&self.kind).finish()
    }
}

/// Returns true if `message` was produced by `creator` (same type tag).
pub fn is_type<P>(message: &Message, creator: &MessageCreator<P>) -> bool {
    creator.matches(message)
}
