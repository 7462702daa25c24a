//! Registry of workflows suspended in `take`.

use tokio::sync::oneshot;

use crate::message::Message;

/// A workflow waiting for the next message of one kind.
struct AwaitingMessage {
    kind: &'static str,
    resolve: oneshot::Sender<Message>,
}

/// Pending `take` waiters, in registration order.
///
/// Each store binding (the saga runtime, or one harness run) owns exactly one
/// of these; it is never shared across test runs.
#[derive(Default)]
pub(crate) struct AwaitingMessages {
    waiters: Vec<AwaitingMessage>,
}

impl AwaitingMessages {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `kind`. The receiver resolves with the first
    /// matching message dispatched after this call.
    pub(crate) fn register(&mut self, kind: &'static str) -> oneshot::Receiver<Message> {
        // Waiters whose workflow went away (cancelled, dropped) are pruned here.
        self.waiters.retain(|waiter| !waiter.resolve.is_closed());

        let (resolve, receiver) = oneshot::channel();
        self.waiters.push(AwaitingMessage { kind, resolve });
        receiver
    }

    /// Resolve and remove every waiter registered for `message`'s kind.
    ///
    /// Returns the number of live waiters that received the message.
    pub(crate) fn resolve(&mut self, message: &Message) -> usize {
        let mut resolved = 0;
        let mut remaining = Vec::with_capacity(self.waiters.len());

        for waiter in self.waiters.drain(..) {
            if waiter.kind == message.kind() {
                if waiter.resolve.send(message.clone()).is_ok() {
                    resolved += 1;
                }
            } else {
                remaining.push(waiter);
            }
        }

        self.waiters = remaining;
        resolved
    }

    /// Number of waiters whose workflow is still listening.
    pub(crate) fn len(&self) -> usize {
        self.waiters
            .iter()
            .filter(|waiter| !waiter.resolve.is_closed())
            .count()
    }
}

impl std::fmt::Debug for AwaitingMessages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwaitingMessages")
            .field("kinds", &self.waiters.iter().map(|w| w.kind).collect::<Vec<_>>())
            .finish()
    }
}
