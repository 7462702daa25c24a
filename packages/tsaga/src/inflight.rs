//! Inflight tracking for launched workflow instances and spawned tasks.
//!
//! The runtime and the test harness both need to know when every piece of
//! detached work they started has finished, without sleeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Notify;

/// Count of detached work items still running.
#[derive(Debug, Default)]
pub(crate) struct Inflight {
    count: AtomicUsize,
    notify: Notify,
}

impl Inflight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` on the tokio runtime, counted until it completes.
    pub(crate) fn launch(self: &Arc<Self>, work: BoxFuture<'static, ()>) {
        let guard = InflightGuard::enter(self.clone());
        tokio::spawn(async move {
            work.await;
            drop(guard);
        });
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Wait until no launched work remains.
    ///
    /// Returns immediately if nothing is running.
    pub(crate) async fn wait_idle(&self) {
        loop {
            // Register for notification BEFORE checking count
            let notified = self.notify.notified();

            if self.count() == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// RAII guard for one launched work item.
///
/// Decrements on drop, so panicking or aborted work is still accounted for.
pub(crate) struct InflightGuard {
    inflight: Arc<Inflight>,
}

impl InflightGuard {
    pub(crate) fn enter(inflight: Arc<Inflight>) -> Self {
        inflight.count.fetch_add(1, Ordering::AcqRel);
        Self { inflight }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let prev = self.inflight.count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            self.inflight.notify.notify_waiters();
        }
    }
}
