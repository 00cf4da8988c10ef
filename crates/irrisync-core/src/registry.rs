// ── Subscription registry ──
//
// Typed fan-out from one producer to any number of consumers, with
// identity-based handles. Two callbacks that look alike are not
// interchangeable: unsubscribe operates on the exact entry returned at
// subscribe time, which is what makes release-on-screen-exit reliable.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

/// Opaque token identifying one registered callback.
///
/// Holding the id does not keep the callback alive; dropping it
/// without unsubscribing leaks the registration (which is exactly the
/// bug the handle exists to make visible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Fan-out registry for one event type.
///
/// Dispatch is synchronous and in registration order. The entry list
/// is snapshotted before invocation, so the registry lock is never
/// held across user code and callbacks may subscribe/unsubscribe
/// freely from within a dispatch.
pub struct Registry<E> {
    entries: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
    next_id: AtomicU64,
}

impl<E> Registry<E> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback; every dispatched event reaches every
    /// currently registered callback.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove exactly the callback registered under `id`. Unknown or
    /// already-released handles are a no-op, never an error.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(entry_id, _)| *entry_id != id);
    }

    /// Deliver `event` to every registered callback, in registration
    /// order. A panicking callback is isolated: delivery continues to
    /// the remaining callbacks and the failure goes to the log, not to
    /// the dispatcher's caller.
    pub fn dispatch(&self, event: &E) {
        let snapshot: Vec<(SubscriptionId, Callback<E>)> = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(subscription = id.0, "subscriber callback panicked during dispatch");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl<E> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}
