// ── Request coordinator ──
//
// Turns REST calls into an observable result stream per logical
// operation. Every issued request gets a monotonic sequence number;
// only the latest-issued request for a slot may publish its result, so
// a slow superseded call can never clobber a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::error::{CoreError, FailureKind};

/// Lifecycle of one logical request stream.
///
/// Transitions only `Idle -> Loading -> {Success, Error}`; a fresh
/// request restarts at `Loading` regardless of the previous terminal
/// state. Failures are values -- nothing throws past this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestResult<T> {
    Idle,
    Loading,
    Success(T),
    Error { kind: FailureKind, message: String },
}

impl<T> RequestResult<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// One logical operation slot (devices list, single device, toggle,
/// schedules). Consumers observe it through a `watch` receiver;
/// dropping the receiver is how a departing screen abandons interest
/// in an in-flight request -- the request keeps running, its result is
/// simply never observed.
pub struct RequestSlot<T> {
    issued: AtomicU64,
    /// Highest sequence number that has published any state. All
    /// publications go through this lock, so a request preempted
    /// between issuance and its `Loading` emission can never clobber a
    /// newer request's result.
    published: Mutex<u64>,
    tx: watch::Sender<RequestResult<T>>,
}

impl<T: Clone + Send + Sync + 'static> RequestSlot<T> {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(RequestResult::Idle);
        Arc::new(Self {
            issued: AtomicU64::new(0),
            published: Mutex::new(0),
            tx,
        })
    }

    /// Subscribe to this slot's result stream. A new subscriber sees
    /// the current state immediately.
    pub fn subscribe(&self) -> watch::Receiver<RequestResult<T>> {
        self.tx.subscribe()
    }

    /// The current state, without subscribing.
    pub fn latest(&self) -> RequestResult<T> {
        self.tx.borrow().clone()
    }

    /// Issue a request: assign the next sequence number, emit `Loading`
    /// immediately, and spawn the future. Returns the sequence number.
    pub fn execute<Fut>(self: &Arc<Self>, fut: Fut) -> u64
    where
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        self.execute_with(fut, |_| {})
    }

    /// Like [`execute`](Self::execute), but runs `on_success` before
    /// publishing a successful result -- and only when the result is
    /// still current. The session uses this to route fetch and toggle
    /// payloads through the reconciler without racing superseded calls.
    pub fn execute_with<Fut, S>(self: &Arc<Self>, fut: Fut, on_success: S) -> u64
    where
        Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
        S: FnOnce(&T) + Send + 'static,
    {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish_loading(seq);

        let slot = Arc::clone(self);
        tokio::spawn(async move {
            let result = fut.await;
            slot.complete(seq, result, on_success);
        });

        seq
    }

    /// Emit `Loading` for `seq` unless a newer sequence has already
    /// published; a stale `Loading` is dropped like a stale result.
    fn publish_loading(&self, seq: u64) {
        let mut published = self
            .published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if seq < *published {
            debug!(seq, "dropping superseded loading emission");
            return;
        }
        *published = seq;
        self.tx.send_replace(RequestResult::Loading);
    }

    /// Publish a completed result if it is still the latest issued;
    /// otherwise drop it silently (superseded -- never user-visible).
    fn complete<S: FnOnce(&T)>(&self, seq: u64, result: Result<T, CoreError>, on_success: S) {
        let mut published = self
            .published
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if self.issued.load(Ordering::SeqCst) != seq {
            debug!(seq, "dropping superseded request result");
            return;
        }
        *published = seq;

        match result {
            Ok(value) => {
                on_success(&value);
                self.tx.send_replace(RequestResult::Success(value));
            }
            Err(e) => {
                self.tx.send_replace(RequestResult::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }
}
