// ── Reconciliation ──
//
// Decides, for each incoming fact (REST fetch, push event, toggle
// confirmation), whether and how it updates the store. All facts are
// ordered by version stamp, never by arrival order, so the final state
// converges regardless of network reordering.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{Device, PistonState};
use crate::store::DeviceStore;

/// Process-wide monotonic stamp source.
///
/// Locally issued stamps (fetches, toggle confirmations) and
/// server-issued push timestamps (unix milliseconds) must be mutually
/// ordered, so `next()` returns `max(previous + 1, now_millis)` and
/// every observed push stamp advances the floor.
pub struct SyncClock {
    last: AtomicU64,
}

impl SyncClock {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Issue the next stamp, strictly greater than anything issued or
    /// observed before.
    pub fn next(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = (prev + 1).max(now);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Fold an externally issued stamp into the ordering floor, so the
    /// next locally issued stamp supersedes it.
    pub fn observe(&self, stamp: u64) {
        self.last.fetch_max(stamp, Ordering::SeqCst);
    }
}

impl Default for SyncClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Merges facts from both sources of truth into the [`DeviceStore`].
pub struct Reconciler {
    store: Arc<DeviceStore>,
    clock: Arc<SyncClock>,
}

impl Reconciler {
    pub fn new(store: Arc<DeviceStore>, clock: Arc<SyncClock>) -> Self {
        Self { store, clock }
    }

    /// Apply a full REST fetch: authoritative for every piston it
    /// enumerates, stamped with a fresh sequence number. Returns the
    /// stamp used.
    pub fn ingest_fetch(&self, devices: Vec<Device>) -> u64 {
        let seq = self.clock.next();
        debug!(seq, devices = devices.len(), "applying full fetch");
        self.store.replace_all(devices, seq);
        seq
    }

    /// Apply a single-device refetch, stamped like a full fetch but
    /// merged without disturbing other devices.
    pub fn ingest_device(&self, device: Device) -> u64 {
        let seq = self.clock.next();
        debug!(seq, device_id = %device.id, "applying single-device fetch");
        self.store.upsert(device, seq);
        seq
    }

    /// Apply one push event, using its server timestamp as the stamp.
    /// Stale and re-delivered events are dropped; returns whether the
    /// store changed.
    pub fn ingest_push(
        &self,
        device_id: &str,
        piston_number: u32,
        state: PistonState,
        timestamp_millis: u64,
    ) -> bool {
        // Keep the local clock ahead of the server's, so a fetch issued
        // after this event outranks it.
        self.clock.observe(timestamp_millis);

        let last_triggered = i64::try_from(timestamp_millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis);

        self.store
            .apply_piston_update(device_id, piston_number, state, last_triggered, timestamp_millis)
    }

    /// Apply a toggle confirmation returned by the REST API, treated
    /// like a push event but stamped locally by the coordinator's clock.
    pub fn ingest_toggle(
        &self,
        device_id: &str,
        piston_number: u32,
        state: PistonState,
        last_triggered: Option<DateTime<Utc>>,
    ) -> bool {
        let stamp = self.clock.next();
        debug!(device_id, piston_number, stamp, "applying toggle confirmation");
        self.store
            .apply_piston_update(device_id, piston_number, state, last_triggered, stamp)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Piston;

    fn seeded_store() -> Arc<DeviceStore> {
        let store = Arc::new(DeviceStore::new());
        store.replace_all(
            vec![Device {
                id: "d1".into(),
                name: "Garden".into(),
                pistons: vec![Piston {
                    number: 1,
                    state: PistonState::Inactive,
                    last_triggered: None,
                    version: 0,
                }],
            }],
            0,
        );
        store
    }

    #[test]
    fn clock_is_strictly_monotonic() {
        let clock = SyncClock::new();
        let a = clock.next();
        let b = clock.next();
        let c = clock.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn clock_jumps_past_observed_stamps() {
        let clock = SyncClock::new();
        let far_future = u64::MAX / 2;
        clock.observe(far_future);
        assert!(clock.next() > far_future);
    }

    #[test]
    fn fetch_after_push_supersedes_it() {
        let store = seeded_store();
        let clock = Arc::new(SyncClock::new());
        let reconciler = Reconciler::new(Arc::clone(&store), clock);

        // Push with an artificially huge server timestamp.
        let push_stamp = u64::MAX / 2;
        assert!(reconciler.ingest_push("d1", 1, PistonState::Active, push_stamp));

        // A fetch issued afterwards must still win.
        let seq = reconciler.ingest_fetch(vec![Device {
            id: "d1".into(),
            name: "Garden".into(),
            pistons: vec![Piston {
                number: 1,
                state: PistonState::Inactive,
                last_triggered: None,
                version: 0,
            }],
        }]);
        assert!(seq > push_stamp);

        let snap = store.snapshot();
        assert_eq!(snap[0].piston(1).unwrap().state, PistonState::Inactive);
    }

    #[test]
    fn redelivered_push_is_a_noop() {
        let store = seeded_store();
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::new(SyncClock::new()));

        assert!(reconciler.ingest_push("d1", 1, PistonState::Active, 1_000));
        assert!(!reconciler.ingest_push("d1", 1, PistonState::Active, 1_000));
        assert!(!reconciler.ingest_push("d1", 1, PistonState::Inactive, 900));

        assert_eq!(
            store.snapshot()[0].piston(1).unwrap().state,
            PistonState::Active
        );
    }

    #[test]
    fn toggle_confirmation_outranks_prior_state() {
        let store = seeded_store();
        let reconciler = Reconciler::new(Arc::clone(&store), Arc::new(SyncClock::new()));

        assert!(reconciler.ingest_toggle("d1", 1, PistonState::Active, None));
        assert_eq!(
            store.snapshot()[0].piston(1).unwrap().state,
            PistonState::Active
        );
    }
}
