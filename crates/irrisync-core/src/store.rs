// ── Device state store ──
//
// The single authoritative snapshot of all known devices. Mutations
// are serialized behind one mutex (single-writer discipline) and
// broadcast to subscribers via a `watch` channel; reads are wait-free
// borrows of the last rebuilt snapshot.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::debug;

use crate::model::{Device, PistonState};
use crate::stream::DeviceStream;

/// Authoritative, concurrency-safe snapshot of all known devices.
///
/// Devices are created or replaced wholesale by [`replace_all`]
/// (a successful full fetch) and patched incrementally by
/// [`apply_piston_update`] (push events, toggle confirmations). The
/// client never deletes a device on its own -- only absence from a
/// fetch removes one.
///
/// [`replace_all`]: DeviceStore::replace_all
/// [`apply_piston_update`]: DeviceStore::apply_piston_update
pub struct DeviceStore {
    /// Primary storage, keyed by device id, in server order.
    /// The mutex is never held across I/O or dispatch.
    devices: Mutex<IndexMap<String, Device>>,

    /// Full snapshot, rebuilt on every accepted mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<Device>>>>,

    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    last_push_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (last_full_refresh, _) = watch::channel(None);
        let (last_push_event, _) = watch::channel(None);

        Self {
            devices: Mutex::new(IndexMap::new()),
            snapshot,
            last_full_refresh,
            last_push_event,
        }
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Wholesale replace after a successful full fetch.
    ///
    /// Every enumerated piston is stamped with `fetch_seq` -- except
    /// pistons whose current version is strictly greater, which keep
    /// their newer state. That comparison (not arrival order) is what
    /// stops a slightly-delayed fetch from overwriting a push event
    /// that already confirmed a later action. Devices absent from the
    /// fetch are dropped.
    pub fn replace_all(&self, incoming: Vec<Device>, fetch_seq: u64) {
        let mut guard = self.devices.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut next: IndexMap<String, Device> = IndexMap::with_capacity(incoming.len());
        for mut device in incoming {
            let existing = guard.get(&device.id);
            for piston in &mut device.pistons {
                match existing.and_then(|d| d.piston(piston.number)) {
                    Some(current) if current.version > fetch_seq => {
                        // A later-sequenced fact already landed; the
                        // fetch captured pre-action state for this one.
                        *piston = current.clone();
                    }
                    _ => piston.version = fetch_seq,
                }
            }
            next.insert(device.id.clone(), device);
        }

        *guard = next;
        self.rebuild_snapshot(&guard);
        drop(guard);

        let _ = self.last_full_refresh.send(Some(Utc::now()));
    }

    /// Merge a single refetched device, leaving all other devices
    /// untouched. Piston stamping follows the same rule as
    /// [`replace_all`](Self::replace_all).
    pub fn upsert(&self, mut device: Device, fetch_seq: u64) {
        let mut guard = self.devices.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let existing = guard.get(&device.id);
        for piston in &mut device.pistons {
            match existing.and_then(|d| d.piston(piston.number)) {
                Some(current) if current.version > fetch_seq => {
                    *piston = current.clone();
                }
                _ => piston.version = fetch_seq,
            }
        }
        guard.insert(device.id.clone(), device);
        self.rebuild_snapshot(&guard);
    }

    /// Patch one piston if and only if `stamp` is strictly newer than
    /// its current version. Returns whether the store changed.
    ///
    /// Re-delivering the same event (equal stamp) or an older one is a
    /// no-op, which makes push application idempotent.
    pub fn apply_piston_update(
        &self,
        device_id: &str,
        piston_number: u32,
        new_state: PistonState,
        last_triggered: Option<DateTime<Utc>>,
        stamp: u64,
    ) -> bool {
        let mut guard = self.devices.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let Some(device) = guard.get_mut(device_id) else {
            debug!(device_id, "piston update for unknown device dropped");
            return false;
        };
        let Some(piston) = device.pistons.iter_mut().find(|p| p.number == piston_number) else {
            debug!(device_id, piston_number, "piston update for unknown piston dropped");
            return false;
        };

        if stamp <= piston.version {
            debug!(
                device_id,
                piston_number,
                stamp,
                current = piston.version,
                "stale piston update dropped"
            );
            return false;
        }

        piston.state = new_state;
        if last_triggered.is_some() {
            piston.last_triggered = last_triggered;
        }
        piston.version = stamp;

        self.rebuild_snapshot(&guard);
        drop(guard);

        let _ = self.last_push_event.send(Some(Utc::now()));
        true
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The current snapshot (cheap `Arc` clone; never partial).
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.snapshot.borrow().clone()
    }

    /// Look up one device in the current snapshot.
    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.snapshot
            .borrow()
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
    }

    pub fn device_count(&self) -> usize {
        self.snapshot.borrow().len()
    }

    /// Subscribe to snapshot changes. A late subscriber observes the
    /// current snapshot first, then one item per accepted mutation.
    pub fn changes(&self) -> DeviceStream {
        DeviceStream::new(self.snapshot.subscribe())
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_push_event(&self) -> Option<DateTime<Utc>> {
        *self.last_push_event.borrow()
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Collect the map into a snapshot vec and broadcast it. Called
    /// with the mutation lock held so snapshots are never partial.
    fn rebuild_snapshot(&self, devices: &IndexMap<String, Device>) {
        let values: Vec<Arc<Device>> = devices.values().cloned().map(Arc::new).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Piston;

    fn device(id: &str, pistons: Vec<(u32, PistonState)>) -> Device {
        Device {
            id: id.into(),
            name: format!("Device {id}"),
            pistons: pistons
                .into_iter()
                .map(|(number, state)| Piston {
                    number,
                    state,
                    last_triggered: None,
                    version: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn replace_then_patch_then_stale_patch() {
        // Fetch at seq 10, push at 11, then a stale push at 5 that
        // must not win.
        let store = DeviceStore::new();
        store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 10);

        assert!(store.apply_piston_update("d1", 1, PistonState::Active, None, 11));
        let snap = store.snapshot();
        assert_eq!(snap[0].piston(1).unwrap().state, PistonState::Active);
        assert_eq!(snap[0].piston(1).unwrap().version, 11);

        assert!(!store.apply_piston_update("d1", 1, PistonState::Inactive, None, 5));
        let snap = store.snapshot();
        assert_eq!(snap[0].piston(1).unwrap().state, PistonState::Active);
        assert_eq!(snap[0].piston(1).unwrap().version, 11);
    }

    #[test]
    fn duplicate_push_is_idempotent() {
        let store = DeviceStore::new();
        store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 1);

        assert!(store.apply_piston_update("d1", 1, PistonState::Active, None, 7));
        let after_first = store.snapshot();

        // Same event re-delivered: equal stamp, not strictly newer.
        assert!(!store.apply_piston_update("d1", 1, PistonState::Active, None, 7));
        assert_eq!(store.snapshot(), after_first);
    }

    #[test]
    fn out_of_order_updates_converge_on_highest_stamp() {
        // s1 < s2 delivered in either order must end at s2's state.
        for (first, second) in [((3, PistonState::Active), (8, PistonState::Inactive)),
                                ((8, PistonState::Inactive), (3, PistonState::Active))]
        {
            let store = DeviceStore::new();
            store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 1);

            store.apply_piston_update("d1", 1, first.1, None, first.0);
            store.apply_piston_update("d1", 1, second.1, None, second.0);

            let snap = store.snapshot();
            assert_eq!(snap[0].piston(1).unwrap().state, PistonState::Inactive);
            assert_eq!(snap[0].piston(1).unwrap().version, 8);
        }
    }

    #[test]
    fn delayed_fetch_does_not_clobber_newer_push() {
        let store = DeviceStore::new();
        store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 10);

        // Push confirming an action lands at seq 20...
        assert!(store.apply_piston_update("d1", 1, PistonState::Active, None, 20));

        // ...then a slow fetch that captured pre-action state arrives
        // with seq 15. The piston keeps the push's state.
        store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 15);

        let snap = store.snapshot();
        assert_eq!(snap[0].piston(1).unwrap().state, PistonState::Active);
        assert_eq!(snap[0].piston(1).unwrap().version, 20);
    }

    #[test]
    fn upsert_merges_one_device_and_keeps_newer_pistons() {
        let store = DeviceStore::new();
        store.replace_all(
            vec![
                device("d1", vec![(1, PistonState::Inactive)]),
                device("d2", vec![(1, PistonState::Inactive)]),
            ],
            1,
        );
        // A push lands on d1 piston 1 after the refetch was issued.
        store.apply_piston_update("d1", 1, PistonState::Active, None, 9);

        store.upsert(device("d1", vec![(1, PistonState::Inactive)]), 5);

        assert_eq!(store.device_count(), 2, "other devices must survive");
        let d1 = store.device("d1").unwrap();
        assert_eq!(d1.piston(1).unwrap().state, PistonState::Active);
        assert_eq!(d1.piston(1).unwrap().version, 9);
    }

    #[test]
    fn fetch_drops_absent_devices() {
        let store = DeviceStore::new();
        store.replace_all(
            vec![
                device("d1", vec![(1, PistonState::Inactive)]),
                device("d2", vec![(1, PistonState::Active)]),
            ],
            1,
        );
        assert_eq!(store.device_count(), 2);

        store.replace_all(vec![device("d2", vec![(1, PistonState::Active)])], 2);
        assert_eq!(store.device_count(), 1);
        assert!(store.device("d1").is_none());
    }

    #[test]
    fn update_for_unknown_device_or_piston_is_dropped() {
        let store = DeviceStore::new();
        store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 1);

        assert!(!store.apply_piston_update("nope", 1, PistonState::Active, None, 99));
        assert!(!store.apply_piston_update("d1", 42, PistonState::Active, None, 99));
        assert_eq!(store.snapshot()[0].piston(1).unwrap().version, 1);
    }

    #[tokio::test]
    async fn changes_stream_sees_current_then_mutations() {
        let store = DeviceStore::new();
        store.replace_all(vec![device("d1", vec![(1, PistonState::Inactive)])], 1);

        // Late subscriber: current snapshot arrives first.
        let mut stream = store.changes();
        let first = stream.changed().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].piston(1).unwrap().state, PistonState::Inactive);

        store.apply_piston_update("d1", 1, PistonState::Active, None, 5);
        let second = stream.changed().await.unwrap();
        assert_eq!(second[0].piston(1).unwrap().state, PistonState::Active);
    }
}
