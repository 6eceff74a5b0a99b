// ── Central device state store ──
//
// Thread-safe storage for every device the bridge knows. Writes merge
// partial updates field-wise under the DashMap shard lock for that id;
// each real change is broadcast as a `StateChange` and the sorted
// snapshot is republished on a `watch` channel.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use vitrea_api::Push;

use super::reconcile;
use crate::catalog::CatalogEntry;
use crate::model::{Device, DeviceId, DeviceKind, DeviceState};
use crate::stream::{ChangeStream, DeviceStream};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// One device's state moved from `old` to `new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub id: DeviceId,
    /// `None` when the device was just created.
    pub old: Option<Arc<Device>>,
    pub new: Arc<Device>,
}

pub struct DeviceStore {
    devices: DashMap<DeviceId, Arc<Device>>,
    snapshot: watch::Sender<Arc<Vec<Arc<Device>>>>,
    changes: broadcast::Sender<StateChange>,
    last_resync: watch::Sender<Option<DateTime<Utc>>>,
    /// Ids touched since `begin_resync`; `None` outside a resync.
    resync_seen: Mutex<Option<HashSet<DeviceId>>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (last_resync, _) = watch::channel(None);

        Self {
            devices: DashMap::new(),
            snapshot,
            changes,
            last_resync,
            resync_seen: Mutex::new(None),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.devices.get(id).map(|d| Device::clone(d.value()))
    }

    pub fn kind_of(&self, id: &DeviceId) -> Option<DeviceKind> {
        self.devices.get(id).map(|d| d.kind)
    }

    /// Every known device, sorted by id.
    pub fn list_devices(&self) -> Vec<(DeviceId, DeviceKind)> {
        self.snapshot()
            .iter()
            .map(|device| (device.id, device.kind))
            .collect()
    }

    pub fn ids_of_kind(&self, kind: DeviceKind) -> Vec<DeviceId> {
        self.snapshot()
            .iter()
            .filter(|device| device.kind == kind)
            .map(|device| device.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Current snapshot, sorted by id (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.snapshot.borrow().clone()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn changes(&self) -> ChangeStream {
        ChangeStream::new(self.changes.subscribe())
    }

    pub fn subscribe_devices(&self) -> DeviceStream {
        DeviceStream::new(self.snapshot.subscribe())
    }

    /// Completion time of the most recent resync.
    pub fn resyncs(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_resync.subscribe()
    }

    pub fn last_resync(&self) -> Option<DateTime<Utc>> {
        *self.last_resync.borrow()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Merges a push into the addressed device. Returns whether any
    /// state changed.
    pub fn apply_push(&self, push: &Push) -> bool {
        let Some(id) = reconcile::push_target(push) else {
            return false;
        };
        let current = self.devices.get(&id).map(|d| (d.kind, d.provisional));
        let known = match (current, push) {
            (Some((kind, true)), Push::Key { status, .. }) => {
                Some(reconcile::refine_kind(kind, *status))
            }
            (Some((kind, _)), _) => Some(kind),
            (None, _) => id.implied_kind(),
        };
        match reconcile::push_delta(push, known) {
            Some(delta) => self.apply_delta(id, &delta),
            None => {
                tracing::debug!(%id, ?push, "Push carries nothing for this device");
                false
            }
        }
    }

    /// Applies a locally derived delta, e.g. a cover starting to move
    /// after an accepted command. Unknown ids become provisional entries.
    pub fn apply_local(&self, id: DeviceId, delta: &DeviceState) -> bool {
        self.apply_delta(id, delta)
    }

    /// Inserts catalog entries. Catalog data is authoritative for names
    /// and kinds; existing state is kept when the kind matches.
    pub fn register(&self, entries: &[CatalogEntry]) {
        let mut emitted = Vec::new();
        for entry in entries {
            let change = match self.devices.entry(entry.id) {
                Entry::Occupied(mut slot) => {
                    let current = slot.get();
                    let state = if current.kind == entry.kind {
                        current.state.clone()
                    } else {
                        tracing::debug!(
                            id = %entry.id,
                            inferred = %current.kind,
                            actual = %entry.kind,
                            "Catalog corrects inferred kind"
                        );
                        DeviceState::unknown(entry.kind)
                    };
                    let new = Device {
                        id: entry.id,
                        kind: entry.kind,
                        name: Some(entry.name.clone()),
                        room: entry.room.clone(),
                        state,
                        provisional: false,
                        updated_at: current.updated_at,
                    };
                    if **current == new {
                        continue;
                    }
                    let new = Arc::new(new);
                    let old = slot.insert(Arc::clone(&new));
                    StateChange {
                        id: entry.id,
                        old: Some(old),
                        new,
                    }
                }
                Entry::Vacant(slot) => {
                    let new = Arc::new(Device {
                        id: entry.id,
                        kind: entry.kind,
                        name: Some(entry.name.clone()),
                        room: entry.room.clone(),
                        state: DeviceState::unknown(entry.kind),
                        provisional: false,
                        updated_at: None,
                    });
                    slot.insert(Arc::clone(&new));
                    StateChange {
                        id: entry.id,
                        old: None,
                        new,
                    }
                }
            };
            emitted.push(change);
        }

        if emitted.is_empty() {
            return;
        }
        tracing::debug!(registered = emitted.len(), "Catalog entries stored");
        self.rebuild_snapshot();
        for change in emitted {
            let _ = self.changes.send(change);
        }
    }

    /// Opens a resync window. Devices touched until
    /// [`finish_resync`](Self::finish_resync) are confirmed.
    pub fn begin_resync(&self) {
        *lock(&self.resync_seen) = Some(HashSet::new());
    }

    /// Closes the window, confirms every device that reported a status
    /// fitting its kind during it and publishes the resync time. Returns how many provisional devices were confirmed.
    pub fn finish_resync(&self) -> usize {
        let seen = lock(&self.resync_seen).take().unwrap_or_default();

        let mut confirmed = 0;
        for id in &seen {
            if let Some(mut device) = self.devices.get_mut(id) {
                if device.provisional {
                    let mut updated = Device::clone(&device);
                    updated.provisional = false;
                    *device = Arc::new(updated);
                    confirmed += 1;
                }
            }
        }
        if confirmed > 0 {
            self.rebuild_snapshot();
        }

        let now = Utc::now();
        self.last_resync.send_replace(Some(now));
        tracing::debug!(seen = seen.len(), confirmed, "Resync complete");
        confirmed
    }

    /// Provisional keys not heard from since
    /// [`begin_resync`](Self::begin_resync), as `(node, key)`.
    pub fn unseen_provisional_keys(&self) -> Vec<(u16, u8)> {
        let seen = lock(&self.resync_seen);
        self.snapshot()
            .iter()
            .filter(|device| device.provisional)
            .filter(|device| !seen.as_ref().is_some_and(|ids| ids.contains(&device.id)))
            .filter_map(|device| match device.id {
                DeviceId::Key { node, key } => Some((node, key)),
                _ => None,
            })
            .collect()
    }

    /// Drops an open resync window without publishing anything.
    pub fn abort_resync(&self) {
        lock(&self.resync_seen).take();
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Merges `delta` into `id`. A delta of another kind re-kinds a
    /// provisional device and is dropped for a confirmed one; only devices
    /// whose kind fits the delta count as seen by an open resync.
    fn apply_delta(&self, id: DeviceId, delta: &DeviceState) -> bool {
        let now = Utc::now();

        let change = match self.devices.entry(id) {
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                let kind = delta.kind();
                let (mut state, rekinded) = if current.kind == kind {
                    (current.state.clone(), false)
                } else if current.provisional {
                    tracing::debug!(
                        %id,
                        from = %current.kind,
                        to = %kind,
                        "Refined provisional kind"
                    );
                    (current.state.rekind(kind), true)
                } else {
                    tracing::debug!(
                        %id,
                        kind = %current.kind,
                        delta = %kind,
                        "Dropped delta of another kind"
                    );
                    return false;
                };
                self.note_seen(id);
                let merged = state.merge(delta);
                if !merged && !rekinded {
                    return false;
                }
                let new = Arc::new(Device {
                    kind,
                    state,
                    updated_at: Some(now),
                    ..Device::clone(current)
                });
                let old = slot.insert(Arc::clone(&new));
                StateChange {
                    id,
                    old: Some(old),
                    new,
                }
            }
            Entry::Vacant(slot) => {
                self.note_seen(id);
                let kind = delta.kind();
                let mut state = DeviceState::unknown(kind);
                state.merge(delta);
                tracing::debug!(%id, %kind, "Learned provisional device");
                let new = Arc::new(Device {
                    id,
                    kind,
                    name: None,
                    room: None,
                    state,
                    provisional: true,
                    updated_at: Some(now),
                });
                slot.insert(Arc::clone(&new));
                StateChange { id, old: None, new }
            }
        };

        self.rebuild_snapshot();
        let _ = self.changes.send(change);
        true
    }

    fn note_seen(&self, id: DeviceId) {
        if let Some(seen) = lock(&self.resync_seen).as_mut() {
            seen.insert(id);
        }
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<Device>> =
            self.devices.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by_key(|device| device.id);
        // `send_replace` updates even with zero receivers.
        self.snapshot.send_replace(Arc::new(values));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
