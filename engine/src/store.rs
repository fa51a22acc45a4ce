//! View Store - the in-memory container for every view.
//!
//! The store maps a [`ViewKey`] to the current value of that view. Each key
//! owns a slot with its own lock, so writes to one key are serialized while
//! writes to different keys never contend. Steps that must touch several
//! views at once lock all of their slots in key order through [`ViewStore::batch`].

use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::{error::Result, Error, Revision, View, ViewKey, ViewValues, ViewWrites};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why a view was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteOrigin {
    /// Loaded from the remote API
    Fetch,
    /// Written directly by the application
    Local,
    /// Speculative value of an in-flight mutation
    Speculative,
    /// Authoritative value from a committed mutation
    Reconciled,
    /// Rolled back after a failed mutation
    Restored,
    /// Flagged stale
    Invalidated,
    /// Dropped by [`ViewStore::clear`]
    Cleared,
}

impl WriteOrigin {
    /// Whether writes of this origin carry server-confirmed data.
    pub fn is_authoritative(self) -> bool {
        matches!(self, WriteOrigin::Fetch | WriteOrigin::Reconciled)
    }
}

/// Change notification for store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: ViewKey,
    /// Slot revision after the write
    pub revision: Revision,
    pub origin: WriteOrigin,
}

/// Storage slot for one view key.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    value: Option<Arc<View>>,
    /// Incremented on every write
    revision: Revision,
    /// Revision of the latest authoritative write
    authoritative_revision: Revision,
}

/// The store holding every view.
///
/// Thread-safe and meant to be shared via `Arc` with the executor and the
/// application that renders the views.
#[derive(Debug)]
pub struct ViewStore {
    slots: DashMap<ViewKey, Arc<Mutex<Slot>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            slots: DashMap::new(),
            events,
        }
    }

    /// Create an empty store wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn slot(&self, key: &ViewKey) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }
        self.slots.entry(key.clone()).or_default().clone()
    }

    /// Get the current value of a view, or `None` if it was never loaded.
    pub fn get(&self, key: &ViewKey) -> Option<Arc<View>> {
        let slot = self.slots.get(key)?;
        let value = slot.lock().value.clone();
        value
    }

    /// Get the current value of a view, failing if it was never loaded.
    pub fn require(&self, key: &ViewKey) -> Result<Arc<View>> {
        self.get(key).ok_or_else(|| Error::StaleView(key.clone()))
    }

    /// Current revision of a view's slot (0 if never written).
    pub fn revision(&self, key: &ViewKey) -> Revision {
        let Some(slot) = self.slots.get(key) else {
            return 0;
        };
        let revision = slot.lock().revision;
        revision
    }

    /// Revision of the latest authoritative write to a view (0 if none).
    pub fn authoritative_revision(&self, key: &ViewKey) -> Revision {
        let Some(slot) = self.slots.get(key) else {
            return 0;
        };
        let revision = slot.lock().authoritative_revision;
        revision
    }

    /// Store an authoritative value, as fetched from the remote API.
    pub fn set(&self, key: ViewKey, view: View) -> Revision {
        self.batch(std::slice::from_ref(&key), |batch| {
            batch.write(&key, Some(Arc::new(view)), WriteOrigin::Fetch)
        })
    }

    /// Replace a view's value with `f(current)`.
    ///
    /// Runs under the key's lock, so concurrent updates of the same key are
    /// applied one after another. Returning `None` unloads the view.
    pub fn update<F>(&self, key: &ViewKey, f: F) -> Revision
    where
        F: FnOnce(Option<&View>) -> Option<View>,
    {
        self.batch(std::slice::from_ref(key), |batch| {
            let next = f(batch.get(key).as_deref());
            batch.write(key, next.map(Arc::new), WriteOrigin::Local)
        })
    }

    /// Replace several views as one atomic step.
    ///
    /// `f` sees the current values of every key in `keys` and returns the new
    /// values; keys it leaves out keep theirs. Values for keys outside `keys`
    /// are dropped.
    pub fn update_many<F>(&self, keys: &[ViewKey], f: F) -> Vec<(ViewKey, Revision)>
    where
        F: FnOnce(&ViewValues) -> ViewWrites,
    {
        self.batch(keys, |batch| {
            let current: ViewValues = keys.iter().map(|key| (key.clone(), batch.get(key))).collect();
            let writes: Vec<(ViewKey, View)> = f(&current)
                .into_iter()
                .filter(|(key, _)| batch.holds(key))
                .collect();
            writes
                .into_iter()
                .map(|(key, view)| {
                    let revision = batch.write(&key, Some(Arc::new(view)), WriteOrigin::Local);
                    (key, revision)
                })
                .collect()
        })
    }

    /// Mark a view stale so the next load refetches it.
    ///
    /// Absent views stay absent.
    pub fn invalidate(&self, key: &ViewKey) {
        self.batch(std::slice::from_ref(key), |batch| {
            if let Some(view) = batch.get(key) {
                if !view.is_stale() {
                    batch.write(key, Some(Arc::new(view.marked_stale())), WriteOrigin::Invalidated);
                }
            }
        });
    }

    /// Keys of every loaded view.
    pub fn keys(&self) -> Vec<ViewKey> {
        let mut keys: Vec<ViewKey> = self
            .slots
            .iter()
            .filter(|entry| {
                let loaded = entry.value().lock().value.is_some();
                loaded
            })
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Keys of every loaded view flagged stale.
    pub fn stale_keys(&self) -> Vec<ViewKey> {
        let mut keys: Vec<ViewKey> = self
            .slots
            .iter()
            .filter(|entry| {
                let stale = entry
                    .value()
                    .lock()
                    .value
                    .as_ref()
                    .is_some_and(|view| view.is_stale());
                stale
            })
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Unload every view (e.g. on logout).
    ///
    /// Revisions keep counting so in-flight mutations still see that their
    /// views moved on.
    pub fn clear(&self) {
        let keys = self.keys();
        self.batch(&keys, |batch| {
            for key in &keys {
                batch.write(key, None, WriteOrigin::Cleared);
            }
        });
    }

    /// Subscribe to store writes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Run `f` with every slot in `keys` locked.
    ///
    /// Slots are locked in key order, so concurrent batches over overlapping
    /// keys cannot deadlock. Events are published after all locks are released.
    pub(crate) fn batch<R>(&self, keys: &[ViewKey], f: impl FnOnce(&mut Batch<'_>) -> R) -> R {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let slots: Vec<(ViewKey, Arc<Mutex<Slot>>)> = keys
            .into_iter()
            .map(|key| {
                let slot = self.slot(&key);
                (key, slot)
            })
            .collect();

        let (result, events) = {
            let mut batch = Batch {
                entries: slots
                    .iter()
                    .map(|(key, slot)| (key.clone(), slot.lock()))
                    .collect(),
                events: Vec::new(),
            };
            let result = f(&mut batch);
            (result, batch.events)
        };

        for event in events {
            tracing::trace!(view = %event.key, revision = event.revision, origin = ?event.origin, "view written");
            // No subscribers is fine
            let _ = self.events.send(event);
        }

        result
    }
}

/// A set of locked slots, handed to one atomic multi-view step.
pub(crate) struct Batch<'a> {
    entries: Vec<(ViewKey, MutexGuard<'a, Slot>)>,
    events: Vec<StoreEvent>,
}

impl Batch<'_> {
    fn entry(&self, key: &ViewKey) -> Option<&Slot> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, guard)| &**guard)
    }

    /// Whether `key` is locked by this batch.
    pub(crate) fn holds(&self, key: &ViewKey) -> bool {
        self.entry(key).is_some()
    }

    pub(crate) fn get(&self, key: &ViewKey) -> Option<Arc<View>> {
        self.entry(key).and_then(|slot| slot.value.clone())
    }

    pub(crate) fn revision(&self, key: &ViewKey) -> Revision {
        self.entry(key).map(|slot| slot.revision).unwrap_or(0)
    }

    /// Write a value and return the slot's new revision.
    ///
    /// Writing to a key outside the batch is ignored and returns 0.
    pub(crate) fn write(
        &mut self,
        key: &ViewKey,
        value: Option<Arc<View>>,
        origin: WriteOrigin,
    ) -> Revision {
        let Some((_, slot)) = self.entries.iter_mut().find(|(k, _)| k == key) else {
            tracing::error!(view = %key, "write outside of locked batch ignored");
            return 0;
        };
        slot.value = value;
        slot.revision += 1;
        if origin.is_authoritative() {
            slot.authoritative_revision = slot.revision;
        }
        let revision = slot.revision;
        self.events.push(StoreEvent {
            key: key.clone(),
            revision,
            origin,
        });
        revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entity, UserSummary};

    fn users(ids: &[&str]) -> View {
        ids.iter()
            .map(|id| Entity::User(UserSummary::new(*id, *id)))
            .collect()
    }

    #[test]
    fn absent_until_set() {
        let store = ViewStore::new();
        assert!(store.get(&ViewKey::Friends).is_none());
        assert!(matches!(
            store.require(&ViewKey::Friends),
            Err(Error::StaleView(ViewKey::Friends))
        ));

        store.set(ViewKey::Friends, users(&["a"]));
        assert_eq!(store.require(&ViewKey::Friends).unwrap().len(), 1);
    }

    #[test]
    fn revisions_increase() {
        let store = ViewStore::new();
        assert_eq!(store.revision(&ViewKey::Friends), 0);

        let r1 = store.set(ViewKey::Friends, users(&["a"]));
        let r2 = store.update(&ViewKey::Friends, |v| v.map(|v| v.without("a")));
        assert_eq!((r1, r2), (1, 2));
        assert_eq!(store.authoritative_revision(&ViewKey::Friends), 1);
    }

    #[test]
    fn update_sees_current_value() {
        let store = ViewStore::new();
        store.set(ViewKey::Friends, users(&["a"]));

        store.update(&ViewKey::Friends, |v| {
            v.map(|v| v.upserted(Entity::User(UserSummary::new("b", "b"))))
        });
        store.update(&ViewKey::Friends, |v| {
            v.map(|v| v.upserted(Entity::User(UserSummary::new("c", "c"))))
        });

        let view = store.get(&ViewKey::Friends).unwrap();
        assert_eq!(view.ids().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn concurrent_updates_on_same_key_are_serialized() {
        let store = Arc::new(ViewStore::new());
        store.set(ViewKey::Friends, View::default());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("{t}-{i}");
                        store.update(&ViewKey::Friends, |v| {
                            v.map(|v| v.upserted(Entity::User(UserSummary::new(id, "x"))))
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(&ViewKey::Friends).unwrap().len(), 400);
    }

    #[test]
    fn invalidate_marks_loaded_views_only() {
        let store = ViewStore::new();
        store.set(ViewKey::Friends, users(&["a"]));

        store.invalidate(&ViewKey::Friends);
        store.invalidate(&ViewKey::GroupChats);

        assert!(store.get(&ViewKey::Friends).unwrap().is_stale());
        assert!(store.get(&ViewKey::GroupChats).is_none());
        assert_eq!(store.stale_keys(), vec![ViewKey::Friends]);
    }

    #[test]
    fn clear_unloads_everything() {
        let store = ViewStore::new();
        store.set(ViewKey::Friends, users(&["a"]));
        store.set(ViewKey::FriendsFeed, View::default());

        store.clear();

        assert!(store.keys().is_empty());
        assert!(store.get(&ViewKey::Friends).is_none());
        assert_eq!(store.revision(&ViewKey::Friends), 2);
    }

    #[test]
    fn subscribers_see_writes() {
        let store = ViewStore::new();
        let mut events = store.subscribe();

        store.set(ViewKey::Friends, users(&["a"]));

        let event = events.try_recv().unwrap();
        assert_eq!(event.key, ViewKey::Friends);
        assert_eq!(event.origin, WriteOrigin::Fetch);
        assert_eq!(event.revision, 1);
    }

    #[test]
    fn batch_with_duplicate_keys_does_not_deadlock() {
        let store = ViewStore::new();
        let keys = vec![ViewKey::Friends, ViewKey::Friends, ViewKey::FriendsFeed];
        let held = store.batch(&keys, |batch| {
            batch.holds(&ViewKey::Friends) && batch.holds(&ViewKey::FriendsFeed)
        });
        assert!(held);
    }

    #[test]
    fn update_many_writes_only_returned_keys() {
        let store = ViewStore::new();
        store.set(ViewKey::Friends, users(&["a"]));
        store.set(ViewKey::RecommendedUsers, users(&["b"]));

        let written = store.update_many(
            &[ViewKey::Friends, ViewKey::RecommendedUsers],
            |current| {
                let recommended = current[&ViewKey::RecommendedUsers].as_deref().cloned().unwrap_or_default();
                let mut writes = ViewWrites::new();
                writes.insert(ViewKey::RecommendedUsers, recommended.without("b"));
                writes.insert(ViewKey::GroupChats, View::default());
                writes
            },
        );

        assert_eq!(written, vec![(ViewKey::RecommendedUsers, 2)]);
        assert!(store.get(&ViewKey::RecommendedUsers).unwrap().is_empty());
        assert_eq!(store.revision(&ViewKey::Friends), 1);
        assert!(store.get(&ViewKey::GroupChats).is_none());
    }
}
