//! Snapshot Manager - capturing and restoring prior view values.
//!
//! A snapshot is a plain copy of a view's value. Views hold immutable
//! entities behind an `Arc`, so capturing shares structure and costs one
//! reference count per view.

use crate::store::{Batch, ViewStore, WriteOrigin};
use crate::{Revision, View, ViewKey, ViewValues};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The prior value of one view.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: ViewKey,
    /// Value at capture time (`None` if the view was not loaded)
    pub prior: Option<Arc<View>>,
    /// Slot revision at capture time
    pub revision: Revision,
}

/// Snapshots of several views, captured in one atomic step.
///
/// Uses BTreeMap for a deterministic restore order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    entries: BTreeMap<ViewKey, Snapshot>,
}

impl SnapshotSet {
    pub fn get(&self, key: &ViewKey) -> Option<&Snapshot> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ViewKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The captured values, as handed to a mutation's `apply`.
    pub fn values(&self) -> ViewValues {
        self.entries
            .iter()
            .map(|(key, snapshot)| (key.clone(), snapshot.prior.clone()))
            .collect()
    }
}

/// A speculative value written by an in-flight mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeWrite {
    pub value: Arc<View>,
    /// Slot revision right after the write
    pub revision: Revision,
}

/// Captures and restores view values in a [`ViewStore`].
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    store: Arc<ViewStore>,
}

impl SnapshotManager {
    pub fn new(store: Arc<ViewStore>) -> Self {
        Self { store }
    }

    /// Read the current values of `keys` as one atomic step.
    pub fn capture(&self, keys: &[ViewKey]) -> SnapshotSet {
        self.store.batch(keys, |batch| Self::capture_in(batch, keys))
    }

    /// Write every captured value back verbatim.
    pub fn restore(&self, set: &SnapshotSet) {
        let keys: Vec<ViewKey> = set.keys().cloned().collect();
        self.store.batch(&keys, |batch| Self::restore_in(batch, set));
    }

    /// Undo speculative writes without clobbering anything written since.
    ///
    /// A view still holding the speculative value gets its captured value back.
    /// A view written by someone else in the meantime keeps that newer value
    /// with only this mutation's own change undone: its likes, comment ids and
    /// entities are reverted one by one.
    pub fn restore_guarded(
        &self,
        set: &SnapshotSet,
        speculative: &BTreeMap<ViewKey, SpeculativeWrite>,
    ) {
        let keys: Vec<ViewKey> = set.keys().cloned().collect();
        self.store
            .batch(&keys, |batch| Self::restore_guarded_in(batch, set, speculative));
    }

    pub(crate) fn capture_in(batch: &Batch<'_>, keys: &[ViewKey]) -> SnapshotSet {
        let entries = keys
            .iter()
            .map(|key| {
                let snapshot = Snapshot {
                    key: key.clone(),
                    prior: batch.get(key),
                    revision: batch.revision(key),
                };
                (key.clone(), snapshot)
            })
            .collect();
        SnapshotSet { entries }
    }

    pub(crate) fn restore_in(batch: &mut Batch<'_>, set: &SnapshotSet) {
        for snapshot in set.iter() {
            batch.write(&snapshot.key, snapshot.prior.clone(), WriteOrigin::Restored);
        }
    }

    pub(crate) fn restore_guarded_in(
        batch: &mut Batch<'_>,
        set: &SnapshotSet,
        speculative: &BTreeMap<ViewKey, SpeculativeWrite>,
    ) {
        for (key, write) in speculative {
            let Some(snapshot) = set.get(key) else {
                continue;
            };

            if batch.revision(key) == write.revision {
                batch.write(key, snapshot.prior.clone(), WriteOrigin::Restored);
                continue;
            }

            // Unloaded since (e.g. logout); nothing left to revert
            let Some(current) = batch.get(key) else {
                continue;
            };

            let reverted = revert_entities(snapshot.prior.as_deref(), &write.value, &current);
            if reverted != *current {
                batch.write(key, Some(Arc::new(reverted)), WriteOrigin::Restored);
            } else {
                tracing::debug!(view = %key, "rollback superseded by newer write");
            }
        }
    }
}

/// Drop a rolled-back mutation's change from the values another in-flight
/// mutation captured or wrote after it.
///
/// Only keys whose capture happened at or after the undone speculative write
/// can hold its change, so older captures are left alone.
pub(crate) fn rebase(
    snapshot: &mut SnapshotSet,
    speculative: &mut BTreeMap<ViewKey, SpeculativeWrite>,
    undone_set: &SnapshotSet,
    undone: &BTreeMap<ViewKey, SpeculativeWrite>,
) {
    for (key, write) in undone {
        let Some(entry) = snapshot.entries.get_mut(key) else {
            continue;
        };
        if entry.revision < write.revision {
            continue;
        }
        let undone_prior = undone_set.get(key).and_then(|s| s.prior.as_deref());

        if let Some(prior) = &entry.prior {
            let rebased = revert_entities(undone_prior, &write.value, prior);
            if rebased != **prior {
                entry.prior = Some(Arc::new(rebased));
            }
        }
        if let Some(ours) = speculative.get_mut(key) {
            let rebased = revert_entities(undone_prior, &write.value, &ours.value);
            if rebased != *ours.value {
                ours.value = Arc::new(rebased);
            }
        }
    }
}

/// Undo in `current` the change `speculative` made relative to `prior`.
///
/// Entities the change added are dropped while they are still as written,
/// removed ones come back at their old index unless re-added since, and
/// changed ones are reverted with [`Entity::reverted`].
fn revert_entities(prior: Option<&View>, speculative: &View, current: &View) -> View {
    let empty = View::default();
    let prior = prior.unwrap_or(&empty);

    let mut view = current.clone();
    for added in speculative.entities() {
        let id = added.id();
        if !prior.contains(id) && view.get(id) == Some(added) {
            view = view.without(id);
        }
    }

    for (index, before) in prior.entities().iter().enumerate() {
        let id = before.id();
        view = match (speculative.get(id), view.get(id)) {
            (Some(after), _) if after == before => continue,
            (Some(after), Some(now)) => view.upserted(now.reverted(before, after)),
            // Removed by a later write; keep it removed
            (Some(_), None) => continue,
            // Put back by a later write
            (None, Some(_)) => continue,
            (None, None) => view.inserted_at(index, before.clone()),
        };
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entity, UserSummary};

    fn user(id: &str, name: &str) -> Entity {
        Entity::User(UserSummary::new(id, name))
    }

    fn ids(view: &View) -> Vec<&str> {
        view.ids().map(String::as_str).collect()
    }

    #[test]
    fn capture_then_restore_is_exact() {
        let store = ViewStore::new_shared();
        store.set(ViewKey::Friends, View::new(vec![user("a", "A")]));
        let manager = SnapshotManager::new(store.clone());

        let set = manager.capture(&[ViewKey::Friends, ViewKey::RecommendedUsers]);
        assert_eq!(set.len(), 2);
        assert!(set.get(&ViewKey::RecommendedUsers).unwrap().prior.is_none());

        store.update(&ViewKey::Friends, |_| Some(View::default()));
        store.update(&ViewKey::RecommendedUsers, |_| Some(View::new(vec![user("b", "B")])));

        manager.restore(&set);

        assert_eq!(
            store.get(&ViewKey::Friends).unwrap().as_ref(),
            &View::new(vec![user("a", "A")])
        );
        assert!(store.get(&ViewKey::RecommendedUsers).is_none());
    }

    #[test]
    fn capture_shares_structure() {
        let store = ViewStore::new_shared();
        store.set(ViewKey::Friends, View::new(vec![user("a", "A")]));
        let manager = SnapshotManager::new(store.clone());

        let set = manager.capture(&[ViewKey::Friends]);
        let prior = set.get(&ViewKey::Friends).unwrap().prior.clone().unwrap();
        assert!(Arc::ptr_eq(&prior, &store.get(&ViewKey::Friends).unwrap()));
    }

    #[test]
    fn revert_restores_removed_entity_in_place() {
        let prior = View::new(vec![user("a", "A"), user("b", "B"), user("c", "C")]);
        let speculative = prior.without("b");
        // Someone else appended "d" after our write
        let current = speculative.upserted(user("d", "D"));

        let reverted = revert_entities(Some(&prior), &speculative, &current);
        assert_eq!(ids(&reverted), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn revert_skips_entities_superseded_since() {
        let prior = View::new(vec![user("a", "A")]);
        let speculative = prior.upserted(user("a", "A (speculative)"));
        let current = prior.upserted(user("a", "A (server)"));

        let reverted = revert_entities(Some(&prior), &speculative, &current);
        assert_eq!(reverted, current);
    }

    #[test]
    fn revert_drops_inserted_entity() {
        let prior = View::new(vec![user("a", "A")]);
        let speculative = prior.upserted(user("temp-1", "pending"));
        let current = speculative.upserted(user("z", "Z"));

        let reverted = revert_entities(Some(&prior), &speculative, &current);
        assert_eq!(ids(&reverted), vec!["a", "z"]);
    }

    #[test]
    fn guarded_restore_is_verbatim_when_untouched() {
        let store = ViewStore::new_shared();
        store.set(ViewKey::Friends, View::new(vec![user("a", "A")]));
        let keys = [ViewKey::Friends];

        let speculative = store.batch(&keys, |batch| {
            let set = SnapshotManager::capture_in(batch, &keys);
            let value = Arc::new(View::default());
            let revision = batch.write(&ViewKey::Friends, Some(value.clone()), WriteOrigin::Speculative);
            let mut writes = BTreeMap::new();
            writes.insert(ViewKey::Friends, SpeculativeWrite { value, revision });
            (set, writes)
        });

        store.batch(&keys, |batch| {
            SnapshotManager::restore_guarded_in(batch, &speculative.0, &speculative.1)
        });

        assert_eq!(ids(&store.get(&ViewKey::Friends).unwrap()), vec!["a"]);
    }

    #[test]
    fn guarded_restore_keeps_newer_entities() {
        let store = ViewStore::new_shared();
        store.set(ViewKey::Friends, View::new(vec![user("a", "A"), user("b", "B")]));
        let manager = SnapshotManager::new(store.clone());
        let set = manager.capture(&[ViewKey::Friends]);

        // Our speculative write drops "b"
        let value = Arc::new(View::new(vec![user("a", "A")]));
        let revision = store.update(&ViewKey::Friends, |_| Some(value.as_ref().clone()));
        let speculative = BTreeMap::from([(ViewKey::Friends, SpeculativeWrite { value, revision })]);

        // A later write renames "a"
        store.update(&ViewKey::Friends, |view| {
            view.map(|view| view.upserted(user("a", "Alice")))
        });

        manager.restore_guarded(&set, &speculative);

        let friends = store.get(&ViewKey::Friends).unwrap();
        assert_eq!(ids(&friends), vec!["a", "b"]);
        assert_eq!(friends.get("a"), Some(&user("a", "Alice")));
    }

    fn feed(post: crate::Post) -> View {
        View::new(vec![post.into()])
    }

    #[test]
    fn rebase_drops_undone_change_from_later_captures() {
        let me = UserSummary::new("me", "Me");
        let unliked = crate::Post::new("p", UserSummary::new("a", "A"), "hi");
        let liked = unliked.with_like(&me);
        let key = ViewKey::FriendsFeed;

        // The like wrote at revision 2
        let like_set = SnapshotSet {
            entries: BTreeMap::from([(
                key.clone(),
                Snapshot { key: key.clone(), prior: Some(Arc::new(feed(unliked.clone()))), revision: 1 },
            )]),
        };
        let like_write = BTreeMap::from([(
            key.clone(),
            SpeculativeWrite { value: Arc::new(feed(liked.clone())), revision: 2 },
        )]);

        // An unlike captured the liked feed afterwards
        let mut unlike_set = SnapshotSet {
            entries: BTreeMap::from([(
                key.clone(),
                Snapshot { key: key.clone(), prior: Some(Arc::new(feed(liked.clone()))), revision: 2 },
            )]),
        };
        let mut unlike_write = BTreeMap::from([(
            key.clone(),
            SpeculativeWrite { value: Arc::new(feed(unliked.clone())), revision: 3 },
        )]);

        rebase(&mut unlike_set, &mut unlike_write, &like_set, &like_write);

        let prior = unlike_set.get(&key).unwrap().prior.clone().unwrap();
        assert_eq!(*prior, feed(unliked.clone()));
        assert_eq!(*unlike_write[&key].value, feed(unliked));
    }

    #[test]
    fn rebase_ignores_captures_taken_before_the_undone_write() {
        let key = ViewKey::Friends;
        let undone_set = SnapshotSet {
            entries: BTreeMap::from([(
                key.clone(),
                Snapshot { key: key.clone(), prior: Some(Arc::new(View::default())), revision: 4 },
            )]),
        };
        let undone = BTreeMap::from([(
            key.clone(),
            SpeculativeWrite { value: Arc::new(View::new(vec![user("a", "A")])), revision: 5 },
        )]);
        let captured = View::new(vec![user("a", "A")]);
        let mut older = SnapshotSet {
            entries: BTreeMap::from([(
                key.clone(),
                Snapshot { key: key.clone(), prior: Some(Arc::new(captured.clone())), revision: 3 },
            )]),
        };

        rebase(&mut older, &mut BTreeMap::new(), &undone_set, &undone);

        assert_eq!(older.get(&key).unwrap().prior.as_deref(), Some(&captured));
    }
}
