//! Lazy view loading through [`Remote::fetch`].

use crate::{error::Result, Entity, Remote, View, ViewKey, ViewStore};
use std::collections::HashSet;
use std::sync::Arc;

/// Loads views into a [`ViewStore`] on demand.
#[derive(Clone)]
pub struct Fetcher {
    store: Arc<ViewStore>,
    remote: Arc<dyn Remote>,
}

impl Fetcher {
    pub fn new(store: Arc<ViewStore>, remote: Arc<dyn Remote>) -> Self {
        Self { store, remote }
    }

    /// The loaded value of `key`, fetching it if absent or stale.
    pub async fn ensure(&self, key: &ViewKey) -> Result<Arc<View>> {
        match self.store.get(key) {
            Some(view) if !view.is_stale() => Ok(view),
            _ => self.refresh(key).await,
        }
    }

    /// Fetch `key` and replace whatever the store holds.
    pub async fn refresh(&self, key: &ViewKey) -> Result<Arc<View>> {
        let mut entities = self.remote.fetch(key).await?;
        if *key == ViewKey::RecommendedUsers {
            entities = self.without_connected(entities);
        }

        let count = entities.len();
        let revision = self.store.set(key.clone(), View::new(entities));
        tracing::debug!(view = %key, entities = count, revision, "view fetched");

        self.store.require(key)
    }

    /// Refetch every stale view, returning the keys that loaded.
    ///
    /// A failed fetch leaves its view stale and does not stop the others.
    pub async fn refresh_stale(&self) -> Vec<ViewKey> {
        let mut refreshed = Vec::new();
        for key in self.store.stale_keys() {
            match self.refresh(&key).await {
                Ok(_) => refreshed.push(key),
                Err(e) => tracing::warn!(view = %key, error = %e, "refetch failed"),
            }
        }
        refreshed
    }

    /// Drop users already connected to the acting user: friends, recipients
    /// of outgoing requests and senders of incoming ones.
    fn without_connected(&self, users: Vec<Entity>) -> Vec<Entity> {
        let mut connected = HashSet::new();
        if let Some(friends) = self.store.get(&ViewKey::Friends) {
            connected.extend(friends.ids().cloned());
        }
        if let Some(outgoing) = self.store.get(&ViewKey::OutgoingRequests) {
            connected.extend(
                outgoing
                    .entities()
                    .iter()
                    .filter_map(Entity::as_request)
                    .filter_map(|request| request.recipient.as_ref())
                    .map(|user| user.id.clone()),
            );
        }
        if let Some(incoming) = self.store.get(&ViewKey::IncomingRequests) {
            connected.extend(
                incoming
                    .entities()
                    .iter()
                    .filter_map(Entity::as_request)
                    .filter_map(|request| request.sender.as_ref())
                    .map(|user| user.id.clone()),
            );
        }

        users
            .into_iter()
            .filter(|user| !connected.contains(user.id()))
            .collect()
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher").field("store", &self.store).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Authoritative, Error, FriendRequest, MutationKind, RemoteError, RequestStatus, UserSummary};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FixedRemote {
        views: HashMap<ViewKey, Vec<Entity>>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Remote for FixedRemote {
        async fn execute(&self, _: &MutationKind) -> std::result::Result<Authoritative, RemoteError> {
            Ok(Authoritative::Empty)
        }

        async fn fetch(&self, key: &ViewKey) -> std::result::Result<Vec<Entity>, RemoteError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.views
                .get(key)
                .cloned()
                .ok_or_else(|| RemoteError::new(Some(404), "Not found"))
        }
    }

    fn user(id: &str) -> UserSummary {
        UserSummary::new(id, id.to_uppercase())
    }

    #[tokio::test]
    async fn ensure_fetches_once() {
        let store = ViewStore::new_shared();
        let remote = Arc::new(FixedRemote {
            views: HashMap::from([(ViewKey::Friends, vec![user("u1").into()])]),
            ..Default::default()
        });
        let fetcher = Fetcher::new(store.clone(), remote.clone());

        fetcher.ensure(&ViewKey::Friends).await.unwrap();
        let view = fetcher.ensure(&ViewKey::Friends).await.unwrap();

        assert!(view.contains("u1"));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);

        store.invalidate(&ViewKey::Friends);
        fetcher.ensure(&ViewKey::Friends).await.unwrap();
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_reports_remote_error() {
        let fetcher = Fetcher::new(ViewStore::new_shared(), Arc::new(FixedRemote::default()));

        let err = fetcher.refresh(&ViewKey::GroupChats).await.unwrap_err();
        assert!(matches!(err, Error::Remote(RemoteError { status: Some(404), .. })));
    }

    #[tokio::test]
    async fn recommendations_skip_connected_users() {
        let store = ViewStore::new_shared();
        store.set(ViewKey::Friends, View::new(vec![user("friend").into()]));
        store.set(
            ViewKey::OutgoingRequests,
            View::new(vec![FriendRequest {
                id: "r1".into(),
                sender: None,
                recipient: Some(user("asked")),
                status: RequestStatus::Pending,
            }
            .into()]),
        );

        let remote = Arc::new(FixedRemote {
            views: HashMap::from([(
                ViewKey::RecommendedUsers,
                vec![user("friend").into(), user("asked").into(), user("new").into()],
            )]),
            ..Default::default()
        });
        let fetcher = Fetcher::new(store, remote);

        let view = fetcher.refresh(&ViewKey::RecommendedUsers).await.unwrap();
        let ids: Vec<_> = view.ids().cloned().collect();
        assert_eq!(ids, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn refresh_stale_keeps_going_after_failure() {
        let store = ViewStore::new_shared();
        store.set(ViewKey::Friends, View::default());
        store.set(ViewKey::GroupChats, View::default());
        store.invalidate(&ViewKey::Friends);
        store.invalidate(&ViewKey::GroupChats);

        let remote = Arc::new(FixedRemote {
            views: HashMap::from([(ViewKey::Friends, vec![])]),
            ..Default::default()
        });
        let fetcher = Fetcher::new(store.clone(), remote);

        let refreshed = fetcher.refresh_stale().await;

        assert_eq!(refreshed, vec![ViewKey::Friends]);
        assert_eq!(store.stale_keys(), vec![ViewKey::GroupChats]);
    }
}
