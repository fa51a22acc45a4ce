//! One signed-in user's cache: views, in-flight mutations and the API behind them.

use crate::config::Config;
use crate::http::HttpRemote;
use crate::Result;
use optimist_engine::{
    ExecutorConfig, Fetcher, MutationExecutor, MutationKind, MutationOutcome, Notice, Post,
    Projector, UserSummary, View, ViewKey, ViewStore,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Facade over the engine for one acting user.
pub struct Session {
    me: UserSummary,
    store: Arc<ViewStore>,
    executor: Arc<MutationExecutor>,
    projector: Projector,
    fetcher: Fetcher,
    remote: Arc<HttpRemote>,
}

impl Session {
    /// Open a session for `me` against the API in `config`.
    pub fn new(config: &Config, me: UserSummary) -> Result<Self> {
        let remote = Arc::new(HttpRemote::new(config)?);
        Ok(Self::with_remote(remote, config.executor.clone(), me))
    }

    /// Open a session for `me` configured from the environment.
    pub fn from_env(me: UserSummary) -> Result<Self> {
        let config = Config::from_env()?;
        Self::new(&config, me)
    }

    pub fn with_remote(remote: Arc<HttpRemote>, config: ExecutorConfig, me: UserSummary) -> Self {
        let store = ViewStore::new_shared();
        let projector = Projector::new(me.clone(), config.provisional_prefix.clone());
        let executor = MutationExecutor::new_shared(store.clone(), config);
        let fetcher = Fetcher::new(store.clone(), remote.clone());

        Self {
            me,
            store,
            executor,
            projector,
            fetcher,
            remote,
        }
    }

    pub fn me(&self) -> &UserSummary {
        &self.me
    }

    pub fn store(&self) -> &Arc<ViewStore> {
        &self.store
    }

    pub fn executor(&self) -> &Arc<MutationExecutor> {
        &self.executor
    }

    /// Subscribe to mutation notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.executor.subscribe()
    }

    /// Whether an action on `target` (a post, user or request id) is in flight.
    pub fn is_pending(&self, target: &str) -> bool {
        self.executor.is_pending(target)
    }

    /// The view for `key`, loading it if needed.
    pub async fn view(&self, key: &ViewKey) -> Result<Arc<View>> {
        Ok(self.fetcher.ensure(key).await?)
    }

    /// Reload the view for `key`.
    pub async fn refresh(&self, key: &ViewKey) -> Result<Arc<View>> {
        Ok(self.fetcher.refresh(key).await?)
    }

    /// Reload every view flagged stale.
    pub async fn refresh_stale(&self) -> Vec<ViewKey> {
        self.fetcher.refresh_stale().await
    }

    /// Run `kind` to completion.
    pub async fn perform(&self, kind: MutationKind) -> MutationOutcome {
        let mutation = self.projector.project(kind, self.remote.clone());
        tracing::debug!(mutation_id = %mutation.id(), name = mutation.name(), user = %self.me.id, "performing");
        self.executor.run(mutation).await
    }

    /// Run `kind` in the background; it settles even if the handle is dropped.
    pub fn spawn(&self, kind: MutationKind) -> JoinHandle<MutationOutcome> {
        let mutation = self.projector.project(kind, self.remote.clone());
        self.executor.spawn(mutation)
    }

    /// Like `post`, or unlike it if the acting user already does.
    pub async fn toggle_like(&self, post: &Post) -> MutationOutcome {
        self.perform(MutationKind::toggle_like(post, &self.me)).await
    }

    pub async fn add_comment(&self, post: &Post, content: impl Into<String>) -> MutationOutcome {
        self.perform(MutationKind::AddComment {
            post_id: post.id.clone(),
            author_id: post.author.id.clone(),
            content: content.into(),
        })
        .await
    }

    pub async fn delete_post(&self, post: &Post) -> MutationOutcome {
        self.perform(MutationKind::DeletePost {
            post_id: post.id.clone(),
            author_id: post.author.id.clone(),
        })
        .await
    }

    /// Publish a post; the feed is refetched once it settles.
    pub async fn create_post(&self, content: impl Into<String>, image: Option<String>) -> MutationOutcome {
        self.perform(MutationKind::CreatePost {
            content: content.into(),
            image,
        })
        .await
    }

    pub async fn send_friend_request(&self, user_id: impl Into<String>) -> MutationOutcome {
        self.perform(MutationKind::SendFriendRequest {
            user_id: user_id.into(),
        })
        .await
    }

    pub async fn cancel_friend_request(&self, request_id: impl Into<String>) -> MutationOutcome {
        self.perform(MutationKind::CancelFriendRequest {
            request_id: request_id.into(),
        })
        .await
    }

    pub async fn accept_friend_request(&self, request_id: impl Into<String>) -> MutationOutcome {
        self.perform(MutationKind::AcceptFriendRequest {
            request_id: request_id.into(),
        })
        .await
    }

    pub async fn reject_friend_request(&self, request_id: impl Into<String>) -> MutationOutcome {
        self.perform(MutationKind::RejectFriendRequest {
            request_id: request_id.into(),
        })
        .await
    }

    pub async fn create_group(
        &self,
        name: impl Into<String>,
        member_ids: Vec<String>,
    ) -> MutationOutcome {
        self.perform(MutationKind::CreateGroup {
            name: name.into(),
            member_ids,
        })
        .await
    }

    /// End the server session and drop every cached view.
    pub async fn logout(&self) -> Result<()> {
        self.remote.logout().await?;
        self.store.clear();
        tracing::info!(user = %self.me.id, "logged out, cache cleared");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("me", &self.me)
            .field("base_url", &self.remote.base_url())
            .finish_non_exhaustive()
    }
}
