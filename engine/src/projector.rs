//! Cross-View Projector - which views a user action touches, and how.
//!
//! Every [`MutationKind`] becomes a single [`Mutation`] whose `apply` updates
//! all views holding the affected entities in the same step, so no view is
//! left stale while a sibling view already shows the change.
//!
//! Projections only ever compute new values from the current ones:
//! - removing an entity that is already gone is a no-op
//! - an authoritative entity missing from a view is inserted, not discarded
//! - views whose value would not change are not written at all

use crate::{
    error::Result, Authoritative, Comment, Entity, EntityId, Error, FriendRequest, Mutation,
    MutationKind, Post, Remote, RequestStatus, SettleEffect, UserSummary, View, ViewKey,
    ViewValues, ViewWrites,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::sync::Arc;

/// Builds mutations for the acting user.
#[derive(Debug, Clone)]
pub struct Projector {
    me: UserSummary,
    provisional_prefix: String,
}

impl Projector {
    pub fn new(me: UserSummary, provisional_prefix: impl Into<String>) -> Self {
        Self {
            me,
            provisional_prefix: provisional_prefix.into(),
        }
    }

    /// The acting user.
    pub fn me(&self) -> &UserSummary {
        &self.me
    }

    pub fn provisional_prefix(&self) -> &str {
        &self.provisional_prefix
    }

    /// The projection of one action, with its provisional ids fixed.
    pub fn projection(&self, kind: MutationKind) -> Projection {
        let provisional_id = match &kind {
            MutationKind::SendFriendRequest { user_id } => {
                format!("{}{}", self.provisional_prefix, user_id)
            }
            _ => format!("{}{}", self.provisional_prefix, uuid::Uuid::new_v4()),
        };
        Projection {
            me: self.me.clone(),
            kind,
            provisional_id,
            created_at: Utc::now(),
        }
    }

    /// Build the mutation for `kind`, sending it through `remote`.
    pub fn project(&self, kind: MutationKind, remote: Arc<dyn Remote>) -> Mutation {
        self.projection(kind).into_mutation(remote)
    }
}

/// One action's speculative and authoritative view updates.
#[derive(Debug, Clone)]
pub struct Projection {
    me: UserSummary,
    kind: MutationKind,
    /// Id of the placeholder entity this action may create
    provisional_id: EntityId,
    created_at: DateTime<Utc>,
}

impl Projection {
    pub fn kind(&self) -> &MutationKind {
        &self.kind
    }

    pub fn provisional_id(&self) -> &str {
        &self.provisional_id
    }

    pub fn affected_views(&self) -> Vec<ViewKey> {
        self.kind.affected_views(&self.me.id)
    }

    fn post_views(&self) -> Vec<ViewKey> {
        self.affected_views()
            .into_iter()
            .filter(ViewKey::is_post_view)
            .collect()
    }

    /// Wrap this projection into a runnable mutation.
    pub fn into_mutation(self, remote: Arc<dyn Remote>) -> Mutation {
        let request = self.kind.clone();
        let apply = self.clone();
        let reconcile = self.clone();

        let mut mutation = Mutation::new(self.kind.name(), self.affected_views(), move || {
            async move { remote.execute(&request).await }.boxed()
        })
        .with_apply(move |current| apply.apply(current))
        .with_reconcile(move |data, current| reconcile.reconcile(data, current))
        .with_messages(self.kind.success_message(), self.kind.failure_message());

        for key in self.kind.invalidates() {
            mutation = mutation.with_settle(SettleEffect::Invalidate(key));
        }
        if let Some(target) = self.kind.target() {
            mutation = mutation.with_pending(target);
        }
        mutation
    }

    /// Speculative values for the current ones.
    pub fn apply(&self, current: &ViewValues) -> Result<ViewWrites> {
        let mut writes = ViewWrites::new();

        match &self.kind {
            MutationKind::LikePost { post_id, .. } => {
                for key in self.post_views() {
                    let view = loaded(current, &key).mapped(post_id, |entity| {
                        Ok::<_, Error>(expect_post(&key, entity)?.with_like(&self.me).into())
                    })?;
                    stage(&mut writes, current, &key, view);
                }
            }
            MutationKind::UnlikePost { post_id, .. } => {
                for key in self.post_views() {
                    let view = loaded(current, &key).mapped(post_id, |entity| {
                        Ok::<_, Error>(expect_post(&key, entity)?.without_like(&self.me.id).into())
                    })?;
                    stage(&mut writes, current, &key, view);
                }
            }
            MutationKind::AddComment {
                post_id, content, ..
            } => {
                if content.trim().is_empty() {
                    return Err(Error::InvalidPayload("comment content is empty".into()));
                }
                let comment = Comment {
                    id: self.provisional_id.clone(),
                    post_id: Some(post_id.clone()),
                    author: self.me.clone(),
                    content: content.clone(),
                    created_at: Some(self.created_at),
                };
                let key = ViewKey::Comments(post_id.clone());
                let view = loaded(current, &key).upserted(comment.into());
                stage(&mut writes, current, &key, view);

                for key in self.post_views() {
                    let view = loaded(current, &key).mapped(post_id, |entity| {
                        Ok::<_, Error>(
                            expect_post(&key, entity)?
                                .with_comment(&self.provisional_id)
                                .into(),
                        )
                    })?;
                    stage(&mut writes, current, &key, view);
                }
            }
            MutationKind::DeletePost { post_id, .. } => {
                for key in self.post_views() {
                    let view = loaded(current, &key).without(post_id);
                    stage(&mut writes, current, &key, view);
                }
            }
            MutationKind::SendFriendRequest { user_id } => {
                let recommended = loaded(current, &ViewKey::RecommendedUsers);
                let requested = recommended.get(user_id).and_then(Entity::as_user).cloned();
                stage(
                    &mut writes,
                    current,
                    &ViewKey::RecommendedUsers,
                    recommended.without(user_id),
                );

                // Unknown users get no placeholder; the refetch at settle shows them
                if let Some(user) = requested {
                    let request = FriendRequest {
                        id: self.provisional_id.clone(),
                        sender: Some(self.me.clone()),
                        recipient: Some(user),
                        status: RequestStatus::Pending,
                    };
                    let outgoing = loaded(current, &ViewKey::OutgoingRequests).upserted(request.into());
                    stage(&mut writes, current, &ViewKey::OutgoingRequests, outgoing);
                }
            }
            MutationKind::CancelFriendRequest { request_id } => {
                let outgoing = loaded(current, &ViewKey::OutgoingRequests);
                let recipient = outgoing
                    .get(request_id)
                    .and_then(Entity::as_request)
                    .and_then(|request| request.recipient.clone());
                stage(
                    &mut writes,
                    current,
                    &ViewKey::OutgoingRequests,
                    outgoing.without(request_id),
                );

                if let Some(recipient) = recipient {
                    let recommended = loaded(current, &ViewKey::RecommendedUsers);
                    if !recommended.contains(&recipient.id) {
                        let view = recommended.upserted(recipient.into());
                        stage(&mut writes, current, &ViewKey::RecommendedUsers, view);
                    }
                }
            }
            MutationKind::AcceptFriendRequest { request_id } => {
                let incoming = loaded(current, &ViewKey::IncomingRequests);
                let sender = request_sender(&incoming, request_id);
                stage(
                    &mut writes,
                    current,
                    &ViewKey::IncomingRequests,
                    incoming.without(request_id),
                );

                if let Some(sender) = sender {
                    let friends = loaded(current, &ViewKey::Friends).upserted(sender.clone().into());
                    stage(&mut writes, current, &ViewKey::Friends, friends);

                    let recommended = loaded(current, &ViewKey::RecommendedUsers).without(&sender.id);
                    stage(&mut writes, current, &ViewKey::RecommendedUsers, recommended);
                }
            }
            MutationKind::RejectFriendRequest { request_id } => {
                let incoming = loaded(current, &ViewKey::IncomingRequests);
                let sender = request_sender(&incoming, request_id);
                stage(
                    &mut writes,
                    current,
                    &ViewKey::IncomingRequests,
                    incoming.without(request_id),
                );

                if let Some(sender) = sender {
                    let recommended = loaded(current, &ViewKey::RecommendedUsers);
                    if !recommended.contains(&sender.id) {
                        let view = recommended.upserted(sender.into());
                        stage(&mut writes, current, &ViewKey::RecommendedUsers, view);
                    }
                }
            }
            MutationKind::CreatePost { content, image } => {
                if content.trim().is_empty() && image.is_none() {
                    return Err(Error::InvalidPayload("post has neither content nor image".into()));
                }
            }
            MutationKind::CreateGroup { .. } => {}
        }

        Ok(writes)
    }

    /// Merge authoritative data into the current values.
    ///
    /// Applying the same data twice gives the same values as applying it once.
    pub fn reconcile(&self, data: &Authoritative, current: &ViewValues) -> ViewWrites {
        let mut writes = ViewWrites::new();
        let entities = data.entities();

        match &self.kind {
            MutationKind::LikePost { .. } | MutationKind::UnlikePost { .. } => {
                if let Some(post) = entities.iter().find_map(Entity::as_post) {
                    for key in self.post_views() {
                        let view = upsert_post(&key, &loaded(current, &key), post);
                        confirm(&mut writes, current, &key, view, &post.id);
                    }
                }
            }
            MutationKind::AddComment { post_id, .. } => {
                let Some(comment) = entities.iter().find_map(|entity| match entity {
                    Entity::Comment(comment) => Some(comment),
                    _ => None,
                }) else {
                    // Accepted without the comment itself: drop the placeholder, refetch the rest
                    tracing::warn!(post_id = %post_id, "comment response carried no comment");
                    self.drop_placeholder(&mut writes, current, post_id);
                    return writes;
                };

                let key = ViewKey::Comments(post_id.clone());
                let view = loaded(current, &key)
                    .without(&self.provisional_id)
                    .upserted(comment.clone().into());
                stage(&mut writes, current, &key, view);

                let post = entities.iter().find_map(Entity::as_post);
                for key in self.post_views() {
                    let view = match post {
                        Some(post) => {
                            let view = upsert_post(&key, &loaded(current, &key), post);
                            confirm(&mut writes, current, &key, view, &post.id);
                            continue;
                        }
                        None => loaded(current, &key)
                            .mapped(post_id, |entity| {
                                Ok::<_, Error>(match entity {
                                    Entity::Post(post) => post
                                        .with_comment_replaced(&self.provisional_id, &comment.id)
                                        .into(),
                                    other => other.clone(),
                                })
                            })
                            .unwrap_or_else(|_| loaded(current, &key)),
                    };
                    stage(&mut writes, current, &key, view);
                }
            }
            MutationKind::DeletePost { post_id, .. } => {
                for key in self.post_views() {
                    let view = loaded(current, &key).without(post_id);
                    stage(&mut writes, current, &key, view);
                }
            }
            MutationKind::SendFriendRequest { .. } => {
                if let Some(request) = entities.iter().find_map(Entity::as_request) {
                    let outgoing = loaded(current, &ViewKey::OutgoingRequests)
                        .without(&self.provisional_id)
                        .upserted(request.clone().into());
                    stage(&mut writes, current, &ViewKey::OutgoingRequests, outgoing);

                    if let Some(recipient) = &request.recipient {
                        let recommended =
                            loaded(current, &ViewKey::RecommendedUsers).without(&recipient.id);
                        stage(&mut writes, current, &ViewKey::RecommendedUsers, recommended);
                    }
                }
            }
            MutationKind::CreatePost { .. } => {
                if let Some(post) = entities.iter().find_map(Entity::as_post) {
                    for key in self.post_views() {
                        let view = upsert_post(&key, &loaded(current, &key), post);
                        stage(&mut writes, current, &key, view);
                    }
                }
            }
            MutationKind::CancelFriendRequest { request_id } => {
                let outgoing = loaded(current, &ViewKey::OutgoingRequests).without(request_id);
                stage(&mut writes, current, &ViewKey::OutgoingRequests, outgoing);
            }
            MutationKind::AcceptFriendRequest { request_id } => {
                let incoming = loaded(current, &ViewKey::IncomingRequests).without(request_id);
                stage(&mut writes, current, &ViewKey::IncomingRequests, incoming);

                let friend = entities.iter().find_map(|entity| match entity {
                    Entity::User(user) => Some(user.clone()),
                    Entity::FriendRequest(request) => request.sender.clone(),
                    _ => None,
                });
                if let Some(friend) = friend {
                    let recommended = loaded(current, &ViewKey::RecommendedUsers).without(&friend.id);
                    stage(&mut writes, current, &ViewKey::RecommendedUsers, recommended);

                    let friends = loaded(current, &ViewKey::Friends).upserted(friend.into());
                    stage(&mut writes, current, &ViewKey::Friends, friends);
                }
            }
            MutationKind::RejectFriendRequest { request_id } => {
                let incoming = loaded(current, &ViewKey::IncomingRequests).without(request_id);
                stage(&mut writes, current, &ViewKey::IncomingRequests, incoming);
            }
            MutationKind::CreateGroup { .. } => {
                let group = entities.into_iter().find(|e| matches!(e, Entity::GroupChat(_)));
                if let Some(group) = group {
                    let view = loaded(current, &ViewKey::GroupChats).upserted(group);
                    stage(&mut writes, current, &ViewKey::GroupChats, view);
                }
            }
        }

        writes
    }

    /// Remove this action's placeholder comment everywhere and flag the
    /// comments view stale.
    fn drop_placeholder(&self, writes: &mut ViewWrites, current: &ViewValues, post_id: &str) {
        let key = ViewKey::Comments(post_id.to_string());
        if let Some(Some(comments)) = current.get(&key) {
            writes.insert(key, comments.without(&self.provisional_id).marked_stale());
        }

        for key in self.post_views() {
            let view = loaded(current, &key)
                .mapped(post_id, |entity| {
                    Ok::<_, Error>(match entity {
                        Entity::Post(post) => post.without_comment(&self.provisional_id).into(),
                        other => other.clone(),
                    })
                })
                .unwrap_or_else(|_| loaded(current, &key));
            stage(writes, current, &key, view);
        }
    }
}

/// The current value of `key`, or an empty view if it is not loaded.
fn loaded(current: &ViewValues, key: &ViewKey) -> View {
    current
        .get(key)
        .and_then(|view| view.as_deref())
        .cloned()
        .unwrap_or_default()
}

/// Queue `view` for writing unless it changes nothing.
fn stage(writes: &mut ViewWrites, current: &ViewValues, key: &ViewKey, view: View) {
    match current.get(key).and_then(|view| view.as_deref()) {
        Some(existing) if *existing == view => {}
        None if view.is_empty() => {}
        _ => {
            writes.insert(key.clone(), view);
        }
    }
}

/// Queue `view` for writing if it is loaded and holds `id`, even unchanged,
/// so the confirmed entity counts as authoritative.
fn confirm(writes: &mut ViewWrites, current: &ViewValues, key: &ViewKey, view: View, id: &str) {
    let is_loaded = matches!(current.get(key), Some(Some(_)));
    if is_loaded && view.contains(id) {
        writes.insert(key.clone(), view);
    } else {
        stage(writes, current, key, view);
    }
}

fn expect_post<'a>(key: &ViewKey, entity: &'a Entity) -> Result<&'a Post> {
    entity.as_post().ok_or_else(|| Error::KindMismatch {
        view: key.clone(),
        id: entity.id().clone(),
        expected: "post",
    })
}

fn request_sender(view: &View, request_id: &str) -> Option<UserSummary> {
    view.get(request_id)
        .and_then(Entity::as_request)
        .and_then(|request| request.sender.clone())
}

/// Replace `post` in `view`, or add it if the view is one it belongs in.
fn upsert_post(key: &ViewKey, view: &View, post: &Post) -> View {
    let belongs = match key {
        ViewKey::FriendsFeed => true,
        ViewKey::UserPosts(user_id) => *user_id == post.author.id,
        _ => false,
    };
    if belongs || view.contains(&post.id) {
        view.upserted(post.clone().into())
    } else {
        view.clone()
    }
}
