//! Entity types held by views.
//!
//! Entities are immutable value snapshots. A mutation never patches one in
//! place: it builds a new value and replaces the old one wholesale, so a
//! captured view keeps seeing exactly what it saw at capture time.

use crate::{EntityId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Compact user record embedded in posts, comments, requests and friend lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// Stable user identifier
    #[serde(alias = "_id")]
    pub id: UserId,
    /// Display name
    #[serde(default)]
    pub full_name: String,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl UserSummary {
    /// Create a user summary without an avatar.
    pub fn new(id: impl Into<UserId>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: full_name.into(),
            profile_picture: None,
        }
    }
}

/// A like on a post, keyed by the user who left it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub user: UserSummary,
}

impl Like {
    pub fn by(user: UserSummary) -> Self {
        Self { user }
    }
}

/// A feed post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(alias = "_id")]
    pub id: EntityId,
    /// Author of the post
    #[serde(alias = "user")]
    pub author: UserSummary,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Denormalized likes
    #[serde(default)]
    pub likes: Vec<Like>,
    /// Ids of the post's comments
    #[serde(default)]
    pub comments: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Create a post with no likes or comments.
    pub fn new(id: impl Into<EntityId>, author: UserSummary, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author,
            content: content.into(),
            image: None,
            likes: Vec::new(),
            comments: Vec::new(),
            created_at: None,
        }
    }

    /// Check whether the given user has liked this post.
    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|like| like.user.id == user_id)
    }

    /// Copy of this post with a like by `user`. Liking twice is a no-op.
    pub fn with_like(&self, user: &UserSummary) -> Post {
        let mut post = self.clone();
        if !post.is_liked_by(&user.id) {
            post.likes.push(Like::by(user.clone()));
        }
        post
    }

    /// Copy of this post without any like by `user_id`.
    pub fn without_like(&self, user_id: &str) -> Post {
        let mut post = self.clone();
        post.likes.retain(|like| like.user.id != user_id);
        post
    }

    /// Copy of this post with `comment_id` appended to its comment ids.
    pub fn with_comment(&self, comment_id: &str) -> Post {
        let mut post = self.clone();
        if !post.comments.iter().any(|id| id == comment_id) {
            post.comments.push(comment_id.to_string());
        }
        post
    }

    /// Copy of this post without the comment id `comment_id`.
    pub fn without_comment(&self, comment_id: &str) -> Post {
        let mut post = self.clone();
        post.comments.retain(|id| id != comment_id);
        post
    }

    /// Copy of this post with the comment id `from` swapped for `to`.
    pub fn with_comment_replaced(&self, from: &str, to: &str) -> Post {
        let mut post = self.clone();
        if post.comments.iter().any(|id| id == to) {
            post.comments.retain(|id| id != from);
            return post;
        }
        match post.comments.iter().position(|id| id == from) {
            Some(index) => post.comments[index] = to.to_string(),
            None => post.comments.push(to.to_string()),
        }
        post
    }

    /// Copy of this post with the change from `before` to `after` undone.
    ///
    /// Likes and comment ids are undone one by one, so changes made by other
    /// writers since `after` survive. Other fields go back to `before` only
    /// while they still hold `after`'s value.
    pub fn reverted(&self, before: &Post, after: &Post) -> Post {
        let mut post = self.clone();

        post.likes.retain(|like| {
            before.is_liked_by(&like.user.id) || !after.is_liked_by(&like.user.id)
        });
        for (index, like) in before.likes.iter().enumerate() {
            if !after.is_liked_by(&like.user.id) && !post.is_liked_by(&like.user.id) {
                let index = index.min(post.likes.len());
                post.likes.insert(index, like.clone());
            }
        }

        post.comments
            .retain(|id| before.comments.contains(id) || !after.comments.contains(id));
        for (index, id) in before.comments.iter().enumerate() {
            if !after.comments.contains(id) && !post.comments.contains(id) {
                let index = index.min(post.comments.len());
                post.comments.insert(index, id.clone());
            }
        }

        if post.content == after.content {
            post.content = before.content.clone();
        }
        if post.image == after.image {
            post.image = before.image.clone();
        }
        if post.author == after.author {
            post.author = before.author.clone();
        }
        if post.created_at == after.created_at {
            post.created_at = before.created_at;
        }
        post
    }
}

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(alias = "_id")]
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<EntityId>,
    #[serde(alias = "user")]
    pub author: UserSummary,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// A friend request between two users.
///
/// Incoming requests carry a `sender`, outgoing ones a `recipient`; the server
/// may populate either or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    #[serde(alias = "_id")]
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserSummary>,
    #[serde(default)]
    pub status: RequestStatus,
}

/// A group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChat {
    #[serde(alias = "_id")]
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub members: Vec<UserSummary>,
}

/// Any value a view can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Entity {
    Post(Post),
    Comment(Comment),
    FriendRequest(FriendRequest),
    User(UserSummary),
    GroupChat(GroupChat),
}

impl Entity {
    /// Get the entity ID.
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Post(post) => &post.id,
            Entity::Comment(comment) => &comment.id,
            Entity::FriendRequest(request) => &request.id,
            Entity::User(user) => &user.id,
            Entity::GroupChat(group) => &group.id,
        }
    }

    /// Short name of the entity kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Entity::Post(_) => "post",
            Entity::Comment(_) => "comment",
            Entity::FriendRequest(_) => "friend request",
            Entity::User(_) => "user",
            Entity::GroupChat(_) => "group chat",
        }
    }

    /// Whether this entity is a local placeholder awaiting its server copy.
    pub fn is_provisional(&self, prefix: &str) -> bool {
        self.id().starts_with(prefix)
    }

    /// Copy of this entity with the change from `before` to `after` undone.
    ///
    /// Posts are undone field by field (see [`Post::reverted`]); any other
    /// entity goes back to `before` only while it still equals `after`.
    pub fn reverted(&self, before: &Entity, after: &Entity) -> Entity {
        match (self, before, after) {
            (Entity::Post(current), Entity::Post(before), Entity::Post(after)) => {
                Entity::Post(current.reverted(before, after))
            }
            _ if self == after => before.clone(),
            _ => self.clone(),
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            Entity::Post(post) => Some(post),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<&FriendRequest> {
        match self {
            Entity::FriendRequest(request) => Some(request),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserSummary> {
        match self {
            Entity::User(user) => Some(user),
            _ => None,
        }
    }
}

impl From<Post> for Entity {
    fn from(post: Post) -> Self {
        Entity::Post(post)
    }
}

impl From<Comment> for Entity {
    fn from(comment: Comment) -> Self {
        Entity::Comment(comment)
    }
}

impl From<FriendRequest> for Entity {
    fn from(request: FriendRequest) -> Self {
        Entity::FriendRequest(request)
    }
}

impl From<UserSummary> for Entity {
    fn from(user: UserSummary) -> Self {
        Entity::User(user)
    }
}

impl From<GroupChat> for Entity {
    fn from(group: GroupChat) -> Self {
        Entity::GroupChat(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> UserSummary {
        UserSummary::new("u1", "Alice")
    }

    #[test]
    fn like_is_idempotent() {
        let post = Post::new("p1", UserSummary::new("u2", "Bob"), "hello");
        let liked = post.with_like(&alice()).with_like(&alice());

        assert_eq!(liked.likes.len(), 1);
        assert!(liked.is_liked_by("u1"));
        assert!(!post.is_liked_by("u1")); // original untouched
    }

    #[test]
    fn unlike_removes_only_that_user() {
        let bob = UserSummary::new("u2", "Bob");
        let post = Post::new("p1", bob.clone(), "hello")
            .with_like(&alice())
            .with_like(&bob);

        let unliked = post.without_like("u1");
        assert_eq!(unliked.likes, vec![Like::by(bob)]);
    }

    #[test]
    fn replace_comment_id_keeps_position() {
        let post = Post::new("p1", alice(), "hello")
            .with_comment("c1")
            .with_comment("temp-1")
            .with_comment("c3");

        let replaced = post.with_comment_replaced("temp-1", "c2");
        assert_eq!(replaced.comments, vec!["c1", "c2", "c3"]);

        // Already swapped, nothing moves
        let again = replaced.with_comment_replaced("temp-1", "c2");
        assert_eq!(again.comments, vec!["c1", "c2", "c3"]);

        let appended = post.with_comment_replaced("temp-9", "c4");
        assert_eq!(appended.comments, vec!["c1", "temp-1", "c3", "c4"]);
    }

    #[test]
    fn revert_undoes_only_its_own_change() {
        let bob = UserSummary::new("u2", "Bob");
        let before = Post::new("p1", bob.clone(), "hello").with_comment("c1");
        let after = before.with_like(&alice());
        // A later write added a comment and another like
        let current = after.with_comment("temp-9").with_like(&bob);

        let reverted = current.reverted(&before, &after);
        assert!(!reverted.is_liked_by("u1"));
        assert!(reverted.is_liked_by("u2"));
        assert_eq!(reverted.comments, vec!["c1", "temp-9"]);

        assert_eq!(after.reverted(&before, &after), before);
    }

    #[test]
    fn revert_of_unlike_puts_like_back_in_place() {
        let bob = UserSummary::new("u2", "Bob");
        let before = Post::new("p1", bob.clone(), "hello")
            .with_like(&alice())
            .with_like(&bob);
        let after = before.without_like("u1");

        assert_eq!(after.reverted(&before, &after), before);
    }

    #[test]
    fn provisional_detection() {
        let request = Entity::FriendRequest(FriendRequest {
            id: "temp-u2".into(),
            sender: None,
            recipient: Some(UserSummary::new("u2", "Bob")),
            status: RequestStatus::Pending,
        });
        assert!(request.is_provisional("temp-"));
        assert!(!Entity::User(alice()).is_provisional("temp-"));
    }

    #[test]
    fn decodes_wire_shape() {
        let post: Post = serde_json::from_value(json!({
            "_id": "p1",
            "user": {"_id": "u2", "fullName": "Bob"},
            "content": "hi",
            "likes": [{"user": {"_id": "u1", "fullName": "Alice"}}],
            "comments": ["c1"],
            "createdAt": "2024-02-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(post.id, "p1");
        assert_eq!(post.author.full_name, "Bob");
        assert!(post.is_liked_by("u1"));
        assert_eq!(post.comments, vec!["c1"]);
        assert!(post.created_at.is_some());
    }

    #[test]
    fn entity_is_tagged() {
        let entity = Entity::User(alice());
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["fullName"], "Alice");
        assert_eq!(entity.id(), "u1");
    }
}
