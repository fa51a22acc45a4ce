//! The user actions the client can perform optimistically.

use crate::{EntityId, Post, UserId, UserSummary, ViewKey};
use serde::{Deserialize, Serialize};

/// A user action, and at the same time the request sent to the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum MutationKind {
    LikePost {
        post_id: EntityId,
        author_id: UserId,
    },
    UnlikePost {
        post_id: EntityId,
        author_id: UserId,
    },
    AddComment {
        post_id: EntityId,
        author_id: UserId,
        content: String,
    },
    DeletePost {
        post_id: EntityId,
        author_id: UserId,
    },
    /// Publish a post as the acting user; `image` is an uploaded image's URL
    CreatePost {
        content: String,
        image: Option<String>,
    },
    SendFriendRequest {
        user_id: UserId,
    },
    CancelFriendRequest {
        request_id: EntityId,
    },
    AcceptFriendRequest {
        request_id: EntityId,
    },
    RejectFriendRequest {
        request_id: EntityId,
    },
    CreateGroup {
        name: String,
        member_ids: Vec<UserId>,
    },
}

impl MutationKind {
    /// Like or unlike `post`, depending on whether `me` already likes it.
    pub fn toggle_like(post: &Post, me: &UserSummary) -> Self {
        let post_id = post.id.clone();
        let author_id = post.author.id.clone();
        if post.is_liked_by(&me.id) {
            MutationKind::UnlikePost { post_id, author_id }
        } else {
            MutationKind::LikePost { post_id, author_id }
        }
    }

    /// Stable name, used in logs and notices.
    pub fn name(&self) -> &'static str {
        match self {
            MutationKind::LikePost { .. } => "likePost",
            MutationKind::UnlikePost { .. } => "unlikePost",
            MutationKind::AddComment { .. } => "addComment",
            MutationKind::DeletePost { .. } => "deletePost",
            MutationKind::CreatePost { .. } => "createPost",
            MutationKind::SendFriendRequest { .. } => "sendFriendRequest",
            MutationKind::CancelFriendRequest { .. } => "cancelFriendRequest",
            MutationKind::AcceptFriendRequest { .. } => "acceptFriendRequest",
            MutationKind::RejectFriendRequest { .. } => "rejectFriendRequest",
            MutationKind::CreateGroup { .. } => "createGroup",
        }
    }

    /// Every view this action must keep consistent, for the acting user `me`.
    pub fn affected_views(&self, me: &str) -> Vec<ViewKey> {
        let mut keys = match self {
            MutationKind::LikePost { author_id, .. }
            | MutationKind::UnlikePost { author_id, .. }
            | MutationKind::DeletePost { author_id, .. } => post_views(author_id, me),
            MutationKind::AddComment {
                post_id, author_id, ..
            } => {
                let mut keys = vec![ViewKey::Comments(post_id.clone())];
                keys.extend(post_views(author_id, me));
                keys
            }
            MutationKind::CreatePost { .. } => post_views(me, me),
            MutationKind::SendFriendRequest { .. } | MutationKind::CancelFriendRequest { .. } => {
                vec![ViewKey::OutgoingRequests, ViewKey::RecommendedUsers]
            }
            MutationKind::AcceptFriendRequest { .. } => vec![
                ViewKey::IncomingRequests,
                ViewKey::Friends,
                ViewKey::RecommendedUsers,
            ],
            MutationKind::RejectFriendRequest { .. } => {
                vec![ViewKey::IncomingRequests, ViewKey::RecommendedUsers]
            }
            MutationKind::CreateGroup { .. } => vec![ViewKey::GroupChats],
        };
        keys.sort();
        keys.dedup();
        keys
    }

    /// Id the UI shows as "in progress" while the action is in flight.
    pub fn target(&self) -> Option<&str> {
        match self {
            MutationKind::LikePost { post_id, .. }
            | MutationKind::UnlikePost { post_id, .. }
            | MutationKind::AddComment { post_id, .. }
            | MutationKind::DeletePost { post_id, .. } => Some(post_id),
            MutationKind::SendFriendRequest { user_id } => Some(user_id),
            MutationKind::CancelFriendRequest { request_id }
            | MutationKind::AcceptFriendRequest { request_id }
            | MutationKind::RejectFriendRequest { request_id } => Some(request_id),
            MutationKind::CreatePost { .. } | MutationKind::CreateGroup { .. } => None,
        }
    }

    /// Views refetched once the action settles, whatever its result.
    pub fn invalidates(&self) -> Vec<ViewKey> {
        match self {
            MutationKind::LikePost { .. }
            | MutationKind::UnlikePost { .. }
            | MutationKind::AddComment { .. }
            | MutationKind::DeletePost { .. } => Vec::new(),
            MutationKind::CreatePost { .. } => vec![ViewKey::FriendsFeed],
            MutationKind::SendFriendRequest { .. }
            | MutationKind::CancelFriendRequest { .. }
            | MutationKind::AcceptFriendRequest { .. }
            | MutationKind::RejectFriendRequest { .. }
            | MutationKind::CreateGroup { .. } => self.affected_views(""),
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            MutationKind::LikePost { .. } => "Post liked",
            MutationKind::UnlikePost { .. } => "Post unliked",
            MutationKind::AddComment { .. } => "Comment added",
            MutationKind::DeletePost { .. } => "Post deleted",
            MutationKind::CreatePost { .. } => "Post created successfully",
            MutationKind::SendFriendRequest { .. } => "Friend request sent",
            MutationKind::CancelFriendRequest { .. } => "Friend request cancelled",
            MutationKind::AcceptFriendRequest { .. } => "Friend request accepted",
            MutationKind::RejectFriendRequest { .. } => "Friend request rejected",
            MutationKind::CreateGroup { .. } => "Group created successfully",
        }
    }

    /// Fallback message when the server gives no reason.
    pub fn failure_message(&self) -> &'static str {
        match self {
            MutationKind::LikePost { .. } => "Failed to like post",
            MutationKind::UnlikePost { .. } => "Failed to unlike post",
            MutationKind::AddComment { .. } => "Failed to add comment",
            MutationKind::DeletePost { .. } => "Failed to delete post",
            MutationKind::CreatePost { .. } => "Failed to create post",
            MutationKind::SendFriendRequest { .. } => "Failed to send friend request",
            MutationKind::CancelFriendRequest { .. } => "Failed to cancel friend request",
            MutationKind::AcceptFriendRequest { .. } => "Failed to accept friend request",
            MutationKind::RejectFriendRequest { .. } => "Failed to reject friend request",
            MutationKind::CreateGroup { .. } => "Failed to create group",
        }
    }
}

fn post_views(author_id: &str, me: &str) -> Vec<ViewKey> {
    vec![
        ViewKey::FriendsFeed,
        ViewKey::UserPosts(author_id.to_string()),
        ViewKey::UserPosts(me.to_string()),
    ]
}
