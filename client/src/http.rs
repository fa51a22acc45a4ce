//! [`Remote`] over the social API's HTTP endpoints.
//!
//! Responses are JSON objects wrapping the payload in a named field
//! (`{"post": ..}`, `{"friends": [..]}`); failures carry `{"message": ..}`.

use crate::config::Config;
use async_trait::async_trait;
use optimist_engine::{
    Authoritative, Comment, Entity, FriendRequest, GroupChat, MutationKind, Post, Remote,
    RemoteError, UserSummary, ViewKey,
};
use reqwest::multipart::Form;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// HTTP implementation of the remote API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Where a mutation is sent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Route {
    pub method: Method,
    pub path: String,
    pub body: Option<Body>,
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Body {
    Json(Value),
    /// Text fields sent as `multipart/form-data`
    Form(Vec<(&'static str, String)>),
}

impl HttpRemote {
    pub fn new(config: &Config) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// End the server session.
    pub async fn logout(&self) -> Result<(), RemoteError> {
        self.send(Method::POST, "user/logout", None).await.map(|_| ())
    }

    async fn send(&self, method: Method, path: &str, body: Option<Body>) -> Result<Value, RemoteError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match body {
            Some(Body::Json(value)) => request = request.json(&value),
            Some(Body::Form(fields)) => {
                let form = fields
                    .into_iter()
                    .fold(Form::new(), |form, (name, value)| form.text(name, value));
                request = request.multipart(form);
            }
            None => {}
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(%method, path, error = %e, "request failed");
            RemoteError::transport(e.to_string())
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::new(Some(status.as_u16()), e.to_string()))?;
        let payload: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if status.is_success() {
            tracing::debug!(%method, path, status = status.as_u16(), "request succeeded");
            return Ok(payload);
        }

        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::debug!(%method, path, status = status.as_u16(), message = %message, "request rejected");
        Err(RemoteError::new(Some(status.as_u16()), message))
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn execute(&self, request: &MutationKind) -> Result<Authoritative, RemoteError> {
        let route = route(request);
        let payload = self.send(route.method, &route.path, route.body).await?;
        Ok(decode_authoritative(request, &payload))
    }

    async fn fetch(&self, key: &ViewKey) -> Result<Vec<Entity>, RemoteError> {
        let (path, field) = fetch_route(key);
        let payload = self.send(Method::GET, &path, None).await?;
        decode_entities(key, field, payload)
            .map_err(|e| RemoteError::new(None, format!("unexpected {key} response: {e}")))
    }
}

pub(crate) fn route(kind: &MutationKind) -> Route {
    let (method, path, body) = match kind {
        MutationKind::LikePost { post_id, .. } => (Method::POST, format!("posts/like/{post_id}"), None),
        MutationKind::UnlikePost { post_id, .. } => {
            (Method::DELETE, format!("posts/unlike/{post_id}"), None)
        }
        MutationKind::AddComment {
            post_id, content, ..
        } => (
            Method::POST,
            format!("posts/comment/{post_id}"),
            Some(Body::Json(json!({ "content": content }))),
        ),
        MutationKind::DeletePost { post_id, .. } => (Method::DELETE, format!("posts/{post_id}"), None),
        MutationKind::CreatePost { content, image } => {
            let mut fields = Vec::new();
            if !content.is_empty() {
                fields.push(("content", content.clone()));
            }
            if let Some(image) = image {
                fields.push(("image", image.clone()));
            }
            (Method::POST, "posts/create".to_string(), Some(Body::Form(fields)))
        }
        MutationKind::SendFriendRequest { user_id } => {
            (Method::POST, format!("user/friend-request/{user_id}"), None)
        }
        MutationKind::CancelFriendRequest { request_id } => (
            Method::DELETE,
            format!("user/cancel-friend-request/{request_id}"),
            None,
        ),
        MutationKind::AcceptFriendRequest { request_id } => (
            Method::POST,
            format!("user/accept-friend-request/{request_id}"),
            None,
        ),
        MutationKind::RejectFriendRequest { request_id } => (
            Method::DELETE,
            format!("user/reject-friend-request/{request_id}"),
            None,
        ),
        MutationKind::CreateGroup { name, member_ids } => (
            Method::POST,
            "chats/create-group".to_string(),
            Some(Body::Json(json!({ "name": name, "members": member_ids }))),
        ),
    };
    Route { method, path, body }
}

/// Path and payload field of a view's list endpoint.
pub(crate) fn fetch_route(key: &ViewKey) -> (String, &'static str) {
    match key {
        ViewKey::FriendsFeed => ("posts/friends".to_string(), "posts"),
        ViewKey::UserPosts(user_id) => (format!("user/posts/{user_id}"), "posts"),
        ViewKey::Comments(post_id) => (format!("posts/comments/{post_id}"), "comments"),
        ViewKey::Friends => ("user/friends".to_string(), "friends"),
        ViewKey::IncomingRequests => ("user/friend-requests".to_string(), "friendRequests"),
        ViewKey::OutgoingRequests => ("user/getOutgoingFriendRequests".to_string(), "outgoingRequests"),
        ViewKey::RecommendedUsers => ("user/recommendations".to_string(), "users"),
        ViewKey::GroupChats => ("chats/groups".to_string(), "groups"),
    }
}

pub(crate) fn decode_entities(
    key: &ViewKey,
    field: &str,
    payload: Value,
) -> serde_json::Result<Vec<Entity>> {
    let items = match payload {
        Value::Object(mut fields) => fields.remove(field).unwrap_or(Value::Null),
        other => other,
    };
    if items.is_null() {
        return Ok(Vec::new());
    }

    match key {
        ViewKey::FriendsFeed | ViewKey::UserPosts(_) => list::<Post>(items),
        ViewKey::Comments(_) => list::<Comment>(items),
        ViewKey::Friends | ViewKey::RecommendedUsers => list::<UserSummary>(items),
        ViewKey::IncomingRequests | ViewKey::OutgoingRequests => list::<FriendRequest>(items),
        ViewKey::GroupChats => list::<GroupChat>(items),
    }
}

fn list<T>(items: Value) -> serde_json::Result<Vec<Entity>>
where
    T: DeserializeOwned + Into<Entity>,
{
    let items: Vec<T> = serde_json::from_value(items)?;
    Ok(items.into_iter().map(Into::into).collect())
}

/// Pick the server-confirmed data out of a mutation response.
///
/// A body without the expected fields is treated as a bare success.
pub(crate) fn decode_authoritative(kind: &MutationKind, payload: &Value) -> Authoritative {
    let data = match kind {
        MutationKind::LikePost { .. }
        | MutationKind::UnlikePost { .. }
        | MutationKind::CreatePost { .. } => field::<Post>(payload, &["post"]).map(Authoritative::entity),
        MutationKind::AddComment { .. } => {
            field::<Comment>(payload, &["comment"]).map(|comment| Authoritative::PostWithComment {
                post: field(payload, &["post"]),
                comment,
            })
        }
        MutationKind::SendFriendRequest { .. } => {
            field::<FriendRequest>(payload, &["friendRequest", "request"]).map(Authoritative::entity)
        }
        MutationKind::AcceptFriendRequest { .. } => field::<UserSummary>(payload, &["friend", "user"])
            .map(Authoritative::entity)
            .or_else(|| {
                field::<FriendRequest>(payload, &["friendRequest", "request"])
                    .map(Authoritative::entity)
            }),
        MutationKind::CreateGroup { .. } => {
            field::<GroupChat>(payload, &["group", "groupChat", "chat"]).map(Authoritative::entity)
        }
        MutationKind::DeletePost { .. }
        | MutationKind::CancelFriendRequest { .. }
        | MutationKind::RejectFriendRequest { .. } => None,
    };

    data.unwrap_or(Authoritative::Empty)
}

fn field<T: DeserializeOwned>(payload: &Value, names: &[&str]) -> Option<T> {
    let (name, value) = names
        .iter()
        .find_map(|name| payload.get(*name).map(|value| (*name, value)))?;
    match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(field = name, error = %e, "ignoring undecodable response field");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_routes() {
        let like = route(&MutationKind::LikePost {
            post_id: "p1".into(),
            author_id: "u2".into(),
        });
        assert_eq!(like.method, Method::POST);
        assert_eq!(like.path, "posts/like/p1");
        assert_eq!(like.body, None);

        let comment = route(&MutationKind::AddComment {
            post_id: "p1".into(),
            author_id: "u2".into(),
            content: "nice".into(),
        });
        assert_eq!(comment.body, Some(Body::Json(json!({ "content": "nice" }))));

        let reject = route(&MutationKind::RejectFriendRequest {
            request_id: "r1".into(),
        });
        assert_eq!(reject.method, Method::DELETE);
        assert_eq!(reject.path, "user/reject-friend-request/r1");

        let group = route(&MutationKind::CreateGroup {
            name: "Hiking".into(),
            member_ids: vec!["u2".into(), "u3".into()],
        });
        assert_eq!(group.path, "chats/create-group");
        assert_eq!(
            group.body,
            Some(Body::Json(json!({ "name": "Hiking", "members": ["u2", "u3"] })))
        );

        let post = route(&MutationKind::CreatePost {
            content: "hello".into(),
            image: None,
        });
        assert_eq!((post.method, post.path.as_str()), (Method::POST, "posts/create"));
        assert_eq!(post.body, Some(Body::Form(vec![("content", "hello".to_string())])));
    }

    #[test]
    fn fetch_routes() {
        assert_eq!(
            fetch_route(&ViewKey::UserPosts("u1".into())),
            ("user/posts/u1".to_string(), "posts")
        );
        assert_eq!(
            fetch_route(&ViewKey::OutgoingRequests),
            ("user/getOutgoingFriendRequests".to_string(), "outgoingRequests")
        );
    }

    #[test]
    fn decode_wire_posts() {
        let payload = json!({
            "posts": [{
                "_id": "p1",
                "user": { "_id": "u2", "fullName": "Bob" },
                "content": "hello",
                "likes": [{ "user": { "_id": "u1", "fullName": "Alice" } }],
                "comments": ["c1"]
            }]
        });

        let entities = decode_entities(&ViewKey::FriendsFeed, "posts", payload).unwrap();

        let post = entities[0].as_post().unwrap();
        assert_eq!(post.author.full_name, "Bob");
        assert!(post.is_liked_by("u1"));
        assert_eq!(post.comments, vec!["c1"]);
    }

    #[test]
    fn decode_missing_list_as_empty() {
        let entities = decode_entities(&ViewKey::GroupChats, "groups", json!({})).unwrap();
        assert!(entities.is_empty());

        let err = decode_entities(&ViewKey::Friends, "friends", json!({ "friends": 3 }));
        assert!(err.is_err());
    }

    #[test]
    fn decode_comment_response() {
        let kind = MutationKind::AddComment {
            post_id: "p1".into(),
            author_id: "u2".into(),
            content: "nice".into(),
        };
        let payload = json!({
            "comment": { "_id": "c9", "user": { "_id": "u1", "fullName": "Alice" }, "content": "nice" }
        });

        match decode_authoritative(&kind, &payload) {
            Authoritative::PostWithComment { post, comment } => {
                assert!(post.is_none());
                assert_eq!(comment.id, "c9");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_falls_back_to_empty() {
        let kind = MutationKind::LikePost {
            post_id: "p1".into(),
            author_id: "u2".into(),
        };
        assert_eq!(
            decode_authoritative(&kind, &json!({ "message": "ok" })),
            Authoritative::Empty
        );
        assert_eq!(
            decode_authoritative(&kind, &json!({ "post": "not a post" })),
            Authoritative::Empty
        );
    }
}
