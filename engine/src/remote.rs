//! The Remote Collaborator contract.
//!
//! The engine never talks to the network itself. An implementation of
//! [`Remote`] performs the request and reports authoritative data or an error.

use crate::{Comment, Entity, MutationKind, Post, ViewKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failed remote call: the server rejected it or it never reached the server.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    /// HTTP status, when the server answered
    pub status: Option<u16>,
    /// Human readable reason
    pub message: String,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Error for a request that never got an answer.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

/// Server-confirmed data returned by a successful remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Authoritative {
    /// A single entity
    Entity { entity: Entity },
    /// A list of entities
    Entities { entities: Vec<Entity> },
    /// A new comment, plus the updated post when the server returns it
    PostWithComment {
        post: Option<Post>,
        comment: Comment,
    },
    /// Success without a body
    Empty,
}

impl Authoritative {
    pub fn entity(entity: impl Into<Entity>) -> Self {
        Authoritative::Entity {
            entity: entity.into(),
        }
    }

    /// Every entity carried, in order.
    pub fn entities(&self) -> Vec<Entity> {
        match self {
            Authoritative::Entity { entity } => vec![entity.clone()],
            Authoritative::Entities { entities } => entities.clone(),
            Authoritative::PostWithComment { post, comment } => post
                .iter()
                .cloned()
                .map(Entity::Post)
                .chain(std::iter::once(Entity::Comment(comment.clone())))
                .collect(),
            Authoritative::Empty => Vec::new(),
        }
    }
}

/// The remote data API.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Perform a mutation on the server.
    async fn execute(&self, request: &MutationKind) -> Result<Authoritative, RemoteError>;

    /// Load the authoritative contents of a view.
    async fn fetch(&self, key: &ViewKey) -> Result<Vec<Entity>, RemoteError>;
}
