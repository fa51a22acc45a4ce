//! View keys and view values.

use crate::{Entity, EntityId, Error, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one client-local view.
///
/// Keys are totally ordered; multi-view steps lock their slots in this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ViewKey {
    /// Posts from the acting user's friends
    FriendsFeed,
    /// Posts on one user's profile
    UserPosts(UserId),
    /// Comments on one post
    Comments(EntityId),
    Friends,
    IncomingRequests,
    OutgoingRequests,
    RecommendedUsers,
    GroupChats,
}

impl ViewKey {
    /// Views holding posts, the ones a post mutation must keep in step.
    pub fn is_post_view(&self) -> bool {
        matches!(self, ViewKey::FriendsFeed | ViewKey::UserPosts(_))
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKey::FriendsFeed => f.write_str("friendsFeed"),
            ViewKey::UserPosts(user_id) => write!(f, "userPosts:{user_id}"),
            ViewKey::Comments(post_id) => write!(f, "comments:{post_id}"),
            ViewKey::Friends => f.write_str("friends"),
            ViewKey::IncomingRequests => f.write_str("incomingRequests"),
            ViewKey::OutgoingRequests => f.write_str("outgoingRequests"),
            ViewKey::RecommendedUsers => f.write_str("recommendedUsers"),
            ViewKey::GroupChats => f.write_str("groupChats"),
        }
    }
}

impl FromStr for ViewKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s.split_once(':') {
            Some(("userPosts", id)) if !id.is_empty() => ViewKey::UserPosts(id.to_string()),
            Some(("comments", id)) if !id.is_empty() => ViewKey::Comments(id.to_string()),
            Some(_) => return Err(Error::UnknownViewKey(s.to_string())),
            None => match s {
                "friendsFeed" => ViewKey::FriendsFeed,
                "friends" => ViewKey::Friends,
                "incomingRequests" => ViewKey::IncomingRequests,
                "outgoingRequests" => ViewKey::OutgoingRequests,
                "recommendedUsers" => ViewKey::RecommendedUsers,
                "groupChats" => ViewKey::GroupChats,
                _ => return Err(Error::UnknownViewKey(s.to_string())),
            },
        };
        Ok(key)
    }
}

impl From<ViewKey> for String {
    fn from(key: ViewKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ViewKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The materialized value of one view: an ordered list of entities.
///
/// Every modifier returns a new `View`; the stored value is shared behind an
/// `Arc` and never changes once written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    entities: Vec<Entity>,
    /// Set when the view should be refetched before it is trusted again
    #[serde(default)]
    stale: bool,
}

impl View {
    /// Create a fresh view from entities.
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            stale: false,
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Get an entity by ID.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id() == id)
    }

    /// Index of the entity with this ID.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.entities.iter().position(|e| e.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Ids in view order.
    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.iter().map(Entity::id)
    }

    /// Copy of this view flagged stale.
    pub fn marked_stale(&self) -> View {
        View {
            entities: self.entities.clone(),
            stale: true,
        }
    }

    /// Copy with `entity` replacing the one with the same ID, or appended.
    pub fn upserted(&self, entity: Entity) -> View {
        let mut view = self.clone();
        match view.position(entity.id()) {
            Some(index) => view.entities[index] = entity,
            None => view.entities.push(entity),
        }
        view
    }

    /// Copy with `entity` placed at `index` (clamped), replacing any entity
    /// with the same ID.
    pub fn inserted_at(&self, index: usize, entity: Entity) -> View {
        let mut view = self.without(entity.id());
        let index = index.min(view.entities.len());
        view.entities.insert(index, entity);
        view
    }

    /// Copy without the entity with this ID. Removing a missing ID is a no-op.
    pub fn without(&self, id: &str) -> View {
        let mut view = self.clone();
        view.entities.retain(|e| e.id() != id);
        view
    }

    /// Copy keeping only entities matching `keep`.
    pub fn retained(&self, keep: impl Fn(&Entity) -> bool) -> View {
        let mut view = self.clone();
        view.entities.retain(|e| keep(e));
        view
    }

    /// Copy with the entity `id` replaced by `f(entity)`. Missing IDs are a no-op.
    pub fn mapped<E>(&self, id: &str, f: impl FnOnce(&Entity) -> Result<Entity, E>) -> Result<View, E> {
        let mut view = self.clone();
        if let Some(index) = view.position(id) {
            let replaced = f(&view.entities[index])?;
            view.entities[index] = replaced;
        }
        Ok(view)
    }
}

impl FromIterator<Entity> for View {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        View::new(iter.into_iter().collect())
    }
}
