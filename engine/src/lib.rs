//! # Optimist Engine
//!
//! An optimistic mutation cache coordinator for a social feed client.
//!
//! The client keeps several denormalized views of the same entities (a
//! friends feed, a profile's posts, a post's comments, the friend lists).
//! This crate applies a user action to every affected view *before* the
//! server confirms it, keeps those views consistent while the request is in
//! flight, and undoes the change everywhere if the server rejects it.
//!
//! ## Design Principles
//!
//! - **No network IO**: the remote API is reached only through the [`Remote`] trait
//! - **Atomic multi-view steps**: every step of a mutation locks all of its views at once
//! - **Authoritative data wins**: server data always supersedes speculative values
//! - **Testable**: the lifecycle is an explicit state machine with typed outcomes
//!
//! ## Core Concepts
//!
//! ### Views
//!
//! A [`View`] is a named, client-local list of [`Entity`] values, addressed by a
//! [`ViewKey`] such as `friendsFeed` or `comments:{postId}`. Views live in the
//! [`ViewStore`], which serializes writes per key.
//!
//! ### Mutations
//!
//! A [`Mutation`] declares the views it touches, a speculative `apply`, the
//! remote operation, and a `reconcile` step. The [`MutationExecutor`] drives it:
//!
//! ```text
//! Created -> Applying -> InFlight -> Committing  -> Settled
//!                                 \-> RollingBack -> Settled
//! ```
//!
//! ### Projection
//!
//! The [`Projector`] turns a [`MutationKind`] (like, comment, friend request...)
//! into a [`Mutation`] that touches every view holding the affected entities.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use optimist_engine::{
//!     ExecutorConfig, MutationExecutor, MutationKind, Projector, Remote, UserSummary, ViewStore,
//! };
//!
//! async fn like(remote: Arc<dyn Remote>) {
//!     let store = ViewStore::new_shared();
//!     let executor = MutationExecutor::new(store.clone(), ExecutorConfig::default());
//!     let projector = Projector::new(UserSummary::new("u1", "Alice"), "temp-");
//!
//!     let kind = MutationKind::LikePost {
//!         post_id: "p1".into(),
//!         author_id: "u2".into(),
//!     };
//!     let outcome = executor.run(projector.project(kind, remote)).await;
//!     assert!(outcome.is_settled());
//! }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod kind;
pub mod mutation;
pub mod projector;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod view;

// Re-export main types at crate root
pub use config::{ExecutorConfig, RollbackPolicy, DEFAULT_PROVISIONAL_PREFIX};
pub use entity::{Comment, Entity, FriendRequest, GroupChat, Like, Post, RequestStatus, UserSummary};
pub use error::Error;
pub use executor::MutationExecutor;
pub use fetch::Fetcher;
pub use kind::MutationKind;
pub use mutation::{
    Mutation, MutationOutcome, MutationResult, MutationState, Notice, NoticeLevel, SettleEffect,
    ViewValues, ViewWrites,
};
pub use projector::{Projection, Projector};
pub use remote::{Authoritative, Remote, RemoteError};
pub use snapshot::{Snapshot, SnapshotManager, SnapshotSet, SpeculativeWrite};
pub use store::{StoreEvent, ViewStore, WriteOrigin};
pub use view::{View, ViewKey};

/// Type aliases for clarity
pub type EntityId = String;
pub type UserId = String;
pub type MutationId = String;
pub type Revision = u64;
