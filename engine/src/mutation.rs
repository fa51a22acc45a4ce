//! Mutation types: one optimistic state change and its lifecycle outcome.
//!
//! A [`Mutation`] is built from closures so that any state change can be
//! expressed, not only the ones the [`crate::Projector`] knows about. It exists
//! only while the [`crate::MutationExecutor`] drives it.

use crate::{error::Result, Authoritative, Error, MutationId, RemoteError, View, ViewKey};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Current values of a mutation's views (`None` = not loaded).
pub type ViewValues = BTreeMap<ViewKey, Option<Arc<View>>>;

/// New values a mutation wants written.
pub type ViewWrites = BTreeMap<ViewKey, View>;

/// Computes speculative values from the current ones.
pub type ApplyFn = Box<dyn FnOnce(&ViewValues) -> Result<ViewWrites> + Send>;

/// Starts the remote operation.
pub type RemoteOp = Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<Authoritative, RemoteError>> + Send>;

/// Merges authoritative data into the current values.
pub type ReconcileFn = Box<dyn FnOnce(&Authoritative, &ViewValues) -> ViewWrites + Send>;

/// Lifecycle state of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationState {
    Created,
    Applying,
    InFlight,
    Committing,
    RollingBack,
    Settled,
}

/// Side effect run when a mutation settles, whatever its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleEffect {
    /// Mark a view stale so it is refetched
    Invalidate(ViewKey),
}

/// One optimistic state change.
pub struct Mutation {
    pub(crate) id: MutationId,
    pub(crate) name: String,
    pub(crate) affected: Vec<ViewKey>,
    pub(crate) apply: ApplyFn,
    pub(crate) remote: RemoteOp,
    pub(crate) reconcile: ReconcileFn,
    pub(crate) settle: Vec<SettleEffect>,
    pub(crate) pending_target: Option<String>,
    pub(crate) success_message: String,
    pub(crate) failure_message: String,
}

impl Mutation {
    /// Create a mutation over `affected` views that runs `remote` and writes
    /// nothing until `with_apply` / `with_reconcile` say otherwise.
    pub fn new<F>(name: impl Into<String>, affected: Vec<ViewKey>, remote: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, std::result::Result<Authoritative, RemoteError>>
            + Send
            + 'static,
    {
        let name = name.into();
        let mut affected = affected;
        affected.sort();
        affected.dedup();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            success_message: format!("{name} succeeded"),
            failure_message: format!("{name} failed"),
            name,
            affected,
            apply: Box::new(|_| Ok(ViewWrites::new())),
            remote: Box::new(remote),
            reconcile: Box::new(|_, _| ViewWrites::new()),
            settle: Vec::new(),
            pending_target: None,
        }
    }

    /// Set the speculative projection.
    pub fn with_apply<F>(mut self, apply: F) -> Self
    where
        F: FnOnce(&ViewValues) -> Result<ViewWrites> + Send + 'static,
    {
        self.apply = Box::new(apply);
        self
    }

    /// Set the authoritative merge.
    pub fn with_reconcile<F>(mut self, reconcile: F) -> Self
    where
        F: FnOnce(&Authoritative, &ViewValues) -> ViewWrites + Send + 'static,
    {
        self.reconcile = Box::new(reconcile);
        self
    }

    /// Add a side effect run at settle.
    pub fn with_settle(mut self, effect: SettleEffect) -> Self {
        self.settle.push(effect);
        self
    }

    /// Mark `target` as pending while the mutation is in flight.
    pub fn with_pending(mut self, target: impl Into<String>) -> Self {
        self.pending_target = Some(target.into());
        self
    }

    /// Set the notice texts for success and for failures without a server reason.
    pub fn with_messages(mut self, success: impl Into<String>, failure: impl Into<String>) -> Self {
        self.success_message = success.into();
        self.failure_message = failure.into();
        self
    }

    pub fn id(&self) -> &MutationId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The views this mutation may write, sorted.
    pub fn affected_views(&self) -> &[ViewKey] {
        &self.affected
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("affected", &self.affected)
            .field("settle", &self.settle)
            .field("pending_target", &self.pending_target)
            .finish_non_exhaustive()
    }
}

/// How a mutation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResult {
    /// The server confirmed it; views hold the reconciled values
    Committed(Authoritative),
    /// The server rejected it; views were rolled back
    RolledBack(RemoteError),
    /// The speculative step failed; nothing was written or sent
    Aborted(Error),
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// User-facing notification emitted when a mutation settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub mutation_id: MutationId,
    pub level: NoticeLevel,
    pub message: String,
}

/// The record of one mutation's run.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub id: MutationId,
    pub name: String,
    pub result: MutationResult,
    /// Every state entered, in order
    pub transitions: Vec<MutationState>,
    pub notice: Notice,
}

impl MutationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self.result, MutationResult::Committed(_))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self.result, MutationResult::RolledBack(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.result, MutationResult::Aborted(_))
    }

    pub fn final_state(&self) -> MutationState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(MutationState::Created)
    }

    pub fn is_settled(&self) -> bool {
        self.final_state() == MutationState::Settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn new_mutation_deduplicates_views() {
        let mutation = Mutation::new(
            "noop",
            vec![ViewKey::Friends, ViewKey::FriendsFeed, ViewKey::Friends],
            || async { Ok(Authoritative::Empty) }.boxed(),
        );

        assert_eq!(
            mutation.affected_views(),
            &[ViewKey::FriendsFeed, ViewKey::Friends]
        );
        assert_eq!(mutation.name(), "noop");
        assert!(!mutation.id().is_empty());
    }

    #[test]
    fn builder_sets_fields() {
        let mutation = Mutation::new("noop", vec![], || async { Ok(Authoritative::Empty) }.boxed())
            .with_pending("r1")
            .with_settle(SettleEffect::Invalidate(ViewKey::Friends))
            .with_messages("done", "oops");

        assert_eq!(mutation.pending_target.as_deref(), Some("r1"));
        assert_eq!(mutation.settle, vec![SettleEffect::Invalidate(ViewKey::Friends)]);
        assert_eq!(mutation.success_message, "done");
        assert_eq!(mutation.failure_message, "oops");
    }

    #[test]
    fn outcome_final_state() {
        let outcome = MutationOutcome {
            id: "m1".into(),
            name: "noop".into(),
            result: MutationResult::Committed(Authoritative::Empty),
            transitions: vec![MutationState::Created, MutationState::Settled],
            notice: Notice {
                mutation_id: "m1".into(),
                level: NoticeLevel::Success,
                message: "ok".into(),
            },
        };
        assert!(outcome.is_settled());
        assert!(outcome.is_committed());
        assert!(!outcome.is_rolled_back());
    }
}
