//! Mutation Executor - drives a mutation through its lifecycle.
//!
//! # Lifecycle
//!
//! 1. **Applying**: lock every affected view, capture snapshots, compute and
//!    write the speculative values (one atomic step)
//! 2. **InFlight**: await the remote operation, the only suspension point
//! 3. **Committing**: merge the authoritative data into the current values
//! 4. **RollingBack**: put the captured values back (see [`RollbackPolicy`])
//! 5. **Settled**: run settle effects, clear pending markers, emit a notice
//!
//! Remote failures never escape `run`; they end as
//! [`MutationResult::RolledBack`].

use crate::config::{ExecutorConfig, RollbackPolicy};
use crate::mutation::{ApplyFn, ReconcileFn, RemoteOp};
use crate::snapshot::{self, SnapshotSet, SpeculativeWrite};
use crate::store::{Batch, WriteOrigin};
use crate::{
    error::Result, Error, Mutation, MutationId, MutationOutcome, MutationResult, MutationState,
    Notice, NoticeLevel, SettleEffect, SnapshotManager, ViewKey, ViewStore, ViewWrites,
};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Runs mutations against a shared [`ViewStore`].
#[derive(Debug)]
pub struct MutationExecutor {
    store: Arc<ViewStore>,
    config: ExecutorConfig,
    /// In-flight targets, mapped to the mutation that owns them
    pending: DashMap<String, MutationId>,
    notices: broadcast::Sender<Notice>,
    /// Captured and speculative values of every in-flight mutation
    in_flight: DashMap<MutationId, InFlight>,
}

/// What a mutation captured and wrote while applying.
#[derive(Debug, Clone)]
struct InFlight {
    snapshot: SnapshotSet,
    speculative: BTreeMap<ViewKey, SpeculativeWrite>,
}

impl MutationExecutor {
    /// Create an executor over `store`.
    pub fn new(store: Arc<ViewStore>, config: ExecutorConfig) -> Self {
        let (notices, _) = broadcast::channel(config.notice_capacity.max(1));
        Self {
            store,
            config,
            pending: DashMap::new(),
            notices,
            in_flight: DashMap::new(),
        }
    }

    /// Create an executor wrapped in Arc for sharing.
    pub fn new_shared(store: Arc<ViewStore>, config: ExecutorConfig) -> Arc<Self> {
        Arc::new(Self::new(store, config))
    }

    pub fn store(&self) -> &Arc<ViewStore> {
        &self.store
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// A snapshot manager over the same store.
    pub fn snapshots(&self) -> SnapshotManager {
        SnapshotManager::new(self.store.clone())
    }

    /// Subscribe to user-facing notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Whether a mutation targeting `target` is in flight.
    pub fn is_pending(&self, target: &str) -> bool {
        self.pending.contains_key(target)
    }

    /// Targets of every in-flight mutation.
    pub fn pending_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        targets.sort();
        targets
    }

    /// Run a mutation on a background task.
    ///
    /// The mutation settles even if the handle is dropped.
    pub fn spawn(self: &Arc<Self>, mutation: Mutation) -> JoinHandle<MutationOutcome> {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run(mutation).await })
    }

    /// Drive `mutation` to `Settled` and report how it ended.
    pub async fn run(&self, mutation: Mutation) -> MutationOutcome {
        let Mutation {
            id,
            name,
            affected,
            apply,
            remote,
            reconcile,
            settle,
            pending_target,
            success_message,
            failure_message,
        } = mutation;

        let mut transitions = vec![MutationState::Created];
        tracing::debug!(mutation_id = %id, name = %name, views = affected.len(), "mutation created");

        if let Some(target) = &pending_target {
            self.pending.insert(target.clone(), id.clone());
        }

        let mut abandoned = Abandoned {
            executor: self,
            id: &id,
            affected: &affected,
            pending_target: pending_target.as_deref(),
            armed: true,
        };
        let result = self
            .drive(&id, &affected, apply, remote, reconcile, &mut transitions)
            .await;
        abandoned.armed = false;
        drop(abandoned);

        transitions.push(MutationState::Settled);
        self.settle(&id, &settle, pending_target.as_deref());

        let notice = match &result {
            MutationResult::Committed(_) => Notice {
                mutation_id: id.clone(),
                level: NoticeLevel::Success,
                message: success_message,
            },
            MutationResult::RolledBack(error) if !error.message.trim().is_empty() => Notice {
                mutation_id: id.clone(),
                level: NoticeLevel::Error,
                message: error.message.clone(),
            },
            MutationResult::RolledBack(_) | MutationResult::Aborted(_) => Notice {
                mutation_id: id.clone(),
                level: NoticeLevel::Error,
                message: failure_message,
            },
        };
        if self.notices.send(notice.clone()).is_err() {
            tracing::trace!(mutation_id = %id, "no subscribers for notice");
        }

        tracing::debug!(mutation_id = %id, name = %name, "mutation settled");

        MutationOutcome {
            id,
            name,
            result,
            transitions,
            notice,
        }
    }

    async fn drive(
        &self,
        id: &MutationId,
        affected: &[ViewKey],
        apply: ApplyFn,
        remote: RemoteOp,
        reconcile: ReconcileFn,
        transitions: &mut Vec<MutationState>,
    ) -> MutationResult {
        transitions.push(MutationState::Applying);
        let applied = self.store.batch(affected, |batch| {
            let snapshot = SnapshotManager::capture_in(batch, affected);
            let writes = apply(&snapshot.values())?;
            let speculative = write_views(batch, affected, writes, WriteOrigin::Speculative)?;
            let count = speculative.len();
            self.in_flight.insert(id.clone(), InFlight { snapshot, speculative });
            Ok::<_, Error>(count)
        });

        let written = match applied {
            Ok(written) => written,
            Err(error) => {
                // Writes are all-or-nothing, so there is nothing to restore
                transitions.push(MutationState::RollingBack);
                tracing::warn!(mutation_id = %id, error = %error, "speculative apply failed, mutation aborted");
                return MutationResult::Aborted(error);
            }
        };

        transitions.push(MutationState::InFlight);
        tracing::debug!(mutation_id = %id, written, "speculative values applied");

        match remote().await {
            Ok(data) => {
                transitions.push(MutationState::Committing);
                let reconciled = self.store.batch(affected, |batch| {
                    self.in_flight.remove(id);
                    let current = SnapshotManager::capture_in(batch, affected).values();
                    let writes = reconcile(&data, &current);
                    let written = write_views(batch, affected, writes, WriteOrigin::Reconciled);
                    if written.is_err() {
                        invalidate_loaded(batch, affected);
                    }
                    written
                });
                match reconciled {
                    Ok(written) => {
                        tracing::info!(mutation_id = %id, written = written.len(), "mutation committed")
                    }
                    Err(error) => {
                        tracing::error!(mutation_id = %id, error = %error, "reconcile rejected, affected views marked stale")
                    }
                }
                MutationResult::Committed(data)
            }
            Err(error) => {
                transitions.push(MutationState::RollingBack);
                tracing::warn!(
                    mutation_id = %id,
                    status = ?error.status,
                    error = %error,
                    policy = ?self.config.rollback_policy,
                    "remote operation failed, rolling back"
                );
                self.store.batch(affected, |batch| self.roll_back_in(batch, id));
                MutationResult::RolledBack(error)
            }
        }
    }

    /// Put back what mutation `id` captured, as the rollback policy says.
    fn roll_back_in(&self, batch: &mut Batch<'_>, id: &MutationId) {
        let Some((_, own)) = self.in_flight.remove(id) else {
            return;
        };
        match self.config.rollback_policy {
            RollbackPolicy::Guarded => {
                SnapshotManager::restore_guarded_in(batch, &own.snapshot, &own.speculative);
                self.rebase_in_flight(&own);
            }
            RollbackPolicy::LastSettleWins => SnapshotManager::restore_in(batch, &own.snapshot),
        }
    }

    /// Take a rolled-back mutation's change out of every other in-flight
    /// mutation's captured values, so their own rollbacks cannot bring it back.
    ///
    /// Must run while the rolled-back mutation's views are locked.
    fn rebase_in_flight(&self, undone: &InFlight) {
        for mut entry in self.in_flight.iter_mut() {
            let other = entry.value_mut();
            snapshot::rebase(
                &mut other.snapshot,
                &mut other.speculative,
                &undone.snapshot,
                &undone.speculative,
            );
        }
    }

    fn settle(&self, id: &MutationId, effects: &[SettleEffect], pending_target: Option<&str>) {
        for effect in effects {
            match effect {
                SettleEffect::Invalidate(key) => self.store.invalidate(key),
            }
        }
        if let Some(target) = pending_target {
            // A newer mutation on the same target keeps its marker
            self.pending.remove_if(target, |_, owner| owner == id);
        }
    }
}

/// Rolls a mutation back if its `run` future is dropped before it settles,
/// so no placeholder or speculative value outlives it.
struct Abandoned<'a> {
    executor: &'a MutationExecutor,
    id: &'a MutationId,
    affected: &'a [ViewKey],
    pending_target: Option<&'a str>,
    armed: bool,
}

impl Drop for Abandoned<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (executor, id) = (self.executor, self.id);
        tracing::warn!(mutation_id = %id, "mutation dropped before settling, rolling back");
        executor
            .store
            .batch(self.affected, |batch| executor.roll_back_in(batch, id));
        if let Some(target) = self.pending_target {
            executor.pending.remove_if(target, |_, owner| owner == id);
        }
    }
}

/// Write a mutation's values into the locked views.
///
/// Every key is checked before the first write, so a bad key leaves the
/// views untouched. Speculative values for unloaded views are dropped;
/// authoritative values seed them, flagged stale since they hold only what
/// this one response carried.
fn write_views(
    batch: &mut Batch<'_>,
    affected: &[ViewKey],
    writes: ViewWrites,
    origin: WriteOrigin,
) -> Result<BTreeMap<ViewKey, SpeculativeWrite>> {
    if let Some(key) = writes.keys().find(|key| !affected.contains(key)) {
        return Err(Error::UndeclaredView(key.clone()));
    }

    let mut written = BTreeMap::new();
    for (key, view) in writes {
        let view = match batch.get(&key) {
            Some(_) => view,
            None if origin == WriteOrigin::Speculative => {
                tracing::trace!(view = %key, "view not loaded, speculative value dropped");
                continue;
            }
            None => view.marked_stale(),
        };
        let value = Arc::new(view);
        let revision = batch.write(&key, Some(value.clone()), origin);
        written.insert(key, SpeculativeWrite { value, revision });
    }
    Ok(written)
}

/// Flag every loaded view in `keys` stale, leaving its entities as they are.
fn invalidate_loaded(batch: &mut Batch<'_>, keys: &[ViewKey]) {
    for key in keys {
        if let Some(view) = batch.get(key) {
            if !view.is_stale() {
                batch.write(key, Some(Arc::new(view.marked_stale())), WriteOrigin::Invalidated);
            }
        }
    }
}
