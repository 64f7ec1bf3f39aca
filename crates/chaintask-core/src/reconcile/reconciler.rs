//! Reconciler - デコード済みイベントを TaskStore に適用する
//!
//! # 実装
//! 1. `Plan::for_event` で対象と変更を決める（純粋）
//! 2. 対象キーのロックを取り、現在のレコードを読む
//! 3. `Change::step` で insert / replace / delete / 何もしない を決める
//! 4. 書き込み、実際に変化があったときだけ Notifier を叩く
//!
//! # 設計原則
//! - at-least-once 配送前提。同じイベントの再適用は `Unchanged` になり、
//!   書き込みも通知もしない
//! - 見つからないのはエラーではない（`Skipped(NotFound)`、debug ログ）
//! - owner を持たないイベントは task id で引き、複数ヒットなら何もしない

use std::sync::Arc;

use crate::domain::{ChainEvent, ReconcileError, StoreError, TaskId, TaskKey};
use crate::ports::{Clock, Notifier, TaskStore};

use super::locks::KeyLocks;
use super::plan::{Change, Plan, Step, Target};

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The addressed record does not exist (yet, or any more).
    NotFound,
    /// An id-only event matched records of several owners.
    AmbiguousTaskId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted,
    Updated,
    /// Identical replay, nothing written.
    Unchanged,
    Removed,
    Transferred,
    Skipped(SkipReason),
}

impl Reconciled {
    /// Whether the store was written.
    pub fn changed(self) -> bool {
        matches!(
            self,
            Reconciled::Inserted | Reconciled::Updated | Reconciled::Removed | Reconciled::Transferred
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reconciled::Inserted => "inserted",
            Reconciled::Updated => "updated",
            Reconciled::Unchanged => "unchanged",
            Reconciled::Removed => "removed",
            Reconciled::Transferred => "transferred",
            Reconciled::Skipped(SkipReason::NotFound) => "skipped_not_found",
            Reconciled::Skipped(SkipReason::AmbiguousTaskId) => "skipped_ambiguous",
        }
    }
}

pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyLocks>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            locks,
        }
    }

    pub async fn apply(&self, event: &ChainEvent) -> Result<Reconciled, ReconcileError> {
        match Plan::for_event(event) {
            Plan::Write { target, change } => {
                let key = match target {
                    Target::Key(key) => key,
                    Target::ById(task_id) => match self.resolve(task_id, event.kind()).await? {
                        Ok(key) => key,
                        Err(reason) => return Ok(Reconciled::Skipped(reason)),
                    },
                };
                self.write(key, &change, event.kind()).await
            }
            Plan::Move { from, to } => self.transfer(from, to).await,
            Plan::Nothing => Ok(Reconciled::Unchanged),
        }
    }

    /// Finds the single owner of an id-only event.
    async fn resolve(
        &self,
        task_id: TaskId,
        kind: &'static str,
    ) -> Result<Result<TaskKey, SkipReason>, StoreError> {
        let mut matches = self.store.find_by_task_id(task_id).await?;
        match matches.len() {
            0 => {
                tracing::debug!(%task_id, kind, "no record for id-only event");
                Ok(Err(SkipReason::NotFound))
            }
            1 => Ok(Ok(matches.remove(0).key())),
            n => {
                tracing::warn!(
                    %task_id,
                    kind,
                    owners = n,
                    "id-only event matches several owners, not applied"
                );
                Ok(Err(SkipReason::AmbiguousTaskId))
            }
        }
    }

    async fn write(
        &self,
        key: TaskKey,
        change: &Change,
        kind: &'static str,
    ) -> Result<Reconciled, ReconcileError> {
        let _guard = self.locks.lock(&key).await;
        let mut retried = false;
        let outcome = loop {
            let existing = self.store.get(&key).await?;
            let outcome = match change.step(&key, existing, self.clock.now()) {
                Step::Insert(record) => match self.store.insert(record).await {
                    Ok(()) => Reconciled::Inserted,
                    // another writer outside this process got there first;
                    // take the update path against what it wrote
                    Err(StoreError::Duplicate(_)) if !retried => {
                        retried = true;
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
                Step::Replace(record) => {
                    if self.store.replace(record).await? {
                        Reconciled::Updated
                    } else {
                        Reconciled::Skipped(SkipReason::NotFound)
                    }
                }
                Step::Delete => {
                    if self.store.delete(&key).await? {
                        Reconciled::Removed
                    } else {
                        Reconciled::Skipped(SkipReason::NotFound)
                    }
                }
                Step::Unchanged => Reconciled::Unchanged,
                Step::Missing => Reconciled::Skipped(SkipReason::NotFound),
            };
            break outcome;
        };

        if outcome == Reconciled::Skipped(SkipReason::NotFound) {
            tracing::debug!(%key, kind, "record not present, event is a no-op");
        }
        if outcome.changed() {
            self.notifier.tasks_changed(&key.owner);
        }
        Ok(outcome)
    }

    async fn transfer(&self, from: TaskKey, to: TaskKey) -> Result<Reconciled, ReconcileError> {
        let _guards = self.locks.lock_pair(&from, &to).await;

        if self.store.get(&from).await?.is_none() {
            tracing::debug!(%from, %to, "transfer source not present, event is a no-op");
            return Ok(Reconciled::Skipped(SkipReason::NotFound));
        }
        if self.store.get(&to).await?.is_some() {
            return Err(ReconcileError::TransferConflict { from, to });
        }
        match self.store.rekey(&from, &to, self.clock.now()).await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(Reconciled::Skipped(SkipReason::NotFound)),
            Err(StoreError::Duplicate(_)) => {
                return Err(ReconcileError::TransferConflict { from, to });
            }
            Err(e) => return Err(e.into()),
        }

        self.notifier.tasks_changed(&from.owner);
        self.notifier.tasks_changed(&to.owner);
        Ok(Reconciled::Transferred)
    }
}
