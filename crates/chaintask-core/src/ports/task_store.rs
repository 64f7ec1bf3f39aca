//! TaskStore port - ミラーされたタスクの正本（source of truth）
//!
//! # 実装
//! - InMemoryTaskStore（テスト・開発用）
//! - SqliteStore（本番用）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Address, StoreError, TaskId, TaskKey, TaskRecord};

/// TaskStore は `(owner, task_id)` をキーにしたドキュメントストア
///
/// # 設計原則
/// - `(owner, task_id)` の一意性はストアが保証する（`insert` / `rekey` は
///   `StoreError::Duplicate` を返す）
/// - 条件付き書き込み（`$setOnInsert` 相当）には頼らない。
///   insert と replace を呼び分けるのは呼び出し側の責務
/// - 同一キーへの書き込みの直列化も呼び出し側（KeyLocks）の責務
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, key: &TaskKey) -> Result<Option<TaskRecord>, StoreError>;

    /// Every record carrying `task_id`, regardless of owner.
    async fn find_by_task_id(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, StoreError>;

    /// Sorted by task id.
    async fn list_by_owner(&self, owner: &Address) -> Result<Vec<TaskRecord>, StoreError>;

    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError>;

    /// Overwrites the record with the same key. `false` when no such record.
    async fn replace(&self, record: TaskRecord) -> Result<bool, StoreError>;

    /// `false` when nothing was deleted.
    async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError>;

    /// Moves `from` to `to.owner`, keeping everything else. `Ok(None)` when
    /// `from` is absent, `Duplicate` when `to` is occupied.
    async fn rekey(
        &self,
        from: &TaskKey,
        to: &TaskKey,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError>;

    /// Tasks with `due_date <= before` that were not reminded yet.
    async fn due_unreminded(&self, before: DateTime<Utc>) -> Result<Vec<TaskRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
