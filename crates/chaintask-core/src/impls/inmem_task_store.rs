//! InMemoryTaskStore - 開発・テスト用の TaskStore
//!
//! BTreeMap<TaskKey, TaskRecord> をキー順に保持するので、
//! `list_by_owner` はオーナーごとに task_id 昇順で返せる。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::{Address, StoreError, TaskId, TaskKey, TaskRecord};
use crate::ports::TaskStore;

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<BTreeMap<TaskKey, TaskRecord>>,
    /// 書き込み失敗を注入する（障害系のテスト用）
    fail_writes: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Whole store, in key order.
    pub async fn snapshot(&self) -> Vec<TaskRecord> {
        self.records.read().await.values().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, key: &TaskKey) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn find_by_task_id(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: &Address) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|(k, _)| &k.owner == owner)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let key = record.key();
        if records.contains_key(&key) {
            return Err(StoreError::Duplicate(key.to_string()));
        }
        records.insert(key, record);
        Ok(())
    }

    async fn replace(&self, record: TaskRecord) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        match records.get_mut(&record.key()) {
            Some(slot) => {
                *slot = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError> {
        self.check_writable()?;
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn rekey(
        &self,
        from: &TaskKey,
        to: &TaskKey,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        if !records.contains_key(from) {
            return Ok(None);
        }
        if records.contains_key(to) {
            return Err(StoreError::Duplicate(to.to_string()));
        }
        let Some(record) = records.remove(from) else {
            return Ok(None);
        };
        let moved = record.rekeyed(to.owner.clone(), now);
        records.insert(to.clone(), moved.clone());
        Ok(Some(moved))
    }

    async fn due_unreminded(&self, before: DateTime<Utc>) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| !r.reminded && r.due_date.is_some_and(|d| d <= before))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }
}
