//! TaskService - API からのタスク操作
//!
//! チェーン由来の変更と同じ TaskStore・同じ KeyLocks・同じ Notifier を通す。
//! リアルタイムのクライアントからは、どちら由来の変更か区別できない。

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{
    Address, ErrorKind, MetadataPatch, Priority, StoreError, TaskId, TaskKey, TaskRecord, TaskStatus,
};
use crate::ports::{Clock, Notifier, TaskStore};
use crate::reconcile::KeyLocks;

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error("Link a wallet to your account first.")]
    NoWallet,

    #[error("Task not found")]
    NotFound,

    /// Bad patch body; the message is shown to the user.
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskServiceError::Store(e) => e.kind(),
            _ => ErrorKind::Permanent,
        }
    }
}

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyLocks>,
}

impl TaskService {
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

    /// Tasks of `wallet`, sorted by task id. No wallet, no tasks.
    pub async fn list(&self, wallet: Option<&Address>) -> Result<Vec<TaskRecord>, TaskServiceError> {
        match wallet {
            Some(owner) => Ok(self.store.list_by_owner(owner).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn patch_metadata(
        &self,
        wallet: Option<&Address>,
        task_id: TaskId,
        patch: &MetadataPatch,
    ) -> Result<TaskRecord, TaskServiceError> {
        let owner = wallet.ok_or(TaskServiceError::NoWallet)?;
        let key = TaskKey::new(owner.clone(), task_id);
        let _guard = self.locks.lock(&key).await;

        let mut record = self.store.get(&key).await?.ok_or(TaskServiceError::NotFound)?;
        if !record.apply_metadata(patch, self.clock.now()) {
            return Ok(record);
        }
        if !self.store.replace(record.clone()).await? {
            return Err(TaskServiceError::NotFound);
        }
        tracing::info!(%key, "task metadata updated");
        self.notifier.tasks_changed(owner);
        Ok(record)
    }

    pub async fn delete(&self, wallet: Option<&Address>, task_id: TaskId) -> Result<(), TaskServiceError> {
        let owner = wallet.ok_or(TaskServiceError::NoWallet)?;
        let key = TaskKey::new(owner.clone(), task_id);
        let _guard = self.locks.lock(&key).await;

        if !self.store.delete(&key).await? {
            return Err(TaskServiceError::NotFound);
        }
        tracing::info!(%key, "task deleted through api");
        self.notifier.tasks_changed(owner);
        Ok(())
    }
}

/// Parses a `PATCH .../metadata` body.
///
/// `dueDate` takes an RFC 3339 timestamp, a `YYYY-MM-DD` date (midnight UTC),
/// epoch milliseconds, or `null` to clear. An empty `category` clears it.
pub fn parse_patch(body: &Value) -> Result<MetadataPatch, TaskServiceError> {
    let invalid = |msg: &str| TaskServiceError::Invalid(msg.to_string());
    let fields = body.as_object().ok_or_else(|| invalid("Invalid request body"))?;
    let mut patch = MetadataPatch::default();

    if let Some(value) = fields.get("dueDate") {
        patch.due_date = Some(parse_due_date(value).ok_or_else(|| invalid("Invalid dueDate"))?);
    }
    if let Some(value) = fields.get("status") {
        let status = value
            .as_str()
            .and_then(|s| s.parse::<TaskStatus>().ok())
            .ok_or_else(|| invalid("Invalid status"))?;
        patch.status = Some(status);
    }
    if let Some(value) = fields.get("priority") {
        let priority = value
            .as_str()
            .and_then(|s| s.parse::<Priority>().ok())
            .ok_or_else(|| invalid("Invalid priority"))?;
        patch.priority = Some(priority);
    }
    if let Some(value) = fields.get("tags") {
        let items = value.as_array().ok_or_else(|| invalid("Tags must be an array"))?;
        let tags = items
            .iter()
            .map(|t| t.as_str().map(|s| s.trim().to_string()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| invalid("Tags must be an array of strings"))?;
        patch.tags = Some(tags.into_iter().filter(|t| !t.is_empty()).collect());
    }
    if let Some(value) = fields.get("category") {
        patch.category = Some(match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            _ => return Err(invalid("Invalid category")),
        });
    }
    Ok(patch)
}

fn parse_due_date(value: &Value) -> Option<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Some(None),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis).map(Some),
        Value::String(s) if s.trim().is_empty() => Some(None),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(at) = DateTime::parse_from_rfc3339(s) {
                return Some(Some(at.with_timezone(&Utc)));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| Some(d.and_utc()))
        }
        _ => None,
    }
}
