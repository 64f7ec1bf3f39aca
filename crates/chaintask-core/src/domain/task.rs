//! Mirrored task records.
//!
//! A record is split in two halves:
//! - chain fields (`content`, `completed`) that every matching event overwrites
//! - off-chain metadata (`status`, `priority`, `tags`, `category`, `due_date`)
//!   that only the API writes, apart from the defaults set when a record is
//!   first inserted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::address::Address;
use super::ids::TaskId;

/// Store key: `(owner, task_id)` is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub owner: Address,
    pub task_id: TaskId,
}

impl TaskKey {
    pub fn new(owner: Address, task_id: TaskId) -> Self {
        Self { owner, task_id }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.task_id)
    }
}

/// Workflow status. Serialized the way API clients display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Completed,
    #[serde(rename = "On Hold", alias = "OnHold")]
    OnHold,
    Postponed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Completed => "Completed",
            TaskStatus::OnHold => "On Hold",
            TaskStatus::Postponed => "Postponed",
        }
    }

    /// Contract-side status code (`uint8`).
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Pending),
            1 => Some(TaskStatus::Completed),
            2 => Some(TaskStatus::OnHold),
            3 => Some(TaskStatus::Postponed),
            _ => None,
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "Completed" => Ok(TaskStatus::Completed),
            "On Hold" | "OnHold" => Ok(TaskStatus::OnHold),
            "Postponed" => Ok(TaskStatus::Postponed),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Priority::Low),
            "Medium" => Ok(Priority::Medium),
            "High" => Ok(Priority::High),
            other => Err(other.to_string()),
        }
    }
}

/// One mirrored task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub owner: Address,
    pub task_id: TaskId,

    pub content: String,
    pub completed: bool,

    pub status: TaskStatus,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub due_date: Option<DateTime<Utc>>,

    /// Set once the deadline reminder went out; cleared when `due_date` changes.
    #[serde(default)]
    pub reminded: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Insert path of a Created event: chain fields from the event, defaults for
    /// everything else.
    pub fn from_chain(
        key: TaskKey,
        content: String,
        completed: bool,
        due_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            owner: key.owner,
            task_id: key.task_id,
            content,
            completed,
            status: if completed {
                TaskStatus::Completed
            } else {
                TaskStatus::Pending
            },
            priority: Priority::Medium,
            tags: Vec::new(),
            category: None,
            due_date,
            reminded: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.owner.clone(), self.task_id)
    }

    /// Update path of a Created event: content and the completion flag only.
    /// Status belongs to the off-chain metadata and is left alone.
    pub fn overwrite_chain_fields(&mut self, content: &str, completed: bool, now: DateTime<Utc>) -> bool {
        let content_changed = self.set_content(content, now);
        if self.completed == completed {
            return content_changed;
        }
        self.completed = completed;
        self.updated_at = now;
        true
    }

    /// `completed=true` forces `Completed`; un-completing leaves the status
    /// alone.
    pub fn set_completion(&mut self, completed: bool, now: DateTime<Utc>) -> bool {
        let status = if completed {
            TaskStatus::Completed
        } else {
            self.status
        };
        if self.completed == completed && self.status == status {
            return false;
        }
        self.completed = completed;
        self.status = status;
        self.updated_at = now;
        true
    }

    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) -> bool {
        let completed = status == TaskStatus::Completed;
        if self.status == status && self.completed == completed {
            return false;
        }
        self.status = status;
        self.completed = completed;
        self.updated_at = now;
        true
    }

    pub fn set_content(&mut self, content: &str, now: DateTime<Utc>) -> bool {
        if self.content == content {
            return false;
        }
        self.content = content.to_string();
        self.updated_at = now;
        true
    }

    /// API-side metadata update. Returns whether anything changed.
    pub fn apply_metadata(&mut self, patch: &MetadataPatch, now: DateTime<Utc>) -> bool {
        let before = self.clone();
        if let Some(due_date) = patch.due_date {
            if self.due_date != due_date {
                self.reminded = false;
            }
            self.due_date = due_date;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if *self == before {
            return false;
        }
        self.updated_at = now;
        true
    }

    /// Same record under a new owner, off-chain metadata preserved.
    pub fn rekeyed(mut self, owner: Address, now: DateTime<Utc>) -> Self {
        self.owner = owner;
        self.updated_at = now;
        self
    }
}

/// Partial metadata update from the API.
///
/// Outer `None` = leave untouched; for `due_date` / `category`, `Some(None)`
/// clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub category: Option<Option<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }
}
