//! Plan - イベント → ストア操作の決定（純粋関数）
//!
//! I/O はしない。何を読むか（`Plan`）と、読んだ結果に対して何を書くか
//! （`Change::step`）だけを決める。実行は Reconciler がまとめて行う。

use chrono::{DateTime, Utc};

use crate::domain::{Address, ChainEvent, TaskId, TaskKey, TaskRecord, TaskStatus};

/// Which record an event addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Key(TaskKey),
    /// The event carries no owner; resolved by task id alone.
    ById(TaskId),
}

/// Change to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Upsert {
        content: String,
        completed: bool,
        due_date: Option<DateTime<Utc>>,
    },
    SetCompletion(bool),
    SetStatus(TaskStatus),
    SetContent(String),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Write { target: Target, change: Change },
    Move { from: TaskKey, to: TaskKey },
    /// Nothing to do (a transfer to the current owner).
    Nothing,
}

impl Plan {
    pub fn for_event(event: &ChainEvent) -> Self {
        match event {
            ChainEvent::Created {
                owner,
                task_id,
                content,
                completed,
                due_date,
            } => Plan::Write {
                target: Target::Key(TaskKey::new(owner.clone(), *task_id)),
                change: Change::Upsert {
                    content: content.clone(),
                    completed: *completed,
                    due_date: *due_date,
                },
            },
            ChainEvent::Completed {
                owner,
                task_id,
                completed,
            } => Plan::Write {
                target: target(owner.as_ref(), *task_id),
                change: Change::SetCompletion(*completed),
            },
            ChainEvent::StatusChanged {
                owner,
                task_id,
                status,
            } => Plan::Write {
                target: target(owner.as_ref(), *task_id),
                change: Change::SetStatus(*status),
            },
            ChainEvent::Edited {
                owner,
                task_id,
                content,
            } => Plan::Write {
                target: Target::Key(TaskKey::new(owner.clone(), *task_id)),
                change: Change::SetContent(content.clone()),
            },
            ChainEvent::Deleted { owner, task_id } => Plan::Write {
                target: Target::Key(TaskKey::new(owner.clone(), *task_id)),
                change: Change::Remove,
            },
            ChainEvent::Transferred { from, to, .. } if from == to => Plan::Nothing,
            ChainEvent::Transferred { task_id, from, to } => Plan::Move {
                from: TaskKey::new(from.clone(), *task_id),
                to: TaskKey::new(to.clone(), *task_id),
            },
        }
    }
}

fn target(owner: Option<&Address>, task_id: TaskId) -> Target {
    match owner {
        Some(owner) => Target::Key(TaskKey::new(owner.clone(), task_id)),
        None => Target::ById(task_id),
    }
}

/// The store operation a change resolves to once the current record is known.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Insert(TaskRecord),
    Replace(TaskRecord),
    Delete,
    Unchanged,
    Missing,
}

impl Change {
    pub fn step(&self, key: &TaskKey, existing: Option<TaskRecord>, now: DateTime<Utc>) -> Step {
        let Some(mut record) = existing else {
            return match self {
                Change::Upsert {
                    content,
                    completed,
                    due_date,
                } => Step::Insert(TaskRecord::from_chain(
                    key.clone(),
                    content.clone(),
                    *completed,
                    *due_date,
                    now,
                )),
                _ => Step::Missing,
            };
        };
        let changed = match self {
            Change::Upsert {
                content, completed, ..
            } => record.overwrite_chain_fields(content, *completed, now),
            Change::SetCompletion(completed) => record.set_completion(*completed, now),
            Change::SetStatus(status) => record.set_status(*status, now),
            Change::SetContent(content) => record.set_content(content, now),
            Change::Remove => return Step::Delete,
        };
        if changed {
            Step::Replace(record)
        } else {
            Step::Unchanged
        }
    }
}
