//! Events - 契約イベントのドメイン表現
//!
//! デコード済みのイベントは閉じた enum で表します。
//! コントラクトのバリアントごとに名前や引数順は違いますが、意味はこの集合に収まります。

use chrono::{DateTime, Utc};

use super::address::Address;
use super::ids::TaskId;
use super::task::TaskStatus;

/// Where a log came from. Kept for logging only; never part of a store key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: String,
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    Created {
        owner: Address,
        task_id: TaskId,
        content: String,
        completed: bool,
        due_date: Option<DateTime<Utc>>,
    },
    /// `owner` is `None` for contract variants that omit it.
    Completed {
        owner: Option<Address>,
        task_id: TaskId,
        completed: bool,
    },
    StatusChanged {
        owner: Option<Address>,
        task_id: TaskId,
        status: TaskStatus,
    },
    Edited {
        owner: Address,
        task_id: TaskId,
        content: String,
    },
    Deleted {
        owner: Address,
        task_id: TaskId,
    },
    Transferred {
        task_id: TaskId,
        from: Address,
        to: Address,
    },
}

impl ChainEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            ChainEvent::Created { task_id, .. }
            | ChainEvent::Completed { task_id, .. }
            | ChainEvent::StatusChanged { task_id, .. }
            | ChainEvent::Edited { task_id, .. }
            | ChainEvent::Deleted { task_id, .. }
            | ChainEvent::Transferred { task_id, .. } => *task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::Created { .. } => "created",
            ChainEvent::Completed { .. } => "completed",
            ChainEvent::StatusChanged { .. } => "status_changed",
            ChainEvent::Edited { .. } => "edited",
            ChainEvent::Deleted { .. } => "deleted",
            ChainEvent::Transferred { .. } => "transferred",
        }
    }
}

/// An event together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub event: ChainEvent,
    pub position: LogPosition,
}
