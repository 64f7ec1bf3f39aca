//! Errors - エラー型と分類
//!
//! どのエラーもホストプロセスを止めません。分類（ErrorKind）はログレベルと
//! 「再配送で回復しうるか」の判断にだけ使います。

use thiserror::Error;

use super::task::TaskKey;

/// ErrorKind は運用上の分類
///
/// - Transient: 再配送・再試行で回復しうる
/// - Permanent: 同じ入力では何度やっても失敗する（ABI 不一致など）
/// - Infrastructure: ストアやノードの障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// A log that matched a known signature but could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Wrong field count, bad padding, bad offsets, invalid UTF-8, ...
    #[error("malformed {event} payload: {reason}")]
    Malformed { event: &'static str, reason: String },

    /// A numeric field does not fit the host representation.
    #[error("{event}.{field} overflows the safe integer range")]
    Overflow {
        event: &'static str,
        field: &'static str,
    },
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store write failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Duplicate(_) => ErrorKind::Permanent,
            StoreError::Backend(_) => ErrorKind::Infrastructure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The destination of a transfer is already occupied.
    #[error("transfer conflict: {to} already exists (from {from})")]
    TransferConflict { from: TaskKey, to: TaskKey },
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Store(e) => e.kind(),
            ReconcileError::TransferConflict { .. } => ErrorKind::Permanent,
        }
    }
}
