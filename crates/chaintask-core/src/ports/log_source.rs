//! LogSource port - 台帳ノードからのログ取得
//!
//! # 実装
//! - JsonRpcLogSource（`eth_blockNumber` / `eth_getLogs`）
//! - テストではスクリプト化したフェイク

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Address, ErrorKind};

/// A raw log entry, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: String,
}

/// `eth_getLogs`-shaped filter: one contract, topic 0 in `topics`, inclusive
/// block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Transport(_) => ErrorKind::Transient,
            SourceError::Rpc { .. } => ErrorKind::Infrastructure,
            SourceError::InvalidResponse(_) => ErrorKind::Permanent,
        }
    }
}

#[async_trait]
pub trait LogSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, SourceError>;

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, SourceError>;
}
