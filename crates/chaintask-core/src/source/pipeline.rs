//! Pipeline - 生ログのバッチを decode → reconcile する
//!
//! # 実装
//! - バッチは task id ごとのレーンに分ける
//! - レーン内はチェーン上の順序で直列、レーン同士は並列（JoinSet）
//! - バッチ全体が終わるまで戻らない（カーソルを進めるのはその後）
//!
//! ログレベルはエラー分類に合わせる：
//! decode 失敗・TransferConflict は warn、ストア障害は error、
//! 見つからないだけなら debug、適用できたら info。

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::decode::EventDecoder;
use crate::domain::{DecodedLog, ErrorKind, ReconcileError, TaskId};
use crate::ports::RawLog;
use crate::reconcile::{Reconciled, Reconciler};

use super::stats::MirrorStats;

pub struct Pipeline {
    decoder: EventDecoder,
    reconciler: Arc<Reconciler>,
    stats: Arc<MirrorStats>,
}

impl Pipeline {
    pub fn new(decoder: EventDecoder, reconciler: Arc<Reconciler>, stats: Arc<MirrorStats>) -> Self {
        Self {
            decoder,
            reconciler,
            stats,
        }
    }

    pub fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    pub fn stats(&self) -> &Arc<MirrorStats> {
        &self.stats
    }

    /// Decodes, counting and logging failures. `None` for ignored or bad logs.
    pub fn decode(&self, log: &RawLog) -> Option<DecodedLog> {
        match self.decoder.decode(log) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.record_decode_failure();
                tracing::warn!(
                    block = log.block_number,
                    log_index = log.log_index,
                    tx = %log.tx_hash,
                    error = %e,
                    "dropping undecodable log"
                );
                None
            }
        }
    }

    /// Applies one event and records the outcome. Never fails.
    pub async fn apply(&self, decoded: &DecodedLog) {
        let event = &decoded.event;
        let kind = event.kind();
        let task_id = event.task_id();
        let block = decoded.position.block_number;

        match self.reconciler.apply(event).await {
            Ok(outcome) => {
                self.stats.record(outcome);
                match outcome {
                    Reconciled::Unchanged | Reconciled::Skipped(_) => tracing::debug!(
                        kind,
                        %task_id,
                        block,
                        outcome = outcome.as_str(),
                        "event had no effect"
                    ),
                    _ => tracing::info!(
                        kind,
                        %task_id,
                        block,
                        outcome = outcome.as_str(),
                        "event applied"
                    ),
                }
            }
            Err(e) => {
                self.stats.record_rejected();
                log_rejection(&e, kind, task_id, block, &decoded.position.tx_hash);
            }
        }
    }

    /// Applies a block-ordered batch. Returns once every lane finished.
    pub async fn process_batch(self: &Arc<Self>, logs: &[RawLog]) {
        let mut lanes: BTreeMap<TaskId, Vec<DecodedLog>> = BTreeMap::new();
        for log in logs {
            if let Some(decoded) = self.decode(log) {
                lanes.entry(decoded.event.task_id()).or_default().push(decoded);
            }
        }

        let mut set = JoinSet::new();
        for (_, lane) in lanes {
            let pipeline = Arc::clone(self);
            set.spawn(async move {
                for decoded in &lane {
                    pipeline.apply(decoded).await;
                }
            });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "reconciliation lane aborted");
            }
        }
    }
}

fn log_rejection(e: &ReconcileError, kind: &'static str, task_id: TaskId, block: u64, tx: &str) {
    match e {
        ReconcileError::TransferConflict { .. } => tracing::warn!(
            kind,
            %task_id,
            block,
            tx,
            error = %e,
            "transfer target already exists, mirror may be stale"
        ),
        ReconcileError::Store(_) if e.kind() == ErrorKind::Infrastructure => tracing::error!(
            kind,
            %task_id,
            block,
            tx,
            error = %e,
            "store write failed, event lost unless redelivered"
        ),
        ReconcileError::Store(_) => tracing::warn!(
            kind,
            %task_id,
            block,
            tx,
            error = %e,
            "store rejected event"
        ),
    }
}
