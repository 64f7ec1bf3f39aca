//! Counters for the event mirror, exposed through `/api/status`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::reconcile::Reconciled;

#[derive(Debug, Default)]
pub struct MirrorStats {
    applied: AtomicU64,
    unchanged: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    decode_failures: AtomicU64,
    /// last scanned block + 1; 0 = nothing scanned yet
    last_block: AtomicU64,
    connected: AtomicBool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub applied: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub decode_failures: u64,
    pub last_block: Option<u64>,
    pub connected: bool,
}

impl MirrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Reconciled) {
        let counter = match outcome {
            Reconciled::Unchanged => &self.unchanged,
            Reconciled::Skipped(_) => &self.skipped,
            _ => &self.applied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_block(&self, block: u64) {
        self.last_block.store(block.saturating_add(1), Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_block.load(Ordering::Relaxed);
        StatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            last_block: last.checked_sub(1),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}
