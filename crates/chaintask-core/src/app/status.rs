//! Status - ミラーの状態（`GET /api/status`）

use serde::Serialize;

use crate::domain::Address;
use crate::source::StatsSnapshot;

/// Point-in-time view of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorStatus {
    pub contract: Address,
    /// Whether the event source is polling.
    pub running: bool,
    /// Records currently in the task store.
    pub tasks: usize,
    #[serde(flatten)]
    pub events: StatsSnapshot,
}
