//! ReminderSink port - 期限リマインダーの送信先
//!
//! 配送手段（web push など）はこのクレートの関心外。

use async_trait::async_trait;

use crate::domain::{TaskRecord, UserRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reminder delivery failed: {0}")]
pub struct ReminderError(pub String);

#[async_trait]
pub trait ReminderSink: Send + Sync {
    /// Called only for users that have a push subscription.
    async fn remind(&self, user: &UserRecord, task: &TaskRecord) -> Result<(), ReminderError>;
}
