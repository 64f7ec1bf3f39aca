//! LogReminderSink - リマインダーを tracing に出すだけの ReminderSink
//!
//! 実際の push 配送は別プロセス（あるいは将来の実装）の責務。

use async_trait::async_trait;

use crate::domain::{TaskRecord, UserRecord};
use crate::ports::{ReminderError, ReminderSink};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogReminderSink;

#[async_trait]
impl ReminderSink for LogReminderSink {
    async fn remind(&self, user: &UserRecord, task: &TaskRecord) -> Result<(), ReminderError> {
        tracing::info!(
            user = %user.id,
            username = %user.username,
            owner = %task.owner,
            task_id = %task.task_id,
            due = ?task.due_date,
            "deadline reminder: \"{}\" is due soon",
            task.content
        );
        Ok(())
    }
}
