//! App - アプリケーション層
//!
//! このモジュールは、ports と各コンポーネントを組み合わせてミラー全体を組み立てます。
//!
//! # 主要コンポーネント
//! - **MirrorBuilder**: 構築とワイヤリング（Fail-fast）
//! - **ReminderLoop**: 期限リマインダーの定期実行
//! - **MirrorStatus**: `/api/status` 用のスナップショット

pub mod builder;
pub mod reminder_loop;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Mirror, MirrorBuilder};
pub use self::reminder_loop::{ReminderConfig, ReminderHandle, ReminderLoop};
pub use self::status::MirrorStatus;
