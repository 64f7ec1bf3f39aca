//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteStore**: TaskStore / UserStore の本番用実装
//! - **InMemoryTaskStore / InMemoryUserStore**: テスト・開発用
//! - **JsonRpcLogSource**: 台帳ノードへの JSON-RPC クライアント
//! - **RoomHub**: オーナーごとの broadcast ルーム（Notifier）
//! - **RecordingNotifier**: テスト用 Notifier
//! - **LogReminderSink**: リマインダーをログに出すだけの ReminderSink

pub mod inmem_task_store;
pub mod inmem_user_store;
pub mod json_rpc_source;
pub mod log_reminder_sink;
pub mod recording_notifier;
pub mod room_hub;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::inmem_user_store::InMemoryUserStore;
pub use self::json_rpc_source::JsonRpcLogSource;
pub use self::log_reminder_sink::LogReminderSink;
pub use self::recording_notifier::RecordingNotifier;
pub use self::room_hub::{RoomHub, RoomSignal};
pub use self::sqlite_store::SqliteStore;
