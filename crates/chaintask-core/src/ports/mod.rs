//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（台帳ノード、ドキュメントストア、リアルタイム配信）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod id_generator;
pub mod log_source;
pub mod notifier;
pub mod reminder_sink;
pub mod task_store;
pub mod user_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::log_source::{LogFilter, LogSource, RawLog, SourceError};
pub use self::notifier::Notifier;
pub use self::reminder_sink::{ReminderError, ReminderSink};
pub use self::task_store::TaskStore;
pub use self::user_store::UserStore;
