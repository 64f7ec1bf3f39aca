//! Reconcile - イベントの冪等な適用
//!
//! - **plan**: イベント → 対象キーと変更（純粋）
//! - **locks**: (owner, task_id) 単位の直列化
//! - **reconciler**: 実行・エラー分類・通知

pub mod locks;
pub mod plan;
pub mod reconciler;

pub use self::locks::{KeyGuard, KeyLocks};
pub use self::plan::{Change, Plan, Step, Target};
pub use self::reconciler::{Reconciled, Reconciler, SkipReason};
