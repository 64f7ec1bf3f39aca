//! chaintask-core
//!
//! Core of the on-chain task mirror: contract events in, an idempotent
//! off-chain task store out, with realtime "tasks changed" signals.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, address, task, user, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, UserStore, LogSource, Notifier, ReminderSink, Clock, IdGenerator）
//! - **impls**: 実装（SQLite / in-memory ストア、JSON-RPC ソース、RoomHub など）
//! - **decode**: 生ログ → ChainEvent
//! - **reconcile**: ChainEvent → ストア操作（冪等、キー単位で直列化）
//! - **source**: ログ購読のライフサイクルとポーリング
//! - **service**: アカウント・認証・API からのタスク操作
//! - **app**: ワイヤリング、リマインダー、ステータス

pub mod app;
pub mod decode;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod reconcile;
pub mod service;
pub mod source;
