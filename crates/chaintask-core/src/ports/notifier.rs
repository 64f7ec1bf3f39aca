//! Notifier port - "tasks changed" シグナルの配信
//!
//! ルームは小文字化されたオーナーアドレス。

use crate::domain::Address;

/// Notifier はオーナーのルームに購読中の全セッションへシグナルを送る
///
/// # 設計原則
/// - 同期・非ブロッキング（ストア書き込みのコミット後に呼ばれる）
/// - 失敗しない。購読者がいないのはエラーではない
pub trait Notifier: Send + Sync {
    fn tasks_changed(&self, owner: &Address);
}
