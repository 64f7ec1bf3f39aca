//! KeyLocks - (owner, task_id) ごとの非同期ロック
//!
//! # 学習ポイント
//! - グローバルロックは持たない。別キーの書き込みは完全に並行
//! - ロック表は DashMap。誰も待っていないエントリはガード解放時に消える
//! - 2 キーを取るとき（transfer）は常にキー順に取る

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::TaskKey;

type LockTable = Arc<DashMap<TaskKey, Arc<Mutex<()>>>>;

#[derive(Default)]
pub struct KeyLocks {
    table: LockTable,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &TaskKey) -> KeyGuard {
        let slot = self
            .table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.lock_owned().await;
        KeyGuard {
            table: Arc::clone(&self.table),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Locks two keys without deadlocking against another `lock_pair` on the
    /// same keys. `None` for the second guard when both keys are equal.
    pub async fn lock_pair(&self, a: &TaskKey, b: &TaskKey) -> (KeyGuard, Option<KeyGuard>) {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    /// Number of keys currently locked or waited on.
    pub fn active(&self) -> usize {
        self.table.len()
    }
}

pub struct KeyGuard {
    table: LockTable,
    key: TaskKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // release first so the strong count below only counts waiters
        drop(self.guard.take());
        self.table
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, TaskId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(owner: u8, id: u64) -> TaskKey {
        TaskKey::new(Address::from_bytes([owner; 20]), TaskId::new(id).unwrap())
    }

    #[tokio::test]
    async fn entries_are_removed_when_released() {
        let locks = KeyLocks::new();
        {
            let _g = locks.lock(&key(1, 1)).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                let _g = locks.lock(&key(1, 1)).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock(&key(1, 1)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&key(2, 1))).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn opposite_pairs_do_not_deadlock() {
        let locks = Arc::new(KeyLocks::new());
        let mut handles = Vec::new();
        for i in 0..20 {
            let locks = Arc::clone(&locks);
            handles.push(tokio::spawn(async move {
                let (a, b) = if i % 2 == 0 { (key(1, 5), key(2, 5)) } else { (key(2, 5), key(1, 5)) };
                let _guards = locks.lock_pair(&a, &b).await;
                tokio::task::yield_now().await;
            }));
        }
        let all = async {
            for h in handles {
                h.await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), all).await.unwrap();
    }
}
