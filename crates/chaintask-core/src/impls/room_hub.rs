//! RoomHub - オーナーアドレスごとのリアルタイム配信
//!
//! # 学習ポイント
//! - ルームごとに tokio::sync::broadcast を 1 本
//! - 最初の購読で作成、最後の購読者が離れたら削除
//! - 送信は同期・非ブロッキング（受信側が遅れても送信側は待たない）

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::domain::Address;
use crate::ports::Notifier;

/// The only message type on the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomSignal {
    TasksChanged,
}

const ROOM_CAPACITY: usize = 16;

#[derive(Default)]
pub struct RoomHub {
    rooms: Mutex<HashMap<Address, broadcast::Sender<RoomSignal>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, room: &Address) -> broadcast::Receiver<RoomSignal> {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Number of live subscribers in `room`.
    pub fn subscribers(&self, room: &Address) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.get(room).map_or(0, |tx| tx.receiver_count())
    }

    /// Drops rooms nobody listens to anymore.
    pub fn prune(&self) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Notifier for RoomHub {
    fn tasks_changed(&self, owner: &Address) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = rooms.get(owner) else {
            tracing::trace!(room = %owner, "no subscribers");
            return;
        };
        if tx.send(RoomSignal::TasksChanged).is_err() {
            // 受信者ゼロ
            rooms.remove(owner);
            return;
        }
        tracing::debug!(room = %owner, "tasks_updated emitted");
    }
}
