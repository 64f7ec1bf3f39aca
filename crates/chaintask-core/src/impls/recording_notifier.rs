//! RecordingNotifier - 送られたシグナルを記録するだけの Notifier（テスト用）

use std::sync::Mutex;

use crate::domain::Address;
use crate::ports::Notifier;

#[derive(Default)]
pub struct RecordingNotifier {
    rooms: Mutex<Vec<Address>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms signalled so far, in order.
    pub fn rooms(&self) -> Vec<Address> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count_for(&self, room: &Address) -> usize {
        self.rooms().iter().filter(|r| *r == room).count()
    }

    pub fn clear(&self) {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn tasks_changed(&self, owner: &Address) {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(owner.clone());
    }
}
