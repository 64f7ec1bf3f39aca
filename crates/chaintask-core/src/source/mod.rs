//! Source - 台帳ログの購読ライフサイクル
//!
//! # 実装
//! - `EventSource` は購読を表す明示的なオブジェクト。`start` / `stop` は冪等
//! - ポーリングループは `watch` チャネルで停止を受け取る
//! - `stop` は実行中のバッチ（進行中の reconcile）が終わるのを待ってから戻る
//!
//! # 再接続
//! 取得に失敗したら warn を出して切断扱いにする。次に成功したとき、
//! カーソルを `rescan_overlap` ブロック巻き戻して取り直す（at-least-once）。

pub mod pipeline;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::ports::{LogFilter, LogSource, SourceError};

pub use self::pipeline::Pipeline;
pub use self::stats::{MirrorStats, StatsSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// First block to scan. `None` = start at the current safe head.
    pub start_block: Option<u64>,
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub confirmations: u64,
    pub rescan_overlap: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            start_block: None,
            poll_interval: Duration::from_millis(2_000),
            max_block_range: 2_000,
            confirmations: 0,
            rescan_overlap: 20,
        }
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct EventSource {
    source: Arc<dyn LogSource>,
    pipeline: Arc<Pipeline>,
    config: SourceConfig,
    running: Mutex<Option<Running>>,
}

impl EventSource {
    pub fn new(source: Arc<dyn LogSource>, pipeline: Arc<Pipeline>, config: SourceConfig) -> Self {
        Self {
            source,
            pipeline,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> &Arc<MirrorStats> {
        self.pipeline.stats()
    }

    /// Starts polling. `false` when already running.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(
            Arc::clone(&self.source),
            Arc::clone(&self.pipeline),
            self.config.clone(),
        );
        let interval = self.config.poll_interval;
        let join = tokio::spawn(poll_loop(poller, interval, shutdown_rx));
        *running = Some(Running { shutdown_tx, join });
        tracing::info!(contract = %self.pipeline.decoder().contract(), "event source started");
        true
    }

    /// Stops polling and waits for the current batch to finish. No-op when
    /// not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        // ignore send error: the loop may already be gone
        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.join.await {
            tracing::error!(error = %e, "event source task ended abnormally");
        }
        self.stats().set_connected(false);
        tracing::info!("event source stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn poll_loop(mut poller: Poller, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // バッチは shutdown と競合させない（書き込みの途中で止めない）
        let behind = match poller.tick().await {
            Ok(behind) => behind,
            Err(e) => {
                poller.disconnected(&e);
                false
            }
        };
        if behind {
            continue;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Block cursor and the logic of one polling step.
struct Poller {
    source: Arc<dyn LogSource>,
    pipeline: Arc<Pipeline>,
    config: SourceConfig,
    /// First block not scanned yet.
    next_block: Option<u64>,
    rewind: bool,
}

impl Poller {
    fn new(source: Arc<dyn LogSource>, pipeline: Arc<Pipeline>, config: SourceConfig) -> Self {
        let next_block = config.start_block;
        Self {
            source,
            pipeline,
            config,
            next_block,
            rewind: false,
        }
    }

    fn disconnected(&mut self, e: &SourceError) {
        let stats = self.pipeline.stats();
        if self.next_block.is_some() {
            self.rewind = true;
        }
        stats.set_connected(false);
        tracing::warn!(error = %e, kind = ?e.kind(), next_block = ?self.next_block, "log source unavailable");
    }

    /// Scans one range. `Ok(true)` when still behind the safe head.
    async fn tick(&mut self) -> Result<bool, SourceError> {
        let head = self.source.block_number().await?;
        let safe = head.saturating_sub(self.config.confirmations);

        let mut next = match self.next_block {
            Some(next) => next,
            None => {
                tracing::info!(safe_head = safe, "no start block configured, following from head");
                self.next_block = Some(safe + 1);
                self.pipeline.stats().set_last_block(safe);
                self.pipeline.stats().set_connected(true);
                return Ok(false);
            }
        };
        if self.rewind {
            let from = next.saturating_sub(self.config.rescan_overlap);
            tracing::info!(from, to = next, "source reconnected, rescanning recent blocks");
            next = from;
            self.rewind = false;
        }
        self.next_block = Some(next);
        self.pipeline.stats().set_connected(true);

        if next > safe {
            return Ok(false);
        }
        let to = safe.min(next.saturating_add(self.config.max_block_range.max(1) - 1));

        let decoder = self.pipeline.decoder();
        let filter = LogFilter {
            address: decoder.contract().clone(),
            topics: decoder.topics(),
            from_block: next,
            to_block: to,
        };
        let mut logs = self.source.logs(&filter).await?;
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        if !logs.is_empty() {
            tracing::debug!(from = next, to, logs = logs.len(), "fetched logs");
        }

        self.pipeline.process_batch(&logs).await;
        self.next_block = Some(to + 1);
        self.pipeline.stats().set_last_block(to);
        Ok(to < safe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::EventDecoder;
    use crate::decode::abi::encode::{Token, data};
    use crate::decode::signatures::topic0;
    use crate::domain::{Address, StoreError, TaskId, TaskKey, TaskRecord};
    use crate::impls::{InMemoryTaskStore, RecordingNotifier};
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;
    use crate::ports::{RawLog, SystemClock, TaskStore};
    use crate::reconcile::{KeyLocks, Reconciler};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    const CONTRACT: [u8; 20] = [0xc0; 20];
    const OWNER: [u8; 20] = [0xa1; 20];

    /// Log source driven by the test: a head, a list of logs, and injected
    /// transport failures.
    #[derive(Default)]
    struct ScriptedSource {
        head: AtomicU64,
        logs: StdMutex<Vec<RawLog>>,
        fail_next: AtomicUsize,
        ranges: StdMutex<Vec<(u64, u64)>>,
    }

    impl ScriptedSource {
        fn set_head(&self, head: u64) {
            self.head.store(head, Ordering::SeqCst);
        }

        fn push(&self, log: RawLog) {
            self.logs.lock().unwrap().push(log);
        }

        fn ranges(&self) -> Vec<(u64, u64)> {
            self.ranges.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LogSource for ScriptedSource {
        async fn block_number(&self) -> Result<u64, SourceError> {
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SourceError::Transport("connection reset".into()));
            }
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, SourceError> {
            self.ranges.lock().unwrap().push((filter.from_block, filter.to_block));
            let logs = self.logs.lock().unwrap();
            // newest first, to check that the poller sorts
            Ok(logs
                .iter()
                .rev()
                .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
                .cloned()
                .collect())
        }
    }

    /// Task store whose inserts park until the test releases them.
    #[derive(Default)]
    struct GatedStore {
        inner: InMemoryTaskStore,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TaskStore for GatedStore {
        async fn get(&self, key: &TaskKey) -> Result<Option<TaskRecord>, StoreError> {
            self.inner.get(key).await
        }

        async fn find_by_task_id(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, StoreError> {
            self.inner.find_by_task_id(task_id).await
        }

        async fn list_by_owner(&self, owner: &Address) -> Result<Vec<TaskRecord>, StoreError> {
            self.inner.list_by_owner(owner).await
        }

        async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.insert(record).await
        }

        async fn replace(&self, record: TaskRecord) -> Result<bool, StoreError> {
            self.inner.replace(record).await
        }

        async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn rekey(
            &self,
            from: &TaskKey,
            to: &TaskKey,
            now: DateTime<Utc>,
        ) -> Result<Option<TaskRecord>, StoreError> {
            self.inner.rekey(from, to, now).await
        }

        async fn due_unreminded(&self, before: DateTime<Utc>) -> Result<Vec<TaskRecord>, StoreError> {
            self.inner.due_unreminded(before).await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            self.inner.count().await
        }
    }

    fn created(id: u128, block: u64) -> RawLog {
        RawLog {
            address: Address::from_bytes(CONTRACT),
            topics: vec![topic0("TaskCreated(uint256,string,bool,address)")],
            data: data(&[Token::Uint(id), Token::Str("t"), Token::Bool(false), Token::Address(OWNER)]),
            block_number: block,
            log_index: 0,
            tx_hash: format!("0x{block:x}"),
        }
    }

    fn completed(id: u128, block: u64, index: u64) -> RawLog {
        RawLog {
            address: Address::from_bytes(CONTRACT),
            topics: vec![topic0("TaskCompleted(uint256,bool)")],
            data: data(&[Token::Uint(id), Token::Bool(true)]),
            block_number: block,
            log_index: index,
            tx_hash: format!("0x{block:x}{index:x}"),
        }
    }

    struct Fixture {
        source: Arc<ScriptedSource>,
        store: Arc<InMemoryTaskStore>,
        pipeline: Arc<Pipeline>,
    }

    fn pipeline_over(store: Arc<dyn TaskStore>) -> Arc<Pipeline> {
        let reconciler = Reconciler::new(
            store,
            Arc::new(RecordingNotifier::new()),
            Arc::new(SystemClock),
            Arc::new(KeyLocks::new()),
        );
        Arc::new(Pipeline::new(
            EventDecoder::new(Address::from_bytes(CONTRACT)),
            Arc::new(reconciler),
            Arc::new(MirrorStats::new()),
        ))
    }

    fn fixture() -> Fixture {
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(InMemoryTaskStore::new());
        let pipeline = pipeline_over(store.clone());
        Fixture {
            source,
            store,
            pipeline,
        }
    }

    fn config(start_block: Option<u64>) -> SourceConfig {
        SourceConfig {
            start_block,
            poll_interval: Duration::from_millis(10),
            max_block_range: 10,
            confirmations: 0,
            rescan_overlap: 5,
        }
    }

    fn poller(f: &Fixture, config: SourceConfig) -> Poller {
        Poller::new(f.source.clone(), f.pipeline.clone(), config)
    }

    async fn completed_flag(f: &Fixture, id: u64) -> Option<bool> {
        let key = TaskKey::new(Address::from_bytes(OWNER), TaskId::new(id).unwrap());
        f.store.get(&key).await.unwrap().map(|r| r.completed)
    }

    #[tokio::test]
    async fn scans_in_bounded_ranges_until_caught_up() {
        let f = fixture();
        f.source.set_head(25);
        let mut p = poller(&f, config(Some(0)));

        assert!(p.tick().await.unwrap());
        assert!(p.tick().await.unwrap());
        assert!(!p.tick().await.unwrap());
        assert!(!p.tick().await.unwrap());
        assert_eq!(f.source.ranges(), vec![(0, 9), (10, 19), (20, 25)]);
        assert_eq!(f.pipeline.stats().snapshot().last_block, Some(25));
    }

    #[tokio::test]
    async fn confirmations_hold_back_the_head() {
        let f = fixture();
        f.source.set_head(10);
        let mut p = poller(&f, SourceConfig { confirmations: 3, ..config(Some(5)) });
        p.tick().await.unwrap();
        assert_eq!(f.source.ranges(), vec![(5, 7)]);
    }

    #[tokio::test]
    async fn delivers_in_chain_order_within_a_batch() {
        let f = fixture();
        f.source.push(created(1, 3));
        f.source.push(completed(1, 4, 0));
        f.source.set_head(5);
        let mut p = poller(&f, config(Some(0)));
        p.tick().await.unwrap();
        assert_eq!(completed_flag(&f, 1).await, Some(true));
    }

    #[tokio::test]
    async fn without_start_block_history_is_skipped() {
        let f = fixture();
        f.source.push(created(1, 5));
        f.source.set_head(10);
        let mut p = poller(&f, config(None));
        p.tick().await.unwrap();
        p.tick().await.unwrap();
        assert_eq!(completed_flag(&f, 1).await, None);

        f.source.push(created(2, 11));
        f.source.set_head(11);
        p.tick().await.unwrap();
        assert_eq!(completed_flag(&f, 2).await, Some(false));
        assert_eq!(f.source.ranges(), vec![(11, 11)]);
    }

    #[tokio::test]
    async fn reconnect_rescans_overlap() {
        let f = fixture();
        f.source.push(created(1, 8));
        f.source.set_head(10);
        let mut p = poller(&f, config(Some(0)));
        p.tick().await.unwrap();
        p.tick().await.unwrap();

        f.source.fail_next.store(1, Ordering::SeqCst);
        let err = p.tick().await.unwrap_err();
        p.disconnected(&err);
        assert!(!f.pipeline.stats().snapshot().connected);

        f.source.set_head(12);
        p.tick().await.unwrap();
        assert_eq!(f.source.ranges().last(), Some(&(6, 12)));

        // the redelivered Created is an idempotent replay
        let snap = f.pipeline.stats().snapshot();
        assert_eq!(snap.applied, 1);
        assert_eq!(snap.unchanged, 1);
        assert!(snap.connected);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let f = fixture();
        f.source.push(created(1, 2));
        f.source.set_head(3);
        let source = EventSource::new(f.source.clone(), f.pipeline.clone(), config(Some(0)));

        assert!(source.start().await);
        assert!(!source.start().await);
        assert!(source.is_running().await);

        let applied = async {
            while completed_flag(&f, 1).await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), applied).await.unwrap();

        source.stop().await;
        source.stop().await;
        assert!(!source.is_running().await);

        // restartable after a stop
        assert!(source.start().await);
        source.stop().await;
    }

    #[tokio::test]
    async fn transport_errors_do_not_end_the_loop() {
        let f = fixture();
        f.source.fail_next.store(3, Ordering::SeqCst);
        f.source.push(created(1, 1));
        f.source.set_head(2);
        let source = EventSource::new(f.source.clone(), f.pipeline.clone(), config(Some(0)));
        source.start().await;

        let applied = async {
            while completed_flag(&f, 1).await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), applied).await.unwrap();
        source.stop().await;
        assert_eq!(f.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_the_batch_in_flight() {
        let logs = Arc::new(ScriptedSource::default());
        logs.push(created(1, 2));
        logs.set_head(3);
        let store = Arc::new(GatedStore::default());
        let source = Arc::new(EventSource::new(logs, pipeline_over(store.clone()), config(Some(0))));
        source.start().await;

        tokio::time::timeout(Duration::from_secs(5), store.entered.notified())
            .await
            .unwrap();
        let stopping = tokio::spawn({
            let source = Arc::clone(&source);
            async move { source.stop().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());
        assert_eq!(store.count().await.unwrap(), 0);

        store.release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), stopping)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(!source.is_running().await);
    }
}
