//! ReminderLoop - 期限が近いタスクのリマインダー
//!
//! # フロー
//! 1. TaskStore::due_unreminded(now + lead) で候補を取得
//! 2. オーナーのウォレットからユーザーを引く（未連携なら飛ばす）
//! 3. push subscription を持つユーザーだけ ReminderSink に渡す
//! 4. 送れたら reminded = true を書き戻す。失敗したら次の tick で再挑戦
//!
//! # 書き戻し
//! 送信中にチェーンイベントや API の PATCH が同じタスクを書き換えうるので、
//! 候補のコピーは使わない。Reconciler と同じ KeyLocks を取り、読み直した
//! レコードの期限が送信時と同じときだけ reminded を立てる。
//! ストアのエラーはそのタスクだけ諦め、パスは続ける。

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{StoreError, TaskRecord};
use crate::ports::{Clock, ReminderSink, TaskStore, UserStore};
use crate::reconcile::KeyLocks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    pub interval: Duration,
    pub lead: ChronoDuration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lead: ChronoDuration::seconds(300),
        }
    }
}

pub struct ReminderLoop {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserStore>,
    sink: Arc<dyn ReminderSink>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyLocks>,
    config: ReminderConfig,
}

impl ReminderLoop {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        users: Arc<dyn UserStore>,
        sink: Arc<dyn ReminderSink>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyLocks>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            tasks,
            users,
            sink,
            clock,
            locks,
            config,
        }
    }

    /// One pass. Returns the number of reminders sent.
    ///
    /// Only the candidate query can fail the pass.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let horizon = self.clock.now() + self.config.lead;
        let due = self.tasks.due_unreminded(horizon).await?;
        let mut sent = 0;

        for task in due {
            let user = match self.users.find_by_wallet(&task.owner).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::trace!(owner = %task.owner, task_id = %task.task_id, "no account for owner");
                    continue;
                }
                Err(e) => {
                    tracing::error!(owner = %task.owner, task_id = %task.task_id, error = %e, "owner lookup failed");
                    continue;
                }
            };
            if user.push_subscription.is_none() {
                continue;
            }
            if let Err(e) = self.sink.remind(&user, &task).await {
                tracing::warn!(user = %user.id, task_id = %task.task_id, error = %e, "reminder not delivered");
                continue;
            }
            sent += 1;
            self.mark_reminded(&task).await;
        }
        Ok(sent)
    }

    /// Sets `reminded` on the stored record if it still has the deadline
    /// that was just announced.
    async fn mark_reminded(&self, sent_for: &TaskRecord) {
        let key = sent_for.key();
        let _guard = self.locks.lock(&key).await;
        let mut current = match self.tasks.get(&key).await {
            Ok(Some(current)) => current,
            // deleted meanwhile, nothing left to remind
            Ok(None) => return,
            Err(e) => {
                tracing::error!(%key, error = %e, "re-reading reminded task failed");
                return;
            }
        };
        if current.reminded || current.due_date != sent_for.due_date {
            tracing::debug!(%key, "task changed during delivery, reminder flag left as is");
            return;
        }
        current.reminded = true;
        if let Err(e) = self.tasks.replace(current).await {
            tracing::error!(%key, error = %e, "could not record reminder, it will be sent again");
        }
    }

    pub fn spawn(self) -> ReminderHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.config.interval;
        let join = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                match self.run_once().await {
                    Ok(0) => {}
                    Ok(sent) => tracing::info!(sent, "deadline reminders sent"),
                    Err(e) => tracing::error!(error = %e, "reminder pass failed"),
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
        });
        ReminderHandle { shutdown_tx, join }
    }
}

/// Handle of a spawned reminder loop.
pub struct ReminderHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReminderHandle {
    pub async fn shutdown_and_join(self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "reminder loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, TaskId, TaskKey, TaskRecord, UserRecord};
    use crate::domain::{ChainEvent, MetadataPatch};
    use crate::impls::{InMemoryTaskStore, InMemoryUserStore, RecordingNotifier};
    use crate::ports::{FixedClock, ReminderError};
    use crate::reconcile::Reconciler;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use ulid::Ulid;

    #[derive(Default)]
    struct CollectingSink {
        sent: Mutex<Vec<(String, u64)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ReminderSink for CollectingSink {
        async fn remind(&self, user: &UserRecord, task: &TaskRecord) -> Result<(), ReminderError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ReminderError("push service down".into()));
            }
            self.sent.lock().unwrap().push((user.username.clone(), task.task_id.get()));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    async fn setup() -> (Arc<InMemoryTaskStore>, Arc<CollectingSink>, ReminderLoop) {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let sink = Arc::new(CollectingSink::default());

        let subscribed = Address::from_bytes([1; 20]);
        let silent = Address::from_bytes([2; 20]);
        let unlinked = Address::from_bytes([3; 20]);

        let mut alice = UserRecord::new(Ulid::new().into(), "alice".into(), "a@x.io".into(), "h".into(), now());
        alice.wallet = Some(subscribed.clone());
        alice.push_subscription = Some(json!({"endpoint": "https://push.example/a"}));
        let mut bob = UserRecord::new(Ulid::new().into(), "bob".into(), "b@x.io".into(), "h".into(), now());
        bob.wallet = Some(silent.clone());
        users.insert(alice).await.unwrap();
        users.insert(bob).await.unwrap();

        let due = |owner: &Address, id: u64, mins: i64| {
            TaskRecord::from_chain(
                TaskKey::new(owner.clone(), TaskId::new(id).unwrap()),
                format!("task {id}"),
                false,
                Some(now() + ChronoDuration::minutes(mins)),
                now(),
            )
        };
        tasks.insert(due(&subscribed, 1, 3)).await.unwrap();
        tasks.insert(due(&subscribed, 2, 60)).await.unwrap();
        tasks.insert(due(&silent, 3, 1)).await.unwrap();
        tasks.insert(due(&unlinked, 4, 1)).await.unwrap();

        let reminders = ReminderLoop::new(
            tasks.clone(),
            users,
            sink.clone(),
            Arc::new(FixedClock::new(now())),
            Arc::new(KeyLocks::new()),
            ReminderConfig::default(),
        );
        (tasks, sink, reminders)
    }

    /// Writes to the task through the reconciler while the push is in flight.
    struct RacingSink {
        reconciler: Reconciler,
        tasks: Arc<InMemoryTaskStore>,
        postpone: bool,
    }

    #[async_trait]
    impl ReminderSink for RacingSink {
        async fn remind(&self, _user: &UserRecord, task: &TaskRecord) -> Result<(), ReminderError> {
            let edit = ChainEvent::Edited {
                owner: task.owner.clone(),
                task_id: task.task_id,
                content: "edited".into(),
            };
            self.reconciler.apply(&edit).await.unwrap();
            if self.postpone {
                let mut current = self.tasks.get(&task.key()).await.unwrap().unwrap();
                let patch = MetadataPatch {
                    due_date: Some(Some(now() + ChronoDuration::days(1))),
                    ..MetadataPatch::default()
                };
                current.apply_metadata(&patch, now());
                self.tasks.replace(current).await.unwrap();
            }
            Ok(())
        }
    }

    async fn racing_setup(postpone: bool) -> (Arc<InMemoryTaskStore>, ReminderLoop, TaskKey) {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let locks = Arc::new(KeyLocks::new());

        let owner = Address::from_bytes([5; 20]);
        let mut carol = UserRecord::new(Ulid::new().into(), "carol".into(), "c@x.io".into(), "h".into(), now());
        carol.wallet = Some(owner.clone());
        carol.push_subscription = Some(json!({"endpoint": "https://push.example/c"}));
        users.insert(carol).await.unwrap();

        let key = TaskKey::new(owner, TaskId::new(1).unwrap());
        tasks
            .insert(TaskRecord::from_chain(
                key.clone(),
                "original".into(),
                false,
                Some(now() + ChronoDuration::minutes(2)),
                now(),
            ))
            .await
            .unwrap();

        let sink = Arc::new(RacingSink {
            reconciler: Reconciler::new(
                tasks.clone(),
                Arc::new(RecordingNotifier::new()),
                clock.clone(),
                Arc::clone(&locks),
            ),
            tasks: tasks.clone(),
            postpone,
        });
        let reminders = ReminderLoop::new(tasks.clone(), users, sink, clock, locks, ReminderConfig::default());
        (tasks, reminders, key)
    }

    #[tokio::test]
    async fn reminds_subscribed_owners_once() {
        let (tasks, sink, reminders) = setup().await;

        assert_eq!(reminders.run_once().await.unwrap(), 1);
        assert_eq!(*sink.sent.lock().unwrap(), vec![("alice".to_string(), 1)]);
        assert_eq!(reminders.run_once().await.unwrap(), 0);

        let reminded: Vec<u64> = tasks
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.reminded)
            .map(|t| t.task_id.get())
            .collect();
        assert_eq!(reminded, vec![1]);
    }

    #[tokio::test]
    async fn failed_delivery_is_retried() {
        let (_tasks, sink, reminders) = setup().await;
        sink.fail.store(true, Ordering::SeqCst);
        assert_eq!(reminders.run_once().await.unwrap(), 0);

        sink.fail.store(false, Ordering::SeqCst);
        assert_eq!(reminders.run_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn edit_during_delivery_survives() {
        let (tasks, reminders, key) = racing_setup(false).await;
        assert_eq!(reminders.run_once().await.unwrap(), 1);

        let stored = tasks.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.content, "edited");
        assert!(stored.reminded);
    }

    #[tokio::test]
    async fn new_deadline_during_delivery_stays_armed() {
        let (tasks, reminders, key) = racing_setup(true).await;
        assert_eq!(reminders.run_once().await.unwrap(), 1);

        let stored = tasks.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.content, "edited");
        assert_eq!(stored.due_date, Some(now() + ChronoDuration::days(1)));
        assert!(!stored.reminded);
    }

    #[tokio::test]
    async fn store_failure_skips_only_that_task() {
        let (tasks, sink, reminders) = setup().await;
        let subscribed = Address::from_bytes([1; 20]);
        tasks
            .insert(TaskRecord::from_chain(
                TaskKey::new(subscribed, TaskId::new(5).unwrap()),
                "task 5".into(),
                false,
                Some(now() + ChronoDuration::minutes(4)),
                now(),
            ))
            .await
            .unwrap();

        tasks.set_fail_writes(true);
        assert_eq!(reminders.run_once().await.unwrap(), 2);
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
        assert!(tasks.snapshot().await.iter().all(|t| !t.reminded));

        // unrecorded reminders go out again once the store recovers
        tasks.set_fail_writes(false);
        assert_eq!(reminders.run_once().await.unwrap(), 2);
        assert_eq!(reminders.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_loop_stops() {
        let (_tasks, sink, reminders) = setup().await;
        let handle = reminders.spawn();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while sink.sent.lock().unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.shutdown_and_join().await;
    }
}
