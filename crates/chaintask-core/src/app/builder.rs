//! MirrorBuilder - ミラー全体の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）：足りない部品はまとめて BuildError で返す
//! - Reconciler と TaskService は同じ KeyLocks を共有する

use chrono::Duration;
use std::sync::Arc;

use crate::decode::EventDecoder;
use crate::domain::{Address, StoreError};
use crate::impls::LogReminderSink;
use crate::ports::{
    Clock, IdGenerator, LogSource, Notifier, ReminderSink, SystemClock, TaskStore, UlidGenerator,
    UserStore,
};
use crate::reconcile::{KeyLocks, Reconciler};
use crate::service::{AccountService, TaskService, TokenIssuer};
use crate::source::{EventSource, MirrorStats, Pipeline, SourceConfig};

use super::reminder_loop::{ReminderConfig, ReminderLoop};
use super::status::MirrorStatus;

/// BuildError はミラー構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These must be set before build().")]
    MissingComponents(Vec<&'static str>),

    #[error("JWT secret must not be empty")]
    EmptySecret,
}

/// MirrorBuilder はミラーを構築
///
/// # 使用例
/// ```ignore
/// let mirror = MirrorBuilder::new()
///     .contract(contract)
///     .task_store(store.clone())
///     .user_store(store)
///     .log_source(Arc::new(rpc))
///     .notifier(hub)
///     .jwt_secret(secret)
///     .build()?;
/// ```
pub struct MirrorBuilder {
    contract: Option<Address>,
    task_store: Option<Arc<dyn TaskStore>>,
    user_store: Option<Arc<dyn UserStore>>,
    log_source: Option<Arc<dyn LogSource>>,
    notifier: Option<Arc<dyn Notifier>>,
    jwt_secret: Option<Vec<u8>>,
    reminder_sink: Arc<dyn ReminderSink>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    token_ttl: Duration,
    source_config: SourceConfig,
    reminder_config: ReminderConfig,
}

impl MirrorBuilder {
    pub fn new() -> Self {
        Self {
            contract: None,
            task_store: None,
            user_store: None,
            log_source: None,
            notifier: None,
            jwt_secret: None,
            reminder_sink: Arc::new(LogReminderSink),
            clock: Arc::new(SystemClock),
            ids: None,
            token_ttl: Duration::hours(2),
            source_config: SourceConfig::default(),
            reminder_config: ReminderConfig::default(),
        }
    }

    pub fn contract(mut self, contract: Address) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    pub fn user_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.user_store = Some(store);
        self
    }

    pub fn log_source(mut self, source: Arc<dyn LogSource>) -> Self {
        self.log_source = Some(source);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn reminder_sink(mut self, sink: Arc<dyn ReminderSink>) -> Self {
        self.reminder_sink = sink;
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a `UlidGenerator` on the builder's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn source_config(mut self, config: SourceConfig) -> Self {
        self.source_config = config;
        self
    }

    pub fn reminder_config(mut self, config: ReminderConfig) -> Self {
        self.reminder_config = config;
        self
    }

    /// # 検証
    /// - contract / task_store / user_store / log_source / notifier / jwt_secret が
    ///   全て設定されているか
    /// - jwt_secret が空でないか
    pub fn build(self) -> Result<Mirror, BuildError> {
        let mut missing = Vec::new();
        if self.contract.is_none() {
            missing.push("contract");
        }
        if self.task_store.is_none() {
            missing.push("task_store");
        }
        if self.user_store.is_none() {
            missing.push("user_store");
        }
        if self.log_source.is_none() {
            missing.push("log_source");
        }
        if self.notifier.is_none() {
            missing.push("notifier");
        }
        if self.jwt_secret.is_none() {
            missing.push("jwt_secret");
        }
        let (Some(contract), Some(task_store), Some(user_store), Some(log_source), Some(notifier), Some(secret)) = (
            self.contract,
            self.task_store,
            self.user_store,
            self.log_source,
            self.notifier,
            self.jwt_secret,
        ) else {
            return Err(BuildError::MissingComponents(missing));
        };
        if secret.is_empty() {
            return Err(BuildError::EmptySecret);
        }

        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let locks = Arc::new(KeyLocks::new());
        let stats = Arc::new(MirrorStats::new());

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&task_store),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            Arc::clone(&locks),
        ));
        let pipeline = Arc::new(Pipeline::new(
            EventDecoder::new(contract.clone()),
            Arc::clone(&reconciler),
            stats,
        ));
        let source = Arc::new(EventSource::new(log_source, pipeline, self.source_config));
        let tasks = Arc::new(TaskService::new(
            Arc::clone(&task_store),
            notifier,
            Arc::clone(&clock),
            Arc::clone(&locks),
        ));
        let accounts = Arc::new(AccountService::new(
            Arc::clone(&user_store),
            ids,
            Arc::clone(&clock),
            TokenIssuer::new(&secret, self.token_ttl, Arc::clone(&clock)),
        ));
        let reminders = ReminderLoop::new(
            Arc::clone(&task_store),
            user_store,
            self.reminder_sink,
            clock,
            locks,
            self.reminder_config,
        );

        Ok(Mirror {
            contract,
            source,
            reconciler,
            tasks,
            accounts,
            reminders: Some(reminders),
            task_store,
        })
    }
}

impl Default for MirrorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mirror はワイヤリング済みの部品一式
pub struct Mirror {
    contract: Address,
    pub source: Arc<EventSource>,
    pub reconciler: Arc<Reconciler>,
    pub tasks: Arc<TaskService>,
    pub accounts: Arc<AccountService>,
    reminders: Option<ReminderLoop>,
    task_store: Arc<dyn TaskStore>,
}

impl Mirror {
    pub fn contract(&self) -> &Address {
        &self.contract
    }

    /// The reminder loop, for the caller to spawn. `None` once taken.
    pub fn take_reminders(&mut self) -> Option<ReminderLoop> {
        self.reminders.take()
    }

    pub async fn status(&self) -> Result<MirrorStatus, StoreError> {
        Ok(MirrorStatus {
            contract: self.contract.clone(),
            running: self.source.is_running().await,
            tasks: self.task_store.count().await?,
            events: self.source.stats().snapshot(),
        })
    }
}
