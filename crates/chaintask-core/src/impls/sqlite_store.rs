//! SqliteStore - TaskStore / UserStore の SQLite 実装
//!
//! # 学習ポイント
//! - rusqlite は同期 API なので、`spawn_blocking` の中で Mutex<Connection> を握る
//! - 一意制約（tasks の複合主キー、users.wallet など）は DB に任せ、
//!   制約違反は StoreError::Duplicate に写す
//! - 時刻は UTC ミリ秒の INTEGER で持つ（範囲比較がそのまま使える）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::domain::{
    Address, Preferences, StoreError, TaskId, TaskKey, TaskRecord, UserId, UserRecord,
};
use crate::ports::{TaskStore, UserStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    owner       TEXT    NOT NULL,
    task_id     INTEGER NOT NULL,
    content     TEXT    NOT NULL,
    completed   INTEGER NOT NULL,
    status      TEXT    NOT NULL,
    priority    TEXT    NOT NULL,
    tags        TEXT    NOT NULL,
    category    TEXT,
    due_date    INTEGER,
    reminded    INTEGER NOT NULL DEFAULT 0,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (owner, task_id)
);
CREATE INDEX IF NOT EXISTS tasks_by_task_id ON tasks (task_id);
CREATE INDEX IF NOT EXISTS tasks_by_due_date ON tasks (due_date) WHERE reminded = 0;

CREATE TABLE IF NOT EXISTS users (
    id                TEXT PRIMARY KEY,
    username          TEXT NOT NULL UNIQUE,
    email             TEXT NOT NULL UNIQUE,
    password_hash     TEXT NOT NULL,
    wallet            TEXT UNIQUE,
    theme             TEXT NOT NULL,
    push_subscription TEXT,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);
";

const TASK_COLUMNS: &str = "owner, task_id, content, completed, status, priority, tags, \
                            category, due_date, reminded, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, email, password_hash, wallet, theme, \
                            push_subscription, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .map_err(map_err)?;
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking pool with the connection locked.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard).map_err(map_err)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

fn map_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(code, message)
            if code.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(message.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn conversion(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| conversion(idx, format!("bad timestamp {ms}")))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let owner: String = row.get(0)?;
    let task_id: i64 = row.get(1)?;
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let tags: String = row.get(6)?;
    let due_date: Option<i64> = row.get(8)?;
    Ok(TaskRecord {
        owner: Address::parse(&owner).map_err(|e| conversion(0, e.to_string()))?,
        task_id: u64::try_from(task_id)
            .ok()
            .and_then(TaskId::new)
            .ok_or_else(|| conversion(1, format!("bad task id {task_id}")))?,
        content: row.get(2)?,
        completed: row.get(3)?,
        status: status.parse().map_err(|s| conversion(4, format!("bad status {s}")))?,
        priority: priority.parse().map_err(|s| conversion(5, format!("bad priority {s}")))?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion(6, e.to_string()))?,
        category: row.get(7)?,
        due_date: due_date.map(|ms| from_millis(8, ms)).transpose()?,
        reminded: row.get(9)?,
        created_at: from_millis(10, row.get(10)?)?,
        updated_at: from_millis(11, row.get(11)?)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let id: String = row.get(0)?;
    let wallet: Option<String> = row.get(4)?;
    let push_subscription: Option<String> = row.get(6)?;
    Ok(UserRecord {
        id: id.parse().map_err(|e: crate::domain::ParseIdError| conversion(0, e.to_string()))?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        wallet: wallet
            .map(|w| Address::parse(&w).map_err(|e| conversion(4, e.to_string())))
            .transpose()?,
        preferences: Preferences { theme: row.get(5)? },
        push_subscription: push_subscription
            .map(|s| serde_json::from_str(&s).map_err(|e| conversion(6, e.to_string())))
            .transpose()?,
        created_at: from_millis(7, row.get(7)?)?,
        updated_at: from_millis(8, row.get(8)?)?,
    })
}

fn tags_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn get(&self, key: &TaskKey) -> Result<Option<TaskRecord>, StoreError> {
        let owner = key.owner.to_string();
        let task_id = key.task_id.get() as i64;
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE owner = ?1 AND task_id = ?2"),
                params![owner, task_id],
                task_from_row,
            )
            .optional()
        })
        .await
    }

    async fn find_by_task_id(&self, task_id: TaskId) -> Result<Vec<TaskRecord>, StoreError> {
        let task_id = task_id.get() as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1 ORDER BY owner"
            ))?;
            let rows = stmt.query_map(params![task_id], task_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn list_by_owner(&self, owner: &Address) -> Result<Vec<TaskRecord>, StoreError> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE owner = ?1 ORDER BY task_id"
            ))?;
            let rows = stmt.query_map(params![owner], task_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    record.owner.to_string(),
                    record.task_id.get() as i64,
                    record.content,
                    record.completed,
                    record.status.as_str(),
                    record.priority.as_str(),
                    tags_json(&record.tags),
                    record.category,
                    record.due_date.map(millis),
                    record.reminded,
                    millis(record.created_at),
                    millis(record.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn replace(&self, record: TaskRecord) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET content = ?3, completed = ?4, status = ?5, priority = ?6, \
                 tags = ?7, category = ?8, due_date = ?9, reminded = ?10, updated_at = ?11 \
                 WHERE owner = ?1 AND task_id = ?2",
                params![
                    record.owner.to_string(),
                    record.task_id.get() as i64,
                    record.content,
                    record.completed,
                    record.status.as_str(),
                    record.priority.as_str(),
                    tags_json(&record.tags),
                    record.category,
                    record.due_date.map(millis),
                    record.reminded,
                    millis(record.updated_at),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, key: &TaskKey) -> Result<bool, StoreError> {
        let owner = key.owner.to_string();
        let task_id = key.task_id.get() as i64;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM tasks WHERE owner = ?1 AND task_id = ?2",
                params![owner, task_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn rekey(
        &self,
        from: &TaskKey,
        to: &TaskKey,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let from_owner = from.owner.to_string();
        let to_owner = to.owner.to_string();
        let task_id = from.task_id.get() as i64;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            // 移動先が埋まっていれば主キー違反 -> Duplicate
            let changed = tx.execute(
                "UPDATE tasks SET owner = ?3, updated_at = ?4 WHERE owner = ?1 AND task_id = ?2",
                params![from_owner, task_id, to_owner, millis(now)],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let moved = tx.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE owner = ?1 AND task_id = ?2"),
                params![to_owner, task_id],
                task_from_row,
            )?;
            tx.commit()?;
            Ok(Some(moved))
        })
        .await
    }

    async fn due_unreminded(&self, before: DateTime<Utc>) -> Result<Vec<TaskRecord>, StoreError> {
        let before = millis(before);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE reminded = 0 AND due_date IS NOT NULL AND due_date <= ?1 \
                 ORDER BY due_date"
            ))?;
            let rows = stmt.query_map(params![before], task_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
            Ok(n.max(0) as usize)
        })
        .await
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn insert(&self, user: UserRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    user.id.as_ulid().to_string(),
                    user.username,
                    user.email.to_lowercase(),
                    user.password_hash,
                    user.wallet.as_ref().map(Address::to_string),
                    user.preferences.theme,
                    user.push_subscription.as_ref().map(|v| v.to_string()),
                    millis(user.created_at),
                    millis(user.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let id = id.as_ulid().to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = email.to_lowercase();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn find_by_wallet(&self, wallet: &Address) -> Result<Option<UserRecord>, StoreError> {
        let wallet = wallet.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE wallet = ?1"),
                params![wallet],
                user_from_row,
            )
            .optional()
        })
        .await
    }

    async fn update(&self, user: UserRecord) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET username = ?2, email = ?3, password_hash = ?4, wallet = ?5, \
                 theme = ?6, push_subscription = ?7, updated_at = ?8 WHERE id = ?1",
                params![
                    user.id.as_ulid().to_string(),
                    user.username,
                    user.email.to_lowercase(),
                    user.password_hash,
                    user.wallet.as_ref().map(Address::to_string),
                    user.preferences.theme,
                    user.push_subscription.as_ref().map(|v| v.to_string()),
                    millis(user.updated_at),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}
