//! SqliteTaskStore - rusqlite による TaskStore
//!
//! # 学習ポイント
//! - PRIMARY KEY 制約違反（ConstraintViolation）を Conflict に写像
//! - blocking な rusqlite 呼び出しは spawn_blocking で実行
//! - 同じ DB ファイルを複数の接続（= 複数 pod）で開いても排他が成立する
//!
//! namespace の prefix 一致は `substr` で行う（LIKE だと `_` / `%` がワイルドカードになる）。

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, Params, Row, params, params_from_iter};

use crate::domain::{CompletedTask, FailedTask, InsertError, PendingTask, RecordKind, StoreError};
use crate::ports::TaskStore;

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Keys per `IN (...)` query; stays under SQLite's bound-parameter limit.
const MAX_KEYS_PER_QUERY: usize = 500;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pending_tasks (
    key        TEXT PRIMARY KEY NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS completed_tasks (
    key        TEXT PRIMARY KEY NOT NULL,
    created_at INTEGER NOT NULL,
    value      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS failed_tasks (
    key        TEXT PRIMARY KEY NOT NULL,
    created_at INTEGER NOT NULL,
    error      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS pending_tasks_created_at ON pending_tasks (created_at);
CREATE INDEX IF NOT EXISTS completed_tasks_created_at ON completed_tasks (created_at);
CREATE INDEX IF NOT EXISTS failed_tasks_created_at ON failed_tasks (created_at);
";

/// SqliteTaskStore は 1 接続を Mutex で保護して使う
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) a database file and migrate the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    /// Private in-memory database (not shareable across connections).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {e}")))?
    }
}

fn to_utc(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Backend(format!("created_at out of range: {millis}")))
}

fn fetch_rows<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    keys: &[String],
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(MAX_KEYS_PER_QUERY) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT {columns} FROM {table} WHERE key IN ({placeholders})");
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), &map)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

fn insert_row(conn: &Connection, sql: &str, key: &str, params: impl Params) -> Result<(), InsertError> {
    match conn.execute(sql, params) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(InsertError::Conflict(key.to_string()))
        }
        Err(err) => Err(StoreError::from(err).into()),
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn fetch_pending(&self, keys: &[String]) -> Result<Vec<PendingTask>, StoreError> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            fetch_rows(conn, "pending_tasks", "key, created_at", &keys, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .into_iter()
            .map(|(key, created_at)| Ok::<_, StoreError>(PendingTask::new(key, to_utc(created_at)?)))
            .collect()
        })
        .await
    }

    async fn fetch_completed(&self, keys: &[String]) -> Result<Vec<CompletedTask>, StoreError> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            fetch_rows(conn, "completed_tasks", "key, created_at, value", &keys, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .into_iter()
            .map(|(key, created_at, value)| {
                Ok::<_, StoreError>(CompletedTask::new(key, to_utc(created_at)?, value))
            })
            .collect()
        })
        .await
    }

    async fn fetch_failed(&self, keys: &[String]) -> Result<Vec<FailedTask>, StoreError> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            fetch_rows(conn, "failed_tasks", "key, created_at, error", &keys, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .into_iter()
            .map(|(key, created_at, error)| {
                Ok::<_, StoreError>(FailedTask::new(key, to_utc(created_at)?, error))
            })
            .collect()
        })
        .await
    }

    async fn insert_pending(&self, task: &PendingTask) -> Result<(), InsertError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            insert_row(
                conn,
                "INSERT INTO pending_tasks (key, created_at) VALUES (?1, ?2)",
                &task.key,
                params![task.key, task.created_at.timestamp_millis()],
            )
        })
        .await
    }

    async fn insert_completed(&self, task: &CompletedTask) -> Result<(), InsertError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            insert_row(
                conn,
                "INSERT INTO completed_tasks (key, created_at, value) VALUES (?1, ?2, ?3)",
                &task.key,
                params![task.key, task.created_at.timestamp_millis(), task.value],
            )
        })
        .await
    }

    async fn insert_failed(&self, task: &FailedTask) -> Result<(), InsertError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            insert_row(
                conn,
                "INSERT INTO failed_tasks (key, created_at, error) VALUES (?1, ?2, ?3)",
                &task.key,
                params![task.key, task.created_at.timestamp_millis(), task.error],
            )
        })
        .await
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let sql = format!("DELETE FROM {} WHERE key = ?1", kind.table_name());
            conn.execute(&sql, params![key])?;
            Ok(())
        })
        .await
    }

    async fn delete_older_than(
        &self,
        kind: RecordKind,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "DELETE FROM {} WHERE substr(key, 1, ?1) = ?2 AND created_at < ?3",
                kind.table_name()
            );
            let prefix_len = prefix.chars().count() as i64;
            let removed = conn.execute(&sql, params![prefix_len, prefix, cutoff.timestamp_millis()])?;
            Ok(removed as u64)
        })
        .await
    }
}
