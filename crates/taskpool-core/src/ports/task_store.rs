//! TaskStore port - 全 pod で共有する正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - PendingTask（lease）: key の一意制約が唯一の分散排他
//! - CompletedTask / FailedTask: 書き込み一回・読み取り多数
//!
//! # 実装
//! - `impls::InMemoryTaskStore`: テスト・開発用（Arc で共有して複数 pod を模擬）
//! - `impls::SqliteTaskStore`: rusqlite 実装

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CompletedTask, FailedTask, InsertError, PendingTask, RecordKind, StoreError};

/// TaskStore は三種類のレコードの bulk 読み込み・挿入・削除を提供
///
/// # 契約
/// - `fetch_*` は存在するレコードだけを返す（欠損はエラーではない）
/// - `insert_*` は create-if-absent。既存なら `InsertError::Conflict`、上書きは禁止
/// - `delete_older_than` は key が `prefix` で始まり `created_at < cutoff` の行だけを消す
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn fetch_pending(&self, keys: &[String]) -> Result<Vec<PendingTask>, StoreError>;

    async fn fetch_completed(&self, keys: &[String]) -> Result<Vec<CompletedTask>, StoreError>;

    async fn fetch_failed(&self, keys: &[String]) -> Result<Vec<FailedTask>, StoreError>;

    async fn insert_pending(&self, task: &PendingTask) -> Result<(), InsertError>;

    async fn insert_completed(&self, task: &CompletedTask) -> Result<(), InsertError>;

    async fn insert_failed(&self, task: &FailedTask) -> Result<(), InsertError>;

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<(), StoreError>;

    async fn delete_older_than(
        &self,
        kind: RecordKind,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
