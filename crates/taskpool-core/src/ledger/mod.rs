//! Ledger - TaskStore の上に batched lookup を被せたアダプタ
//!
//! # 役割
//! - lookup は三種類とも `BatchLoader` 経由（同時に来た point lookup を bulk query にまとめる）
//! - insert / delete は TaskStore へ直接
//!
//! `Ok(None)` は「存在しない」、`Err` は「store が失敗した」。この二つは絶対に混同しない。

pub mod batch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    CanonicalKey, CompletedTask, FailedTask, InsertError, LedgerRecord, PendingTask, RecordKind,
    StoreError,
};
use crate::ports::TaskStore;

pub use self::batch::{BatchFetch, BatchLoader, BatchOptions};

/// Bulk fetch for each record kind, backed by one store.
struct StoreFetcher {
    store: Arc<dyn TaskStore>,
}

fn index<R: LedgerRecord>(rows: Vec<R>) -> HashMap<String, R> {
    rows.into_iter().map(|r| (r.key().to_string(), r)).collect()
}

#[async_trait]
impl BatchFetch<PendingTask> for StoreFetcher {
    async fn fetch_batch(&self, keys: Vec<String>) -> Result<HashMap<String, PendingTask>, StoreError> {
        Ok(index(self.store.fetch_pending(&keys).await?))
    }
}

#[async_trait]
impl BatchFetch<CompletedTask> for StoreFetcher {
    async fn fetch_batch(&self, keys: Vec<String>) -> Result<HashMap<String, CompletedTask>, StoreError> {
        Ok(index(self.store.fetch_completed(&keys).await?))
    }
}

#[async_trait]
impl BatchFetch<FailedTask> for StoreFetcher {
    async fn fetch_batch(&self, keys: Vec<String>) -> Result<HashMap<String, FailedTask>, StoreError> {
        Ok(index(self.store.fetch_failed(&keys).await?))
    }
}

/// Ledger は一つの TaskStore と三つの BatchLoader を束ねる
pub struct Ledger {
    store: Arc<dyn TaskStore>,
    pending: BatchLoader<PendingTask>,
    completed: BatchLoader<CompletedTask>,
    failed: BatchLoader<FailedTask>,
}

impl Ledger {
    pub fn new(store: Arc<dyn TaskStore>, options: BatchOptions) -> Self {
        let fetcher = Arc::new(StoreFetcher {
            store: Arc::clone(&store),
        });
        Self {
            pending: BatchLoader::<PendingTask>::new(fetcher.clone(), options),
            completed: BatchLoader::<CompletedTask>::new(fetcher.clone(), options),
            failed: BatchLoader::<FailedTask>::new(fetcher, options),
            store,
        }
    }

    pub async fn lookup_pending(&self, key: &CanonicalKey) -> Result<Option<PendingTask>, StoreError> {
        self.pending.load(key.as_str()).await
    }

    pub async fn lookup_completed(
        &self,
        key: &CanonicalKey,
    ) -> Result<Option<CompletedTask>, StoreError> {
        self.completed.load(key.as_str()).await
    }

    pub async fn lookup_failed(&self, key: &CanonicalKey) -> Result<Option<FailedTask>, StoreError> {
        self.failed.load(key.as_str()).await
    }

    /// Atomic create-if-absent; `InsertError::Conflict` means someone else holds the lease.
    pub async fn insert_pending(&self, task: &PendingTask) -> Result<(), InsertError> {
        self.store.insert_pending(task).await
    }

    pub async fn insert_completed(&self, task: &CompletedTask) -> Result<(), InsertError> {
        self.store.insert_completed(task).await
    }

    pub async fn insert_failed(&self, task: &FailedTask) -> Result<(), InsertError> {
        self.store.insert_failed(task).await
    }

    pub async fn delete(&self, kind: RecordKind, key: &CanonicalKey) -> Result<(), StoreError> {
        self.store.delete(kind, key.as_str()).await
    }

    pub async fn delete_older_than(
        &self,
        kind: RecordKind,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.store.delete_older_than(kind, prefix, cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::domain::Namespace;
    use crate::impls::InMemoryTaskStore;
    use crate::typed::JsonCodec;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key(input: &str) -> CanonicalKey {
        let ns = Namespace::new("ledger").unwrap();
        CanonicalKey::new(&ns, input, &JsonCodec).unwrap()
    }

    fn ledger(store: &Arc<InMemoryTaskStore>, window_ms: u64) -> Ledger {
        Ledger::new(
            store.clone(),
            BatchOptions {
                max_concurrent_batches: 2,
                max_batch_size: 100,
                window: Duration::from_millis(window_ms),
            },
        )
    }

    #[tokio::test]
    async fn missing_and_present_are_distinct() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ledger = ledger(&store, 1);
        let k = key("a");

        assert_eq!(ledger.lookup_completed(&k).await.unwrap(), None);

        let row = CompletedTask::new(k.as_str(), at(0), "1".into());
        ledger.insert_completed(&row).await.unwrap();
        assert_eq!(ledger.lookup_completed(&k).await.unwrap(), Some(row));
        assert_eq!(ledger.lookup_failed(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_errors_are_not_misses() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ledger = ledger(&store, 1);
        store.set_unavailable(true);

        assert!(ledger.lookup_pending(&key("a")).await.is_err());
        assert!(ledger.lookup_failed(&key("a")).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_query() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ledger = Arc::new(ledger(&store, 20));
        for i in 0..5 {
            let k = key(&i.to_string());
            ledger
                .insert_failed(&FailedTask::new(k.as_str(), at(0), format!("e{i}")))
                .await
                .unwrap();
        }

        let mut joins = Vec::new();
        for i in 0..5 {
            let ledger = Arc::clone(&ledger);
            joins.push(tokio::spawn(async move {
                ledger.lookup_failed(&key(&i.to_string())).await
            }));
        }
        for (i, join) in joins.into_iter().enumerate() {
            let row = join.await.unwrap().unwrap().unwrap();
            assert_eq!(row.error, format!("e{i}"));
        }
        assert_eq!(store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn pending_insert_conflicts_and_delete_frees_slot() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ledger = ledger(&store, 1);
        let k = key("lease");

        ledger.insert_pending(&PendingTask::new(k.as_str(), at(0))).await.unwrap();
        assert!(matches!(
            ledger.insert_pending(&PendingTask::new(k.as_str(), at(1))).await,
            Err(InsertError::Conflict(_))
        ));

        ledger.delete(RecordKind::Pending, &k).await.unwrap();
        ledger.insert_pending(&PendingTask::new(k.as_str(), at(2))).await.unwrap();
    }
}
