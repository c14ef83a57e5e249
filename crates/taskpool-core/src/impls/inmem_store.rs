//! InMemoryTaskStore - 開発・テスト用の正本
//!
//! # 学習ポイント
//! - tokio::sync::Mutex による一意制約（create-if-absent）の再現
//! - Arc で共有すれば複数 TaskPool（= 複数 pod）が同じ DB を見ている状態を作れる
//!
//! テスト向けに bulk 読み込み回数の計測と、障害注入（unavailable）を持つ。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    CompletedTask, FailedTask, InsertError, LedgerRecord, PendingTask, RecordKind, StoreError,
};
use crate::ports::TaskStore;

#[derive(Default)]
struct Tables {
    pending: HashMap<String, PendingTask>,
    completed: HashMap<String, CompletedTask>,
    failed: HashMap<String, FailedTask>,
}

/// InMemoryTaskStore は HashMap ベースの TaskStore
#[derive(Default)]
pub struct InMemoryTaskStore {
    tables: Mutex<Tables>,
    fetch_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bulk fetch queries served so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// While set, every operation fails with `StoreError::Backend`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Row count per kind.
    pub async fn count(&self, kind: RecordKind) -> usize {
        let tables = self.tables.lock().await;
        match kind {
            RecordKind::Pending => tables.pending.len(),
            RecordKind::Completed => tables.completed.len(),
            RecordKind::Failed => tables.failed.len(),
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("in-memory store is unavailable".into()));
        }
        Ok(())
    }

    fn begin_fetch(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn select<R: Clone>(table: &HashMap<String, R>, keys: &[String]) -> Vec<R> {
    keys.iter().filter_map(|k| table.get(k).cloned()).collect()
}

fn insert_new<R: LedgerRecord>(table: &mut HashMap<String, R>, record: &R) -> Result<(), InsertError> {
    match table.entry(record.key().to_string()) {
        Entry::Occupied(_) => Err(InsertError::Conflict(record.key().to_string())),
        Entry::Vacant(slot) => {
            slot.insert(record.clone());
            Ok(())
        }
    }
}

fn purge<R: LedgerRecord>(table: &mut HashMap<String, R>, prefix: &str, cutoff: DateTime<Utc>) -> u64 {
    let before = table.len();
    table.retain(|key, record| !(key.starts_with(prefix) && record.created_at() < cutoff));
    (before - table.len()) as u64
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn fetch_pending(&self, keys: &[String]) -> Result<Vec<PendingTask>, StoreError> {
        self.begin_fetch()?;
        Ok(select(&self.tables.lock().await.pending, keys))
    }

    async fn fetch_completed(&self, keys: &[String]) -> Result<Vec<CompletedTask>, StoreError> {
        self.begin_fetch()?;
        Ok(select(&self.tables.lock().await.completed, keys))
    }

    async fn fetch_failed(&self, keys: &[String]) -> Result<Vec<FailedTask>, StoreError> {
        self.begin_fetch()?;
        Ok(select(&self.tables.lock().await.failed, keys))
    }

    async fn insert_pending(&self, task: &PendingTask) -> Result<(), InsertError> {
        self.check_available()?;
        insert_new(&mut self.tables.lock().await.pending, task)
    }

    async fn insert_completed(&self, task: &CompletedTask) -> Result<(), InsertError> {
        self.check_available()?;
        insert_new(&mut self.tables.lock().await.completed, task)
    }

    async fn insert_failed(&self, task: &FailedTask) -> Result<(), InsertError> {
        self.check_available()?;
        insert_new(&mut self.tables.lock().await.failed, task)
    }

    async fn delete(&self, kind: RecordKind, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        match kind {
            RecordKind::Pending => {
                tables.pending.remove(key);
            }
            RecordKind::Completed => {
                tables.completed.remove(key);
            }
            RecordKind::Failed => {
                tables.failed.remove(key);
            }
        }
        Ok(())
    }

    async fn delete_older_than(
        &self,
        kind: RecordKind,
        prefix: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let removed = match kind {
            RecordKind::Pending => purge(&mut tables.pending, prefix, cutoff),
            RecordKind::Completed => purge(&mut tables.completed, prefix, cutoff),
            RecordKind::Failed => purge(&mut tables.failed, prefix, cutoff),
        };
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn pending_insert_is_create_if_absent() {
        let store = InMemoryTaskStore::new();
        store.insert_pending(&PendingTask::new("ns-1", at(0))).await.unwrap();

        let err = store
            .insert_pending(&PendingTask::new("ns-1", at(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, InsertError::Conflict(key) if key == "ns-1"));

        let rows = store.fetch_pending(&["ns-1".to_string()]).await.unwrap();
        assert_eq!(rows, vec![PendingTask::new("ns-1", at(0))]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_have_one_winner() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut joins = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                store.insert_pending(&PendingTask::new("ns-x", at(i))).await
            }));
        }
        let mut winners = 0;
        for join in joins {
            if join.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn completed_is_never_overwritten() {
        let store = InMemoryTaskStore::new();
        let first = CompletedTask::new("ns-1", at(0), "\"a\"".into());
        store.insert_completed(&first).await.unwrap();
        let second = CompletedTask::new("ns-1", at(1), "\"b\"".into());
        assert!(store.insert_completed(&second).await.is_err());

        let rows = store.fetch_completed(&["ns-1".to_string()]).await.unwrap();
        assert_eq!(rows, vec![first]);
    }

    #[tokio::test]
    async fn purge_respects_prefix_and_cutoff() {
        let store = InMemoryTaskStore::new();
        store.insert_failed(&FailedTask::new("a-old", at(0), "e".into())).await.unwrap();
        store.insert_failed(&FailedTask::new("a-new", at(100), "e".into())).await.unwrap();
        store.insert_failed(&FailedTask::new("b-old", at(0), "e".into())).await.unwrap();

        let removed = store
            .delete_older_than(RecordKind::Failed, "a-", at(50))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let keys = ["a-old", "a-new", "b-old"].map(String::from);
        let left: Vec<_> = store
            .fetch_failed(&keys)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(left, vec!["a-new".to_string(), "b-old".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_store_fails_everything() {
        let store = InMemoryTaskStore::new();
        store.set_unavailable(true);
        assert!(store.fetch_completed(&["ns-1".to_string()]).await.is_err());
        assert!(matches!(
            store.insert_pending(&PendingTask::new("ns-1", at(0))).await,
            Err(InsertError::Store(_))
        ));

        store.set_unavailable(false);
        assert!(store.fetch_completed(&["ns-1".to_string()]).await.unwrap().is_empty());
    }
}
