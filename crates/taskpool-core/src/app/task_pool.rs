//! TaskPool - load の本体
//!
//! # load の順序（固定）
//! 1. ローカル成功キャッシュ
//! 2. ローカル失敗キャッシュ
//! 3. canonical key の計算
//! 4. ledger の CompletedTask
//! 5. ledger の FailedTask
//! 6. lease 取得 → Owner なら結果を引き直してから getter 実行 / Contested なら Wait /
//!    Expired なら LeaseTimeout
//!
//! # 学習ポイント
//! - プロセス内ロックは取らない。同一プロセス内の競合も ledger の一意制約だけで裁く
//! - Pending 行は消えることがある（lease 解放・reaper・invalidate）ので、
//!   lease を取れただけでは未計算とは限らない
//! - 結果の永続化はベストエフォート（失敗してもこの呼び出しの結果は返す）
//! - ローカルキャッシュへの反映は tokio::spawn で投げっぱなし。
//!   `invalidate` より前に始まった load の書き込みは世代番号で捨てる

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};

use crate::app::lease::{LeaseState, acquire_lease};
use crate::app::wait::{Resolution, WaitPolicy, wait_for_resolution};
use crate::cache::ExpiringCache;
use crate::domain::{
    CanonicalKey, CompletedTask, FailedTask, InsertError, LoadError, Namespace, PoolId, RecordKind,
};
use crate::ledger::Ledger;
use crate::ports::Clock;
use crate::repeat::Repeater;
use crate::typed::{Codec, Getter, JsonCodec};

/// Everything the builder has validated and wired.
pub(crate) struct PoolParts<K, V, C> {
    pub id: PoolId,
    pub namespace: Namespace,
    pub codec: C,
    pub getter: Arc<dyn Getter<K, V>>,
    pub ledger: Arc<Ledger>,
    pub clock: Arc<dyn Clock>,
    pub lease_ttl: Duration,
    pub wait: WaitPolicy,
    pub release_lease_on_completion: bool,
    pub values: ExpiringCache<K, V>,
    pub failures: ExpiringCache<K, String>,
    pub reaper: Repeater,
}

/// TaskPool は一つの getter を fleet 全体で高々一回だけ実行させる
///
/// Build with [`TaskPoolBuilder`](crate::app::TaskPoolBuilder). Call [`TaskPool::close`]
/// before dropping to stop the reaper and cache sweeps deterministically.
pub struct TaskPool<K, V, C = JsonCodec>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    id: PoolId,
    namespace: Namespace,
    codec: C,
    getter: Arc<dyn Getter<K, V>>,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    lease_ttl: Duration,
    wait: WaitPolicy,
    release_lease_on_completion: bool,
    values: Arc<ExpiringCache<K, V>>,
    failures: Arc<ExpiringCache<K, String>>,
    /// bumped by `invalidate`; deferred cache writes from an older generation are dropped
    generation: Arc<RwLock<u64>>,
    reaper: Mutex<Option<Repeater>>,
}

impl<K, V, C> TaskPool<K, V, C>
where
    K: Serialize + Eq + Hash + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    C: Codec,
{
    pub(crate) fn from_parts(parts: PoolParts<K, V, C>) -> Self {
        Self {
            id: parts.id,
            namespace: parts.namespace,
            codec: parts.codec,
            getter: parts.getter,
            ledger: parts.ledger,
            clock: parts.clock,
            lease_ttl: parts.lease_ttl,
            wait: parts.wait,
            release_lease_on_completion: parts.release_lease_on_completion,
            values: Arc::new(parts.values),
            failures: Arc::new(parts.failures),
            generation: Arc::new(RwLock::new(0)),
            reaper: Mutex::new(Some(parts.reaper)),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Canonical ledger key for `key` in this pool's namespace.
    pub fn canonical_key(&self, key: &K) -> Result<CanonicalKey, LoadError> {
        CanonicalKey::new(&self.namespace, key, &self.codec).map_err(LoadError::Serialization)
    }

    /// Return the memoized outcome for `key`, computing it at most once across every
    /// pool that shares the ledger.
    pub async fn load(&self, key: &K) -> Result<V, LoadError> {
        let generation = *self.generation.read().await;
        if let Some(value) = self.values.get(key).await {
            return Ok(value);
        }
        if let Some(text) = self.failures.get(key).await {
            return Err(LoadError::CachedFailure(text));
        }

        let canonical = self.canonical_key(key)?;

        if let Some(completed) = self.ledger.lookup_completed(&canonical).await? {
            tracing::debug!(pool = %self.id, key = %canonical, "ledger hit (completed)");
            return self.accept_completed(key, &canonical, &completed, generation);
        }
        if let Some(failed) = self.ledger.lookup_failed(&canonical).await? {
            tracing::debug!(pool = %self.id, key = %canonical, "ledger hit (failed)");
            return Err(self.accept_failed(key, failed, generation));
        }

        match acquire_lease(&self.ledger, self.clock.as_ref(), self.lease_ttl, &canonical).await? {
            LeaseState::Owner(_) => self.run_as_owner(key, &canonical, generation).await,
            LeaseState::Contested(pending) => {
                tracing::debug!(
                    pool = %self.id,
                    key = %canonical,
                    since = %pending.created_at,
                    "lease held elsewhere, waiting"
                );
                let resolution = wait_for_resolution(
                    &self.ledger,
                    self.clock.as_ref(),
                    &self.wait,
                    self.lease_ttl,
                    &canonical,
                    &pending,
                )
                .await?;
                match resolution {
                    Resolution::Completed(completed) => {
                        self.accept_completed(key, &canonical, &completed, generation)
                    }
                    Resolution::Failed(failed) => Err(self.accept_failed(key, failed, generation)),
                    Resolution::LeaseTimeout => Err(LoadError::LeaseTimeout {
                        key: canonical.to_string(),
                    }),
                }
            }
            LeaseState::Expired(pending) => {
                tracing::warn!(
                    pool = %self.id,
                    key = %canonical,
                    since = %pending.created_at,
                    "found abandoned lease"
                );
                Err(LoadError::LeaseTimeout {
                    key: canonical.to_string(),
                })
            }
        }
    }

    /// Forget every outcome recorded for `key`, locally and in the ledger, so the next
    /// `load` computes it again. An in-flight owner is not interrupted.
    pub async fn invalidate(&self, key: &K) -> Result<(), LoadError> {
        let canonical = self.canonical_key(key)?;
        for kind in [RecordKind::Completed, RecordKind::Failed, RecordKind::Pending] {
            self.ledger.delete(kind, &canonical).await?;
        }
        // loads that read the ledger before the deletes hold an older generation
        let mut generation = self.generation.write().await;
        *generation += 1;
        self.values.remove(key).await;
        self.failures.remove(key).await;
        drop(generation);
        tracing::info!(pool = %self.id, key = %canonical, "invalidated");
        Ok(())
    }

    /// Stop the reaper and both cache sweeps. A second call only logs.
    pub async fn close(&self) {
        let reaper = self.reaper.lock().await.take();
        let Some(reaper) = reaper else {
            tracing::warn!(pool = %self.id, namespace = %self.namespace, "task pool already closed");
            return;
        };
        reaper.stop().await;
        self.values.close().await;
        self.failures.close().await;
        tracing::info!(pool = %self.id, namespace = %self.namespace, "task pool closed");
    }

    async fn run_as_owner(&self, key: &K, canonical: &CanonicalKey, generation: u64) -> Result<V, LoadError> {
        // an earlier owner may have published and then lost its Pending row
        match self.recheck_outcome(key, canonical, generation).await {
            Ok(Some(replayed)) => {
                self.release_lease(canonical).await;
                return replayed;
            }
            Ok(None) => {}
            Err(err) => {
                self.release_lease(canonical).await;
                return Err(err);
            }
        }

        tracing::info!(pool = %self.id, key = %canonical, "lease acquired, running getter");

        let outcome = self.getter.get(key).await;
        let result = match outcome {
            Ok(value) => {
                self.publish_completed(canonical, &value).await;
                self.remember_value(key, &value, generation);
                Ok(value)
            }
            Err(err) => {
                let text = err.to_string();
                self.publish_failed(canonical, text.clone()).await;
                self.remember_failure(key, text, generation);
                Err(LoadError::Getter(err))
            }
        };

        self.release_lease(canonical).await;
        result
    }

    async fn recheck_outcome(
        &self,
        key: &K,
        canonical: &CanonicalKey,
        generation: u64,
    ) -> Result<Option<Result<V, LoadError>>, LoadError> {
        if let Some(completed) = self.ledger.lookup_completed(canonical).await? {
            tracing::debug!(pool = %self.id, key = %canonical, "outcome published before our lease");
            return Ok(Some(self.accept_completed(key, canonical, &completed, generation)));
        }
        if let Some(failed) = self.ledger.lookup_failed(canonical).await? {
            tracing::debug!(pool = %self.id, key = %canonical, "failure published before our lease");
            return Ok(Some(Err(self.accept_failed(key, failed, generation))));
        }
        Ok(None)
    }

    async fn release_lease(&self, canonical: &CanonicalKey) {
        if !self.release_lease_on_completion {
            return;
        }
        if let Err(err) = self.ledger.delete(RecordKind::Pending, canonical).await {
            tracing::warn!(pool = %self.id, key = %canonical, error = %err, "failed to release lease");
        }
    }

    async fn publish_completed(&self, canonical: &CanonicalKey, value: &V) {
        let raw = match self.codec.encode_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(pool = %self.id, key = %canonical, error = %err, "result not persisted: encode failed");
                return;
            }
        };
        let row = CompletedTask::new(canonical.as_str(), self.clock.now(), raw);
        if let Err(err) = self.ledger.insert_completed(&row).await {
            self.log_publish_error(canonical, RecordKind::Completed, &err);
        }
    }

    async fn publish_failed(&self, canonical: &CanonicalKey, text: String) {
        let row = FailedTask::new(canonical.as_str(), self.clock.now(), text);
        if let Err(err) = self.ledger.insert_failed(&row).await {
            self.log_publish_error(canonical, RecordKind::Failed, &err);
        }
    }

    fn log_publish_error(&self, canonical: &CanonicalKey, kind: RecordKind, err: &InsertError) {
        match err {
            InsertError::Conflict(_) => tracing::warn!(
                pool = %self.id,
                key = %canonical,
                %kind,
                "outcome already recorded, left untouched"
            ),
            InsertError::Store(err) => tracing::warn!(
                pool = %self.id,
                key = %canonical,
                %kind,
                error = %err,
                "failed to persist outcome"
            ),
        }
    }

    fn accept_completed(
        &self,
        key: &K,
        canonical: &CanonicalKey,
        completed: &CompletedTask,
        generation: u64,
    ) -> Result<V, LoadError> {
        let value: V = self
            .codec
            .decode_value(&completed.value)
            .map_err(|source| LoadError::Deserialization {
                key: canonical.to_string(),
                source,
            })?;
        self.remember_value(key, &value, generation);
        Ok(value)
    }

    fn accept_failed(&self, key: &K, failed: FailedTask, generation: u64) -> LoadError {
        self.remember_failure(key, failed.error.clone(), generation);
        LoadError::CachedFailure(failed.error)
    }

    fn remember_value(&self, key: &K, value: &V, generation: u64) {
        let cache = Arc::clone(&self.values);
        let current = Arc::clone(&self.generation);
        let (key, value) = (key.clone(), value.clone());
        tokio::spawn(async move {
            let current = current.read().await;
            if *current == generation {
                cache.set(key, value).await;
            }
        });
    }

    fn remember_failure(&self, key: &K, text: String, generation: u64) {
        let cache = Arc::clone(&self.failures);
        let current = Arc::clone(&self.generation);
        let key = key.clone();
        tokio::spawn(async move {
            let current = current.read().await;
            if *current == generation {
                cache.set(key, text).await;
            }
        });
    }
}
