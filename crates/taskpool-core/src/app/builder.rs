//! TaskPoolBuilder - TaskPool の構築とワイヤリング
//!
//! # build() で弾くもの（この順に検査）
//! - tokio runtime の外での呼び出し（reaper と cache sweep を spawn するため）
//! - namespace が空、または `-` を含む
//! - store / getter の未設定
//! - 0 の TTL・待ち時間・reap 間隔、0 の batch 件数・並列数
//! - 有限でない、または 1 未満の backoff multiplier
//!
//! lease TTL が value TTL を超える設定はエラーにせず warn だけ出す。

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::config::{TaskPoolConfig, WaitConfig};
use crate::app::reaper_loop::ReaperLoop;
use crate::app::task_pool::{PoolParts, TaskPool};
use crate::cache::ExpiringCache;
use crate::domain::{GetterError, Namespace, NamespaceError, PoolId};
use crate::ledger::Ledger;
use crate::ports::{Clock, SystemClock, TaskStore};
use crate::typed::{Codec, FnGetter, Getter, JsonCodec};

/// TaskPoolBuilder は TaskPool を構築
///
/// # 使用例
/// ```ignore
/// let pool = TaskPoolBuilder::<String, String>::new()
///     .namespace("reverse")
///     .store(store)
///     .getter(ReverseGetter)
///     .lease_ttl(Duration::from_secs(30))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に store / getter / namespace / TTL / batching を検証
/// - 不足や不正があれば BuildError を返す（TaskPool は作られない）
pub struct TaskPoolBuilder<K, V, C = JsonCodec>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    config: TaskPoolConfig,
    store: Option<Arc<dyn TaskStore>>,
    getter: Option<Arc<dyn Getter<K, V>>>,
    clock: Arc<dyn Clock>,
    codec: C,
    _marker: PhantomData<fn(K) -> V>,
}

/// BuildError は TaskPool 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no task store configured")]
    MissingStore,

    #[error("no getter configured")]
    MissingGetter,

    #[error("invalid namespace: {0}")]
    InvalidNamespace(#[from] NamespaceError),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{0} must be greater than zero")]
    InvalidBatching(&'static str),

    #[error("wait multiplier must be a finite number >= 1.0, got {0}")]
    InvalidWaitMultiplier(f64),

    #[error("TaskPool must be built inside a tokio runtime")]
    NoRuntime,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl<K, V> TaskPoolBuilder<K, V, JsonCodec>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            config: TaskPoolConfig::default(),
            store: None,
            getter: None,
            clock: Arc::new(SystemClock),
            codec: JsonCodec,
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for TaskPoolBuilder<K, V, JsonCodec>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> TaskPoolBuilder<K, V, C>
where
    K: Serialize + Eq + Hash + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    C: Codec,
{
    /// Replace every tunable at once (e.g. loaded from TOML).
    pub fn config(mut self, config: TaskPoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn getter(self, getter: impl Getter<K, V> + 'static) -> Self {
        self.getter_arc(Arc::new(getter))
    }

    pub fn getter_arc(mut self, getter: Arc<dyn Getter<K, V>>) -> Self {
        self.getter = Some(getter);
        self
    }

    /// Blocking getter; runs on `spawn_blocking`.
    pub fn getter_fn<E, F>(self, f: F) -> Self
    where
        E: Into<GetterError>,
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        self.getter(FnGetter::new(f))
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn codec<C2: Codec>(self, codec: C2) -> TaskPoolBuilder<K, V, C2> {
        TaskPoolBuilder {
            config: self.config,
            store: self.store,
            getter: self.getter,
            clock: self.clock,
            codec,
            _marker: PhantomData,
        }
    }

    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.config.lease_ttl_ms = millis(ttl);
        self
    }

    pub fn value_ttl(mut self, ttl: Duration) -> Self {
        self.config.value_ttl_ms = millis(ttl);
        self
    }

    pub fn local_ttl(mut self, ttl: Duration) -> Self {
        self.config.local_ttl_ms = Some(millis(ttl));
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval_ms = Some(millis(interval));
        self
    }

    pub fn max_concurrent_batches(mut self, n: usize) -> Self {
        self.config.max_concurrent_batches = n;
        self
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.config.max_batch_size = n;
        self
    }

    pub fn wait(mut self, wait: WaitConfig) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn release_lease_on_completion(mut self, release: bool) -> Self {
        self.config.release_lease_on_completion = release;
        self
    }

    /// TaskPoolBuilder を検証して TaskPool を生成
    ///
    /// # 検証
    /// - tokio runtime の中で呼ばれていること（reaper と sweep を spawn する）
    /// - namespace が空でなく '-' を含まないこと
    /// - store / getter が設定済みであること
    /// - TTL・batching・wait の値が正であること
    pub fn build(self) -> Result<TaskPool<K, V, C>, BuildError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let config = self.config;
        let namespace = Namespace::new(config.namespace.clone())?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let getter = self.getter.ok_or(BuildError::MissingGetter)?;
        validate(&config)?;

        if config.lease_ttl() > config.value_ttl() {
            tracing::warn!(
                namespace = %namespace,
                lease_ttl = ?config.lease_ttl(),
                value_ttl = ?config.value_ttl(),
                "lease ttl exceeds value ttl; abandoned leases will be reaped before they expire"
            );
        }

        let id = PoolId::generate(self.clock.now());
        let ledger = Arc::new(Ledger::new(store, config.batch_options()));
        let reaper = ReaperLoop::new(
            id,
            Arc::clone(&ledger),
            Arc::clone(&self.clock),
            namespace.clone(),
            config.value_ttl(),
        )
        .spawn(config.reap_interval());

        tracing::info!(
            pool = %id,
            namespace = %namespace,
            lease_ttl = ?config.lease_ttl(),
            value_ttl = ?config.value_ttl(),
            "task pool started"
        );

        Ok(TaskPool::from_parts(PoolParts {
            id,
            namespace,
            codec: self.codec,
            getter,
            ledger,
            clock: self.clock,
            lease_ttl: config.lease_ttl(),
            wait: config.wait.policy(),
            release_lease_on_completion: config.release_lease_on_completion,
            values: ExpiringCache::new("values", config.local_ttl()),
            failures: ExpiringCache::new("failures", config.local_ttl()),
            reaper,
        }))
    }
}

fn validate(config: &TaskPoolConfig) -> Result<(), BuildError> {
    let durations = [
        ("lease_ttl", config.lease_ttl_ms),
        ("value_ttl", config.value_ttl_ms),
        ("local_ttl", config.local_ttl_ms.unwrap_or(config.value_ttl_ms)),
        ("wait.base_delay", config.wait.base_delay_ms),
    ];
    for (name, ms) in durations {
        if ms == 0 {
            return Err(BuildError::ZeroDuration(name));
        }
    }
    if config.reap_interval_ms == Some(0) {
        return Err(BuildError::ZeroDuration("reap_interval"));
    }
    if config.max_concurrent_batches == 0 {
        return Err(BuildError::InvalidBatching("max_concurrent_batches"));
    }
    if config.max_batch_size == 0 {
        return Err(BuildError::InvalidBatching("max_batch_size"));
    }
    let multiplier = config.wait.multiplier;
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(BuildError::InvalidWaitMultiplier(multiplier));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::impls::InMemoryTaskStore;

    fn complete() -> TaskPoolBuilder<String, String> {
        TaskPoolBuilder::new()
            .namespace("reverse")
            .store(Arc::new(InMemoryTaskStore::new()))
            .getter_fn(|key: &String| Ok::<_, GetterError>(key.chars().rev().collect()))
    }

    #[tokio::test]
    async fn test_build_success() {
        let pool = complete().build().unwrap();
        assert_eq!(pool.lease_ttl(), Duration::from_secs(30));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_build_missing_store() {
        let result = TaskPoolBuilder::<String, String>::new()
            .namespace("reverse")
            .getter_fn(|key: &String| Ok::<_, GetterError>(key.clone()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingStore)));
    }

    #[tokio::test]
    async fn test_build_missing_getter() {
        let result = TaskPoolBuilder::<String, String>::new()
            .namespace("reverse")
            .store(Arc::new(InMemoryTaskStore::new()))
            .build();
        assert!(matches!(result, Err(BuildError::MissingGetter)));
    }

    #[rstest]
    #[case("", NamespaceError::Empty)]
    #[case("my-getter", NamespaceError::ContainsSeparator("my-getter".into()))]
    #[tokio::test]
    async fn test_build_invalid_namespace(#[case] namespace: &str, #[case] expected: NamespaceError) {
        let result = complete().namespace(namespace).build();
        assert!(matches!(result, Err(BuildError::InvalidNamespace(e)) if e == expected));
    }

    #[rstest]
    #[case::lease(complete().lease_ttl(Duration::ZERO), "lease_ttl")]
    #[case::value(complete().value_ttl(Duration::from_micros(10)), "value_ttl")]
    #[case::local(complete().local_ttl(Duration::ZERO), "local_ttl")]
    #[case::reap(complete().reap_interval(Duration::ZERO), "reap_interval")]
    #[case::wait(complete().wait(WaitConfig { base_delay_ms: 0, ..WaitConfig::default() }), "wait.base_delay")]
    #[tokio::test]
    async fn test_build_zero_durations(
        #[case] builder: TaskPoolBuilder<String, String>,
        #[case] name: &str,
    ) {
        let result = builder.build();
        assert!(matches!(result, Err(BuildError::ZeroDuration(n)) if n == name));
    }

    #[tokio::test]
    async fn test_build_invalid_batching() {
        let result = complete().max_batch_size(0).build();
        assert!(matches!(result, Err(BuildError::InvalidBatching("max_batch_size"))));

        let result = complete().max_concurrent_batches(0).build();
        assert!(matches!(result, Err(BuildError::InvalidBatching("max_concurrent_batches"))));
    }

    #[tokio::test]
    async fn test_build_invalid_multiplier() {
        let wait = WaitConfig {
            multiplier: 0.5,
            ..WaitConfig::default()
        };
        let result = complete().wait(wait).build();
        assert!(matches!(result, Err(BuildError::InvalidWaitMultiplier(_))));
    }

    #[test]
    fn test_build_outside_runtime() {
        let result = complete().build();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_build_from_toml_config() {
        let config = TaskPoolConfig::from_toml_str(
            r#"
            namespace = "fromtoml"
            lease_ttl_ms = 1000
            value_ttl_ms = 60000
            "#,
        )
        .unwrap();
        let pool = complete().config(config).build().unwrap();
        assert_eq!(pool.namespace().as_str(), "fromtoml");
        assert_eq!(pool.lease_ttl(), Duration::from_secs(1));
        pool.close().await;
    }
}
