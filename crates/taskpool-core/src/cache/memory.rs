//! ExpiringCache - プロセス内の TTL 付きキャッシュ
//!
//! 中身は `moka::future::Cache`（`time_to_live` 付き）。
//! 期限切れのエントリは `get` の時点でミスになり、実際の追い出しは
//! `ttl/4` ごとの sweep（`run_pending_tasks`）で行う。
//! sweep は `Repeater` が所有し、`close()` で一度だけ止める。

use std::hash::Hash;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::Mutex;

use crate::repeat::Repeater;

// moka rejects a time_to_live beyond 1000 years
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// TTL-bounded map from raw input key to a cached outcome.
pub struct ExpiringCache<K, V> {
    name: &'static str,
    ttl: Duration,
    inner: Cache<K, V>,
    sweeper: Mutex<Option<Repeater>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start a cache whose sweep runs every `ttl / 4`. Must be called inside a tokio runtime.
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        let ttl = ttl.min(MAX_TTL);
        Self::with_sweep_interval(name, ttl, ttl / 4)
    }

    pub fn with_sweep_interval(name: &'static str, ttl: Duration, sweep_interval: Duration) -> Self {
        let ttl = ttl.min(MAX_TTL);
        let inner: Cache<K, V> = Cache::builder().name(name).time_to_live(ttl).build();

        let swept = inner.clone();
        let sweeper = Repeater::spawn(name, sweep_interval, move || {
            let swept = swept.clone();
            async move {
                let removed = sweep_once(&swept).await;
                if removed > 0 {
                    tracing::debug!(cache = name, removed, "swept expired local entries");
                }
            }
        });

        Self {
            name,
            ttl,
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries older than the TTL are misses even before the sweep evicts them.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    /// Insert or overwrite; the entry's age restarts from now.
    pub async fn set(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn remove(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Run one sweep now; returns roughly how many entries were evicted.
    pub async fn sweep(&self) -> u64 {
        sweep_once(&self.inner).await
    }

    /// Entry count as of the last sweep.
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background sweep. Returns `false` if it was already stopped.
    ///
    /// `get` / `set` keep working afterwards; expired entries still read as misses.
    pub async fn close(&self) -> bool {
        let sweeper = self.sweeper.lock().await.take();
        match sweeper {
            Some(sweeper) => {
                sweeper.stop().await;
                true
            }
            None => {
                tracing::debug!(cache = self.name, "cache already closed");
                false
            }
        }
    }
}

async fn sweep_once<K, V>(cache: &Cache<K, V>) -> u64
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let before = cache.entry_count();
    cache.run_pending_tasks().await;
    before.saturating_sub(cache.entry_count())
}
