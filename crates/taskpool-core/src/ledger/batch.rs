//! Batched point lookups.
//!
//! Concurrent `load(key)` calls issued within `window` are coalesced into one bulk
//! fetch. A batch is flushed early once it reaches `max_batch_size`, and at most
//! `max_concurrent_batches` bulk fetches run at a time.
//!
//! A key that the fetch does not return resolves to `Ok(None)`; only a failed fetch
//! produces `Err`, and that error is delivered to every waiter of the batch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, oneshot};

use crate::domain::StoreError;

/// Bulk fetch used by a `BatchLoader`.
#[async_trait]
pub trait BatchFetch<V>: Send + Sync {
    async fn fetch_batch(&self, keys: Vec<String>) -> Result<HashMap<String, V>, StoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub max_concurrent_batches: usize,
    pub max_batch_size: usize,
    pub window: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 3,
            max_batch_size: 1_000,
            window: Duration::from_millis(2),
        }
    }
}

type Reply<V> = oneshot::Sender<Result<Option<V>, StoreError>>;

struct Queue<V> {
    /// Bumped on every flush so a stale window timer does not flush a newer batch.
    epoch: u64,
    waiters: Vec<(String, Reply<V>)>,
}

impl<V> Queue<V> {
    fn take(&mut self) -> Vec<(String, Reply<V>)> {
        self.epoch += 1;
        std::mem::take(&mut self.waiters)
    }
}

struct Inner<V> {
    fetcher: Arc<dyn BatchFetch<V>>,
    queue: Mutex<Queue<V>>,
    permits: Semaphore,
    options: BatchOptions,
}

pub struct BatchLoader<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for BatchLoader<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + 'static> BatchLoader<V> {
    pub fn new(fetcher: Arc<dyn BatchFetch<V>>, options: BatchOptions) -> Self {
        let options = BatchOptions {
            max_concurrent_batches: options.max_concurrent_batches.max(1),
            max_batch_size: options.max_batch_size.max(1),
            window: options.window,
        };
        Self {
            inner: Arc::new(Inner {
                fetcher,
                queue: Mutex::new(Queue {
                    epoch: 0,
                    waiters: Vec::new(),
                }),
                permits: Semaphore::new(options.max_concurrent_batches),
                options,
            }),
        }
    }

    /// Look up one key. `Ok(None)` means the key is absent.
    pub async fn load(&self, key: &str) -> Result<Option<V>, StoreError> {
        let (tx, rx) = oneshot::channel();

        let full_batch = {
            let mut queue = self.inner.queue.lock().await;
            queue.waiters.push((key.to_string(), tx));
            if queue.waiters.len() >= self.inner.options.max_batch_size {
                Some(queue.take())
            } else {
                if queue.waiters.len() == 1 {
                    self.schedule_flush(queue.epoch);
                }
                None
            }
        };

        if let Some(batch) = full_batch {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { dispatch(inner, batch).await });
        }

        rx.await
            .map_err(|_| StoreError::LoaderClosed(key.to_string()))?
    }

    fn schedule_flush(&self, epoch: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.options.window).await;
            let batch = {
                let mut queue = inner.queue.lock().await;
                if queue.epoch != epoch || queue.waiters.is_empty() {
                    return;
                }
                queue.take()
            };
            dispatch(inner, batch).await;
        });
    }
}

async fn dispatch<V: Clone + Send + 'static>(inner: Arc<Inner<V>>, batch: Vec<(String, Reply<V>)>) {
    let keys: Vec<String> = batch
        .iter()
        .map(|(key, _)| key.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let result = match inner.permits.acquire().await {
        Ok(_permit) => inner.fetcher.fetch_batch(keys).await,
        Err(_) => Err(StoreError::Backend("batch loader semaphore closed".into())),
    };

    match result {
        Ok(found) => {
            for (key, reply) in batch {
                let _ = reply.send(Ok(found.get(&key).cloned()));
            }
        }
        Err(err) => {
            tracing::debug!(error = %err, size = batch.len(), "bulk lookup failed");
            for (_, reply) in batch {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Echoes keys starting with "hit" and records batch sizes.
    #[derive(Default)]
    struct EchoFetch {
        calls: AtomicUsize,
        sizes: std::sync::Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchFetch<String> for EchoFetch {
        async fn fetch_batch(&self, keys: Vec<String>) -> Result<HashMap<String, String>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().unwrap().push(keys.len());
            if self.fail {
                return Err(StoreError::Backend("db down".into()));
            }
            Ok(keys
                .into_iter()
                .filter(|k| k.starts_with("hit"))
                .map(|k| (k.clone(), k.to_uppercase()))
                .collect())
        }
    }

    fn options(max_batch_size: usize, window_ms: u64) -> BatchOptions {
        BatchOptions {
            max_concurrent_batches: 2,
            max_batch_size,
            window: Duration::from_millis(window_ms),
        }
    }

    #[tokio::test]
    async fn missing_is_not_an_error() {
        let fetch = Arc::new(EchoFetch::default());
        let loader = BatchLoader::new(fetch, options(10, 1));

        assert_eq!(loader.load("hit-1").await.unwrap(), Some("HIT-1".to_string()));
        assert_eq!(loader.load("miss-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_loads_are_coalesced() {
        let fetch = Arc::new(EchoFetch::default());
        let loader = BatchLoader::new(fetch.clone(), options(100, 20));

        let mut joins = Vec::new();
        for i in 0..10 {
            let loader = loader.clone();
            joins.push(tokio::spawn(async move { loader.load(&format!("hit-{i}")).await }));
        }
        for (i, join) in joins.into_iter().enumerate() {
            assert_eq!(join.await.unwrap().unwrap(), Some(format!("HIT-{i}")));
        }

        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*fetch.sizes.lock().unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn duplicate_keys_are_fetched_once() {
        let fetch = Arc::new(EchoFetch::default());
        let loader = BatchLoader::new(fetch.clone(), options(100, 20));

        let (a, b) = tokio::join!(loader.load("hit-a"), loader.load("hit-a"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(*fetch.sizes.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn full_batch_flushes_before_window() {
        let fetch = Arc::new(EchoFetch::default());
        // window long enough that only the size trigger can explain a fast answer
        let loader = BatchLoader::new(fetch.clone(), options(2, 60_000));

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(loader.load("hit-1"), loader.load("hit-2"))
        })
        .await
        .unwrap();

        assert!(result.0.unwrap().is_some());
        assert!(result.1.unwrap().is_some());
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_error_reaches_every_waiter() {
        let fetch = Arc::new(EchoFetch {
            fail: true,
            ..Default::default()
        });
        let loader = BatchLoader::new(fetch, options(100, 5));

        let (a, b) = tokio::join!(loader.load("hit-1"), loader.load("miss-2"));
        assert!(matches!(a, Err(StoreError::Backend(_))));
        assert!(matches!(b, Err(StoreError::Backend(_))));
    }
}
