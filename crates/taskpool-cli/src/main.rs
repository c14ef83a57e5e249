//! taskpool-demo: two simulated pods sharing one SQLite ledger.
//!
//! Usage: `taskpool-cli [config.toml] [ledger.db]`
//!
//! Scenario 1: both pods ask for the same key within 100ms; the getter runs once.
//! Scenario 2: a failing key is computed once and replayed as a cached failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use taskpool_core::app::{TaskPoolBuilder, TaskPoolConfig};
use taskpool_core::impls::SqliteTaskStore;
use taskpool_core::typed::Getter;
use taskpool_core::{GetterError, LoadError, TaskPool};

/// 重い計算のつもり：文字列を反転するだけだが 3 秒かかる
struct SlowReverse {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Getter<String, String> for SlowReverse {
    async fn get(&self, key: &String) -> Result<String, GetterError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(key = %key, call = n, "getter running");
        tokio::time::sleep(self.delay).await;
        if key == "bad" {
            return Err(format!("cannot reverse {key:?}").into());
        }
        Ok(key.chars().rev().collect())
    }
}

#[derive(Debug, Serialize)]
struct Outcome {
    pod: &'static str,
    key: String,
    elapsed_ms: u128,
    value: Option<String>,
    error: Option<String>,
    cached_failure: bool,
}

async fn timed_load(pod: &'static str, pool: Arc<TaskPool<String, String>>, key: &str) -> Outcome {
    let started = Instant::now();
    let result = pool.load(&key.to_string()).await;
    let elapsed_ms = started.elapsed().as_millis();
    match result {
        Ok(value) => Outcome {
            pod,
            key: key.to_string(),
            elapsed_ms,
            value: Some(value),
            error: None,
            cached_failure: false,
        },
        Err(err) => Outcome {
            pod,
            key: key.to_string(),
            elapsed_ms,
            value: None,
            cached_failure: err.is_cached_failure(),
            error: Some(failure_or_message(&err)),
        },
    }
}

fn failure_or_message(err: &LoadError) -> String {
    err.failure_text().unwrap_or_else(|| err.to_string())
}

fn open_pod(
    config: &TaskPoolConfig,
    db: &Path,
    getter: Arc<SlowReverse>,
) -> Result<Arc<TaskPool<String, String>>> {
    let store = SqliteTaskStore::open(db)
        .with_context(|| format!("failed to open ledger at {}", db.display()))?;
    let pool = TaskPoolBuilder::<String, String>::new()
        .config(config.clone())
        .store(Arc::new(store))
        .getter_arc(getter)
        .build()?;
    Ok(Arc::new(pool))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = match args.next() {
        Some(path) => TaskPoolConfig::load(&path)?,
        None => TaskPoolConfig::default(),
    };
    if config.namespace.is_empty() {
        config.namespace = "reverse".into();
    }
    let (db, temporary) = match args.next() {
        Some(path) => (PathBuf::from(path), false),
        None => (
            std::env::temp_dir().join(format!("taskpool-demo-{}.db", std::process::id())),
            true,
        ),
    };
    tracing::info!(db = %db.display(), namespace = %config.namespace, "taskpool demo starting");

    let getter = Arc::new(SlowReverse {
        calls: AtomicUsize::new(0),
        delay: Duration::from_secs(3),
    });
    let pod_a = open_pod(&config, &db, Arc::clone(&getter))?;
    let pod_b = open_pod(&config, &db, Arc::clone(&getter))?;

    // Scenario 1
    let a = tokio::spawn(timed_load("a", Arc::clone(&pod_a), "taskpool"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let b = tokio::spawn(timed_load("b", Arc::clone(&pod_b), "taskpool"));
    let outcomes = vec![a.await?, b.await?];
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    println!("getter calls so far: {}", getter.calls.load(Ordering::SeqCst));

    // Scenario 2
    let fresh = timed_load("a", Arc::clone(&pod_a), "bad").await;
    let replay_b = timed_load("b", Arc::clone(&pod_b), "bad").await;
    let replay_a = timed_load("a", Arc::clone(&pod_a), "bad").await;
    println!("{}", serde_json::to_string_pretty(&[fresh, replay_b, replay_a])?);
    println!("getter calls total: {}", getter.calls.load(Ordering::SeqCst));

    pod_a.close().await;
    pod_b.close().await;

    if temporary {
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{suffix}", db.display()));
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove demo ledger");
                }
            }
        }
    }
    Ok(())
}
