//! taskpool-core
//!
//! Fleet-wide at-most-once memoization: many processes share one expensive, pure
//! computation keyed by its input, and the computation runs at most once per key
//! within the retention window no matter which process is asked.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（key, record, ids, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock）
//! - **typed**: 型付き API（Getter trait, Codec）
//! - **impls**: TaskStore の実装（InMemoryTaskStore, SqliteTaskStore）
//! - **ledger**: TaskStore + BatchLoader（point lookup を bulk query にまとめる）
//! - **cache**: プロセスローカルの TTL キャッシュ
//! - **app**: TaskPool 本体（builder, config, lease, wait, reaper）
//!
//! # 使用例
//! ```ignore
//! let pool = TaskPoolBuilder::<String, String>::new()
//!     .namespace("reverse")
//!     .store(Arc::new(SqliteTaskStore::open("ledger.db")?))
//!     .getter_fn(|id: &String| Ok::<_, GetterError>(id.chars().rev().collect()))
//!     .build()?;
//!
//! let value = pool.load(&"abc".to_string()).await?;
//! pool.close().await;
//! ```

pub mod domain;
pub mod ports;
pub mod typed;
pub mod impls;
pub mod ledger;
pub mod cache;
pub mod app;

mod repeat;

pub use crate::app::{BuildError, TaskPool, TaskPoolBuilder, TaskPoolConfig};
pub use crate::domain::{ErrorKind, GetterError, LoadError, StoreError};
