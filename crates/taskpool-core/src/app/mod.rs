//! App - アプリケーション層
//!
//! このモジュールは、ports と ledger を組み合わせて TaskPool を実装します。
//!
//! # 主要コンポーネント
//! - **TaskPoolBuilder**: TaskPool の構築とワイヤリング（fail-fast 検証）
//! - **TaskPoolConfig**: TOML から読める設定
//! - **TaskPool**: load / invalidate / close
//! - **lease / wait**: Pending 行による分散排他と、負けた側の backoff ポーリング
//! - **ReaperLoop**: 保持期間を過ぎた ledger 行の回収

pub mod builder;
pub mod config;
pub mod lease;
pub mod reaper_loop;
pub mod task_pool;
pub mod wait;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, TaskPoolBuilder};
pub use self::config::{ConfigError, TaskPoolConfig, WaitConfig};
pub use self::lease::{LeaseState, acquire_lease};
pub use self::reaper_loop::{ReapReport, ReaperLoop};
pub use self::task_pool::TaskPool;
pub use self::wait::{Resolution, WaitPolicy, wait_for_resolution};
