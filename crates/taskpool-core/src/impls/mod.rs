//! Impls - TaskStore の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・開発用の正本（Arc で複数 pool から共有）
//! - **SqliteTaskStore**: rusqlite による永続化。複数接続（= 複数 pod）で同じファイルを共有できる

pub mod inmem_store;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::inmem_store::InMemoryTaskStore;
pub use self::sqlite_store::SqliteTaskStore;
