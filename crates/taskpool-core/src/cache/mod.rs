//! Cache - プロセスローカルの結果キャッシュ
//!
//! TaskPool は成功用と失敗用の二つを持つ。どちらも正本ではなく、ledger の写しに過ぎない。

pub mod memory;

pub use self::memory::ExpiringCache;
