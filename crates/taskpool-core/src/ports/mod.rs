//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（RDB, 時計）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 永続化層（TaskStore）が正本。ローカルキャッシュは常に従属
//! - 排他は TaskStore の一意制約だけに依存する（プロセス内ロックは取らない）

pub mod clock;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::task_store::TaskStore;
