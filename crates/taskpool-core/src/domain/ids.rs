//! PoolId - TaskPool インスタンスの識別子
//!
//! ULID ベースなので、ログ上で複数 pod（TaskPool）の処理順序を追いやすい。
//! 永続化はしない（ログのフィールド専用）。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(Ulid);

impl PoolId {
    /// 指定時刻ベースで生成（ランダム部分があるので同時刻でも一意）
    pub fn generate(now: DateTime<Utc>) -> Self {
        let timestamp_ms = now.timestamp_millis().max(0) as u64;
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let a = PoolId::generate(now);
        let b = PoolId::generate(now);

        assert_ne!(a, b);
        assert!(a.to_string().starts_with("pool-"));

        // timestamp 部分は同じはず
        assert_eq!(a.as_ulid().timestamp_ms(), now.timestamp_millis() as u64);
        assert_eq!(b.as_ulid().timestamp_ms(), now.timestamp_millis() as u64);
    }
}
