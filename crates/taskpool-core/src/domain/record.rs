//! Ledger records: Pending (lease held), Completed, Failed.
//!
//! Design:
//! - Every record is keyed by its canonical key string (unique per kind).
//! - Completed / Failed are write-once; nothing in the system updates them.
//! - Rows are removed only by the reaper or an explicit invalidation.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three logical tables of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Pending,
    Completed,
    Failed,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Pending,
        RecordKind::Completed,
        RecordKind::Failed,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            RecordKind::Pending => "pending_tasks",
            RecordKind::Completed => "completed_tasks",
            RecordKind::Failed => "failed_tasks",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::Pending => "pending",
            RecordKind::Completed => "completed",
            RecordKind::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Common accessors used by the ledger and batch loader.
pub trait LedgerRecord: Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn key(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    /// `true` once the record is strictly older than `ttl` at `now`.
    ///
    /// A record stamped in the future (clock skew between pods) is never expired.
    fn is_older_than(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match (now - self.created_at()).to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }
}

/// An in-flight lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl PendingTask {
    pub fn new(key: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            created_at,
        }
    }
}

/// Successful result, stored in the codec's serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub value: String,
}

impl CompletedTask {
    pub fn new(key: impl Into<String>, created_at: DateTime<Utc>, value: String) -> Self {
        Self {
            key: key.into(),
            created_at,
            value,
        }
    }
}

/// Failed result; the error text is replayed verbatim as a cached failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTask {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub error: String,
}

impl FailedTask {
    pub fn new(key: impl Into<String>, created_at: DateTime<Utc>, error: String) -> Self {
        Self {
            key: key.into(),
            created_at,
            error,
        }
    }
}

macro_rules! impl_ledger_record {
    ($ty:ty, $kind:expr) => {
        impl LedgerRecord for $ty {
            const KIND: RecordKind = $kind;

            fn key(&self) -> &str {
                &self.key
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        }
    };
}

impl_ledger_record!(PendingTask, RecordKind::Pending);
impl_ledger_record!(CompletedTask, RecordKind::Completed);
impl_ledger_record!(FailedTask, RecordKind::Failed);

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn expiry_is_strict() {
        let pending = PendingTask::new("ns-1", at(0));
        let ttl = Duration::from_secs(10);

        assert!(!pending.is_older_than(ttl, at(5)));
        assert!(!pending.is_older_than(ttl, at(10)));
        assert!(pending.is_older_than(ttl, at(11)));
    }

    #[test]
    fn future_records_are_not_expired() {
        let pending = PendingTask::new("ns-1", at(100));
        assert!(!pending.is_older_than(Duration::ZERO, at(0)));
    }

    #[test]
    fn kinds_map_to_distinct_tables() {
        let tables: Vec<_> = RecordKind::ALL.iter().map(|k| k.table_name()).collect();
        assert_eq!(tables, vec!["pending_tasks", "completed_tasks", "failed_tasks"]);
        assert_eq!(CompletedTask::KIND.to_string(), "completed");
    }
}
