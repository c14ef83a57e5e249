//! Lease - Pending 行の一意制約による分散排他
//!
//! # 状態
//! - `Owner`: insert に勝った。getter を一度だけ実行する
//! - `Contested`: 既に誰かが実行中（lease TTL 以内）。Wait に回る
//! - `Expired`: 既存の Pending が lease TTL を超えている。奪い取りはしない

use std::time::Duration;

use crate::domain::{CanonicalKey, InsertError, LedgerRecord, PendingTask, StoreError};
use crate::ledger::Ledger;
use crate::ports::Clock;

/// Insert conflicted but the row was gone on lookup (reaped or invalidated in between).
/// Retry the insert this many times before giving up.
const VANISHED_ROW_RETRIES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum LeaseState {
    Owner(PendingTask),
    Contested(PendingTask),
    Expired(PendingTask),
}

pub async fn acquire_lease(
    ledger: &Ledger,
    clock: &dyn Clock,
    lease_ttl: Duration,
    key: &CanonicalKey,
) -> Result<LeaseState, StoreError> {
    for _ in 0..VANISHED_ROW_RETRIES {
        let candidate = PendingTask::new(key.as_str(), clock.now());
        match ledger.insert_pending(&candidate).await {
            Ok(()) => return Ok(LeaseState::Owner(candidate)),
            Err(InsertError::Store(err)) => return Err(err),
            Err(InsertError::Conflict(_)) => {}
        }

        match ledger.lookup_pending(key).await? {
            Some(existing) if existing.is_older_than(lease_ttl, clock.now()) => {
                return Ok(LeaseState::Expired(existing));
            }
            Some(existing) => return Ok(LeaseState::Contested(existing)),
            None => {
                tracing::debug!(key = %key, "pending row vanished after conflict, retrying insert");
            }
        }
    }

    Err(StoreError::Backend(format!(
        "pending row for key={key} conflicted but could not be read back"
    )))
}
