//! ReaperLoop - 保持期間を過ぎた ledger 行の回収
//!
//! # フロー（1 回分）
//! 1. cutoff = now - value_ttl
//! 2. Pending / Completed / Failed それぞれに `delete_older_than(namespace prefix, cutoff)`
//! 3. 失敗はログだけ残して次の周期に任せる
//!
//! Pending も lease TTL ではなく value TTL で消す。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Namespace, PoolId, RecordKind};
use crate::ledger::Ledger;
use crate::ports::Clock;
use crate::repeat::Repeater;

/// Rows removed per kind in one sweep. `None` means that delete failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub pending: Option<u64>,
    pub completed: Option<u64>,
    pub failed: Option<u64>,
}

impl ReapReport {
    fn record(&mut self, kind: RecordKind, removed: Option<u64>) {
        match kind {
            RecordKind::Pending => self.pending = removed,
            RecordKind::Completed => self.completed = removed,
            RecordKind::Failed => self.failed = removed,
        }
    }

    pub fn total(&self) -> u64 {
        [self.pending, self.completed, self.failed]
            .into_iter()
            .flatten()
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_some() && self.completed.is_some() && self.failed.is_some()
    }
}

/// ReaperLoop は一つの namespace の期限切れ行を定期的に削除
pub struct ReaperLoop {
    pool: PoolId,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
    namespace: Namespace,
    value_ttl: Duration,
}

impl ReaperLoop {
    pub fn new(
        pool: PoolId,
        ledger: Arc<Ledger>,
        clock: Arc<dyn Clock>,
        namespace: Namespace,
        value_ttl: Duration,
    ) -> Self {
        Self {
            pool,
            ledger,
            clock,
            namespace,
            value_ttl,
        }
    }

    /// One sweep over all three kinds. Never fails; errors are logged per kind.
    pub async fn run_once(&self) -> ReapReport {
        let mut report = ReapReport::default();

        let Some(cutoff) = chrono::Duration::from_std(self.value_ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_sub_signed(ttl))
        else {
            tracing::warn!(
                pool = %self.pool,
                namespace = %self.namespace,
                value_ttl = ?self.value_ttl,
                "retention window out of range, skipping sweep"
            );
            return report;
        };

        let prefix = self.namespace.key_prefix();
        for kind in RecordKind::ALL {
            match self.ledger.delete_older_than(kind, &prefix, cutoff).await {
                Ok(removed) => report.record(kind, Some(removed)),
                Err(err) => {
                    tracing::warn!(
                        pool = %self.pool,
                        namespace = %self.namespace,
                        %kind,
                        error = %err,
                        "failed to reap expired rows"
                    );
                    report.record(kind, None);
                }
            }
        }

        if report.total() > 0 {
            tracing::info!(
                pool = %self.pool,
                namespace = %self.namespace,
                pending = ?report.pending,
                completed = ?report.completed,
                failed = ?report.failed,
                "reaped expired rows"
            );
        }
        report
    }

    /// Run `run_once` every `period` until the returned handle is stopped.
    pub fn spawn(self, period: Duration) -> Repeater {
        let reaper = Arc::new(self);
        Repeater::spawn("reaper", period, move || {
            let reaper = Arc::clone(&reaper);
            async move {
                reaper.run_once().await;
            }
        })
    }
}
