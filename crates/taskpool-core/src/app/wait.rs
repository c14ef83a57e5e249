//! Wait - lease を取れなかった呼び出し側のポーリング
//!
//! # フロー（1 ラウンド）
//! 1. 手元の PendingTask が lease TTL を超えていたら即 `LeaseTimeout`
//! 2. backoff だけ sleep し、次の delay を倍にする
//! 3. CompletedTask を引く → あれば終了
//! 4. FailedTask を引く → あれば終了
//! 5. 1 に戻る
//!
//! lease TTL を超えた直後のラウンドで必ず抜けるので、待ち時間は
//! lease TTL + backoff 一回分で上から抑えられる。

use std::time::Duration;

use rand::Rng;

use crate::domain::{CanonicalKey, CompletedTask, FailedTask, LedgerRecord, PendingTask, StoreError};
use crate::ledger::Ledger;
use crate::ports::Clock;

/// Backoff schedule for lease waiters.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    /// Delay before the first poll.
    pub base_delay: Duration,

    /// Growth factor between polls.
    pub multiplier: f64,

    /// Upper bound for a single delay. `None` keeps doubling forever.
    pub max_delay: Option<Duration>,

    /// Equal jitter: each delay is drawn from `[d/2, d]`.
    pub jitter: bool,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

impl WaitPolicy {
    /// Delay before poll number `attempt` (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempt - 1), then capped, then jittered.
    ///
    /// Example with base_delay=100ms, multiplier=2.0:
    /// - attempt 1: 100ms
    /// - attempt 2: 200ms
    /// - attempt 3: 400ms
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let mut delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        if let Some(max_delay) = self.max_delay {
            delay = delay.min(max_delay);
        }
        if self.jitter {
            let half = delay / 2;
            let spread = rand::thread_rng().gen_range(0.0..=1.0);
            delay = half + half.mul_f64(spread);
        }
        delay
    }
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Completed(CompletedTask),
    Failed(FailedTask),
    LeaseTimeout,
}

/// Poll the ledger until the lease owner publishes an outcome or the lease expires.
///
/// The age check uses the Pending row seen at acquisition time; the row is not
/// looked up again.
pub async fn wait_for_resolution(
    ledger: &Ledger,
    clock: &dyn Clock,
    policy: &WaitPolicy,
    lease_ttl: Duration,
    key: &CanonicalKey,
    pending: &PendingTask,
) -> Result<Resolution, StoreError> {
    let mut attempt: u32 = 1;
    loop {
        if pending.is_older_than(lease_ttl, clock.now()) {
            tracing::debug!(key = %key, attempt, "lease expired while waiting");
            return Ok(Resolution::LeaseTimeout);
        }

        let delay = policy.next_delay(attempt);
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);

        if let Some(completed) = ledger.lookup_completed(key).await? {
            return Ok(Resolution::Completed(completed));
        }
        if let Some(failed) = ledger.lookup_failed(key).await? {
            return Ok(Resolution::Failed(failed));
        }
    }
}
