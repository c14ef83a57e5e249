use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a background task that runs `tick` at a fixed period.
/// - `stop()` で停止要求を送り、ループの終了まで待つ
/// - handle を drop しても `shutdown_tx` が閉じるのでループは止まる
/// - 実行中の tick は中断しない（次の tick を始めないだけ）
pub struct Repeater {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Repeater {
    /// Spawn on the current tokio runtime. The first tick fires one `period` after spawn.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let now = Instant::now();
            let start = now.checked_add(period).unwrap_or(now);
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // Err は sender が drop された
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => tick().await,
                }
            }
            tracing::debug!(task = name, "repeater stopped");
        });

        Self {
            name,
            shutdown_tx,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            tracing::warn!(task = self.name, error = %err, "repeater task ended abnormally");
        }
    }
}
