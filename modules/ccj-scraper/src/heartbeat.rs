//! Liveness ticker for a running controller.
//!
//! Counts one beat per interval while the controller is in an active stage.
//! The ticker has its own task, so beats keep coming while the pipeline is
//! parked on a notification or a query reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Heartbeat {
    interval: Duration,
    count: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn new(interval: Duration, count: Arc<AtomicU64>) -> Self {
        Self { interval, count }
    }

    /// Tick until `shutdown` fires. `is_active` gates each beat.
    pub fn spawn<F>(self, is_active: F, shutdown: CancellationToken) -> JoinHandle<()>
    where
        F: Fn() -> bool + Send + 'static,
    {
        tokio::spawn(self.run(is_active, shutdown))
    }

    async fn run<F>(self, is_active: F, shutdown: CancellationToken)
    where
        F: Fn() -> bool + Send + 'static,
    {
        // First beat lands one full interval after start.
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if !is_active() {
                        break;
                    }
                    let beats = self.count.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(beats, "Heartbeat");
                }
            }
        }
        debug!(beats = self.count.load(Ordering::SeqCst), "Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    const INTERVAL: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn counts_whole_intervals_only() {
        let count = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();
        Heartbeat::new(INTERVAL, count.clone()).spawn(|| true, shutdown.clone());

        tokio::time::sleep(INTERVAL * 3 + Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_counting_after_shutdown() {
        let count = Arc::new(AtomicU64::new(0));
        let shutdown = CancellationToken::new();
        let task = Heartbeat::new(INTERVAL, count.clone()).spawn(|| true, shutdown.clone());

        tokio::time::sleep(INTERVAL * 2 + Duration::from_millis(100)).await;
        shutdown.cancel();
        task.await.unwrap();

        tokio::time::sleep(INTERVAL * 5).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_controller_ends_the_ticker() {
        let count = Arc::new(AtomicU64::new(0));
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let task = Heartbeat::new(INTERVAL, count.clone())
            .spawn(move || flag.load(Ordering::SeqCst), CancellationToken::new());

        tokio::time::sleep(INTERVAL + Duration::from_millis(100)).await;
        active.store(false, Ordering::SeqCst);
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
