//! Background task plumbing for timer-driven maintenance
//!
//! File auto-flush, vector auto-save, TTL sweeps, and auto-migration all
//! run as periodic tasks that must stop cleanly during `close()` so no
//! write lands after resource teardown.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// A spawned interval loop with a graceful shutdown signal
///
/// The tick callback runs to completion before shutdown is observed, so
/// stopping the task never interrupts an in-flight write.
pub struct PeriodicTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a loop invoking `tick` every `period`
    pub fn spawn<F, Fut>(label: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut signal) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; consume it so the
            // first real run happens one period from now.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = signal.changed() => break,
                }
            }
            debug!(task = label, "periodic task stopped");
        });
        Self { shutdown, handle }
    }

    /// Signal shutdown and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_task_ticks_and_stops() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task_counter = counter.clone();
        let task = PeriodicTask::spawn("test", Duration::from_millis(10), move || {
            let counter = task_counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        task.stop().await;
        let ticks = counter.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected at least 2 ticks, saw {ticks}");

        // No further ticks after stop
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), ticks);
    }
}
