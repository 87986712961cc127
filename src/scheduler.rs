//! Cancellable repeating background tasks.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest period a deadline can be computed for on every platform.
const MAX_PERIOD: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Handle to a job that runs every `period`, first firing one period after spawn.
///
/// Stopping (or dropping) the handle prevents future runs. A run that is
/// already in progress is never interrupted.
pub struct RepeatingTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Spawn `job` on the current Tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        // Tokio intervals reject a zero period and panic past the clock's range
        let period = period.clamp(MIN_PERIOD, MAX_PERIOD);
        let (shutdown, mut stop) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    // Also resolves with an error once the handle is dropped
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                }

                debug!(task = %task_name, "Running scheduled task");
                job().await;
            }

            debug!(task = %task_name, "Scheduled task stopped");
        });

        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel future runs and wait for any in-flight run to complete.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
