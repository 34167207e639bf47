//! Periodic status refresh trigger.
//!
//! The poller does no work of its own: on every tick it checks whether its
//! consumer is active and, if so, awaits the refresh callback. Because the
//! callback is awaited in the poller task and missed ticks are skipped, a slow
//! refresh never overlaps the next one.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Default interval between refreshes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Handle to a running poller task. The task ends when the handle is dropped.
#[derive(Debug)]
pub struct StatusPoller {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl StatusPoller {
    /// Spawns a poller that calls `refresh` every `interval` while active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(interval: Duration, active: bool, mut refresh: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let flag = Arc::new(AtomicBool::new(active));
        let gate = Arc::clone(&flag);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !gate.load(Ordering::SeqCst) {
                    continue;
                }
                refresh().await;
            }
        });
        debug!(interval_ms = interval.as_millis() as u64, "status poller started");
        Self { active: flag, task }
    }

    /// Marks the consumer as visible (refreshes run) or hidden (ticks are skipped).
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Ends the poller task.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}
