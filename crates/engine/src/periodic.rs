use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A fixed-period background callback.
///
/// The callback runs inside the task's own loop, so a slow tick can never
/// overlap the next one: firings that come due while it is busy are skipped,
/// not queued. Stopping takes effect before the next firing; a tick already in
/// progress is allowed to finish.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    stop: watch::Sender<bool>,
    busy: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// First firing is one `period` after spawning.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, mut stop_rx) = watch::channel(false);
        let busy = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicU64::new(0));
        let (busy_flag, run_count) = (busy.clone(), runs.clone());

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        busy_flag.store(true, Ordering::Release);
                        tick().await;
                        busy_flag.store(false, Ordering::Release);
                        run_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            debug!(target: "sweeper::periodic", task = name, "stopped");
        });

        Self {
            name,
            stop,
            busy,
            runs,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
