//! Cancellable periodic task behind adapter auto-refresh.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Cancellable background task running a sweep on a fixed interval.
pub struct RefreshTask {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl RefreshTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|r| !r.handle.is_finished()))
            .unwrap_or(false)
    }

    /// Spawn the task. Returns `false` without spawning if one is running.
    pub fn start<F, Fut>(&self, interval: Duration, sweep: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut running) = self.running.lock() else {
            tracing::error!(task = self.name, "Refresh task state poisoned");
            return false;
        };
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::warn!(task = self.name, "Auto-refresh already running");
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let name = self.name;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!(task = name, "Auto-refresh stopped");
        });
        *running = Some(Running { handle, shutdown });
        tracing::info!(task = self.name, interval_ms = interval.as_millis() as u64, "Auto-refresh started");
        true
    }

    /// Signal the task to stop and wait for it.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                tracing::warn!(task = self.name, error = %e, "Auto-refresh task ended abnormally");
            }
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.running.lock() {
            if let Some(running) = guard.take() {
                running.handle.abort();
            }
        }
    }
}
