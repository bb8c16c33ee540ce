//! Periodic background sweep.
//!
//! Each store owns at most one [`Sweeper`]. The sweeper task ticks every
//! `clean_interval`, first tick one interval after start, and stops when
//! the owning store drops it or when the tick reports the store is gone.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Handle to a running sweep task. Dropping it stops the task.
#[derive(Debug)]
pub(crate) struct Sweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Start a sweep task on the current tokio runtime.
    ///
    /// `tick` runs once per period and returns `false` when the store it
    /// sweeps no longer exists. Returns `None` when `period` is zero or no
    /// runtime is available.
    pub(crate) fn spawn<F, Fut>(store: &'static str, period: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if period.is_zero() {
            tracing::debug!(store, "Background sweep disabled by zero clean interval");
            return None;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(store, "No tokio runtime in context; background sweep not started");
                return None;
            }
        };

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                store,
                clean_interval_secs = period.as_secs_f64(),
                "Cache sweeper started"
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = ticker.tick() => {
                        if !tick().await {
                            break;
                        }
                    }
                }
            }

            tracing::info!(store, "Cache sweeper stopped");
        });

        Some(Self { shutdown, task })
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
