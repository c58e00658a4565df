//! Periodic background persistence.
//!
//! One task per registry. It sleeps for the configured interval, runs
//! `save_all`, and sleeps again, so a slow save pushes the next one back
//! instead of stacking up:
//!
//! ```text
//!   spawn ──sleep(interval)──→ save_all ──sleep(interval)──→ save_all ...
//!                 │
//!            stop signal / registry dropped ──→ exit
//! ```
//!
//! The task only holds a `Weak` reference to the registry. Dropping the
//! [`Autosave`] handle drops the stop sender, which also ends the loop.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use waypost_engine::EngineFactory;

use crate::Registry;

/// Handle to a running autosave task.
pub(crate) struct Autosave {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Autosave {
    /// Starts saving `registry` every `interval`.
    pub(crate) fn spawn<F: EngineFactory>(registry: Weak<Registry<F>>, interval: Duration) -> Self {
        let (stop, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs_f64(), "autosave started");
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(registry) = registry.upgrade() else {
                    break;
                };
                match registry.save_all().await {
                    Ok(()) => debug!("autosave completed"),
                    Err(e) => warn!(error = %e, "autosave failed"),
                }
            }
            debug!("autosave stopped");
        });

        Self { stop, task }
    }

    /// Signals the task and waits for it to finish. A save already in
    /// progress runs to completion first.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}
