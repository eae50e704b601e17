//! Background Task Abstraction
//!
//! A named periodic loop with an explicit cancellation handle, used for the
//! expiry sweep. Cancellation between ticks leaves whatever the tick mutates
//! fully consistent; an interrupted pass simply reruns in full on the next
//! tick. Tests drive the underlying operations directly instead of waiting
//! on timers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a spawned periodic background task
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a loop running `tick` every `period`. The first tick fires
    /// immediately. Requires a Tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        debug!(task = name, "periodic task cancelled");
                        break;
                    }
                    _ = interval.tick() => tick().await,
                }
            }
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Task name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request cancellation without waiting for the loop to exit
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the loop to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

// =============================================================================
// Tests
// =============================================================================
