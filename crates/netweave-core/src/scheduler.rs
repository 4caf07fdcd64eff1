// ── Periodic task scheduling ──
//
// Each component runs its cycles as tokio tasks bound to one cancellation
// token. Stopping cancels the token and joins every task, so no cycle is
// still executing once `shutdown` returns.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;

/// A set of periodic tasks sharing one lifetime.
///
/// Not restartable: build a new `Scheduler` for every start.
#[derive(Debug, Default)]
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period`. The first run happens one full period
    /// after spawning. A failing run is logged and the loop carries on.
    ///
    /// A zero period disables the task.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        if period.is_zero() {
            debug!(task = name, "zero period, not scheduled");
            return;
        }
        let cancel = self.cancel.clone();
        self.handles
            .push(tokio::spawn(periodic_task(name, period, cancel, job)));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait for each to finish its current run.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn periodic_task<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    job: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                debug!(task = name, "tick");
                if let Err(e) = job().await {
                    warn!(task = name, error = %e, "periodic run failed");
                }
            }
        }
    }

    debug!(task = name, "stopped");
}
