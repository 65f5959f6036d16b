use super::engine::{CancellationHandle, EnforcementLoop, IterationOutcome, LoopStats, cancelled};
use crate::core::{EnforceError, Result};
use crate::scoring::EntityTracker;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// Background task running the enforcement loop until stopped.
pub struct EnforcementWorker {
    cancel: CancellationHandle,
    grids: Arc<EntityTracker>,
    players: Arc<EntityTracker>,
    join_handle: Option<JoinHandle<LoopStats>>,
}

impl EnforcementWorker {
    pub fn grids(&self) -> Arc<EntityTracker> {
        self.grids.clone()
    }

    pub fn players(&self) -> Arc<EntityTracker> {
        self.players.clone()
    }

    pub fn cancellation(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Signals the loop to stop, waits for its cleanup and returns its stats.
    pub async fn stop(mut self) -> Result<LoopStats> {
        self.cancel.cancel();
        match self.join_handle.take() {
            Some(join_handle) => join_handle.await.map_err(|err| {
                EnforceError::ExecutionError(format!("enforcement worker join: {}", err))
            }),
            None => Ok(LoopStats::default()),
        }
    }
}

impl Drop for EnforcementWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the loop on the runtime. Iterations run back to back, separated by the
/// configured pause; a disabled loop idles one profile window at a time.
pub fn spawn_enforcement_worker(mut engine: EnforcementLoop) -> EnforcementWorker {
    let cancel = engine.cancellation();
    let grids = engine.grids();
    let players = engine.players();
    let config = engine.config_source();
    let stop = cancel.clone();

    let join_handle = tokio::spawn(async move {
        let mut stop_rx = stop.subscribe();
        loop {
            let pause = match engine.run_iteration().await {
                Ok(IterationOutcome::Cancelled) => break,
                Ok(IterationOutcome::Completed(report)) => {
                    event!(
                        Level::TRACE,
                        deleted = report.deleted.len(),
                        markers = report.markers.len(),
                        "iteration report"
                    );
                    config.snapshot().iteration_pause_duration()
                }
                Ok(IterationOutcome::Idle) => config.snapshot().profile_window_duration(),
                Err(err) => {
                    engine.record_error(&err);
                    config.snapshot().profile_window_duration()
                }
            };

            tokio::select! {
                _ = cancelled(&mut stop_rx) => break,
                _ = sleep(pause) => {}
            }
        }

        engine.cleanup().await;
        event!(Level::INFO, iterations = engine.stats().iterations, "enforcement loop stopped");
        engine.stats().clone()
    });

    EnforcementWorker {
        cancel,
        grids,
        players,
        join_handle: Some(join_handle),
    }
}
