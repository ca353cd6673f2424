//! Fire-and-forget entry point shared by the HTTP handlers.
//!
//! `CopyService` is the router state. `start_copy` hands a run to a tracked
//! background task and returns at once; the run's outcome is only observable
//! through the log.

use super::copy_orchestrator::CopyOrchestrator;
use crate::models::copy::{CopyOptions, CopyRunResult};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Receipt for an accepted copy request.
#[derive(Clone, Debug)]
pub struct CopyTicket {
    pub run_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CopyService {
    orchestrator: Arc<CopyOrchestrator>,
    shutdown: CancellationToken,
    runs: TaskTracker,
}

impl CopyService {
    pub fn new(orchestrator: CopyOrchestrator, shutdown: CancellationToken) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            shutdown,
            runs: TaskTracker::new(),
        }
    }

    /// Start a copy run in the background.
    ///
    /// The run is detached from the caller: it keeps going after the HTTP
    /// response is sent and is only cut short by process shutdown or its own
    /// deadline.
    pub fn start_copy(
        &self,
        source_path: String,
        destination_path: String,
        options: CopyOptions,
    ) -> CopyTicket {
        let ticket = CopyTicket {
            run_id: Uuid::new_v4(),
            accepted_at: Utc::now(),
        };
        let run_id = ticket.run_id;
        let orchestrator = self.orchestrator.clone();
        let cancel = self.shutdown.child_token();

        let run = tokio::spawn(async move {
            info!(
                %run_id,
                "starting background processing for copying from {source_path} to {destination_path}"
            );
            let result = orchestrator
                .run(&source_path, &destination_path, options, cancel)
                .await;
            report(run_id, &result);
            result
        });

        // Supervise the run so a panic inside it is logged instead of lost.
        self.runs.spawn(async move {
            if let Err(err) = run.await {
                error!(%run_id, error = %err, "background copy run panicked");
            }
        });

        ticket
    }

    /// Number of runs still in flight.
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    /// Wait for every run started so far to finish on its own.
    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        self.runs.close();
        self.runs.wait().await;
    }

    /// Cancel every run and wait up to `grace` for them to wind down.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        self.runs.close();
        if tokio::time::timeout(grace, self.runs.wait()).await.is_err() {
            warn!(
                remaining = self.runs.len(),
                "copy runs still active after shutdown grace period"
            );
        }
    }
}

fn report(run_id: Uuid, result: &CopyRunResult) {
    let summary = serde_json::to_string(result).unwrap_or_default();
    if result.success {
        info!(
            %run_id,
            summary = %summary,
            "copy operation completed successfully, copied {} of {} objects",
            result.success_count,
            result.total_count
        );
        if result.failure_count > 0 {
            error!(
                %run_id,
                "failed to copy {} objects, check error log for details",
                result.failure_count
            );
        }
    } else {
        error!(
            %run_id,
            summary = %summary,
            "copy operation failed: {}",
            result.message
        );
    }
}
