use std::sync::Arc;

use recon_core::{JobId, ReconcileJob, ReconcileStatus, ReconcileSummary};
use recon_logging::{recon_debug, recon_info, recon_warn};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::board::JobBoard;
use crate::client::JobApi;
use crate::poll::{PollPolicy, PollTick, Poller};
use crate::types::RemoteStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("upload job {0} has no server job id yet")]
    MissingServerJobId(JobId),
    #[error("reconciliation rejected: {0}")]
    Rejected(String),
    #[error("reconciliation accepted but no run id returned")]
    NoRunId,
    #[error("reconciliation request failed: {0}")]
    Transport(String),
}

/// Starts reconciliation runs for a tagged pair and follows them to the end.
pub struct ReconcileOrchestrator {
    api: Arc<dyn JobApi>,
    board: JobBoard,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl ReconcileOrchestrator {
    pub fn new(api: Arc<dyn JobApi>, board: JobBoard, policy: PollPolicy) -> Self {
        Self {
            api,
            board,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit the pair and track the returned run as `processing`.
    ///
    /// Nothing is sent, and the tracked run is left alone, when either job
    /// lacks a server job id. A new run replaces tracking of the previous
    /// one; the previous run keeps going server-side.
    pub async fn start(&self, job_a: JobId, job_b: JobId) -> Result<String, ReconcileError> {
        let server_a = self.server_job_id(job_a)?;
        let server_b = self.server_job_id(job_b)?;

        let started = self
            .api
            .start_reconcile(&server_a, &server_b)
            .await
            .map_err(|err| {
                if err.is_transport() {
                    ReconcileError::Transport(err.message)
                } else {
                    ReconcileError::Rejected(err.message)
                }
            })?;
        let run_id = started.reconcile_job_id.ok_or(ReconcileError::NoRunId)?;

        recon_info!(
            "Reconciliation run {} started for {} / {}",
            run_id,
            server_a,
            server_b
        );
        self.board.track_reconcile(ReconcileJob::processing(run_id.clone()));
        Ok(run_id)
    }

    /// Start a run and wait for it.
    pub async fn run(&self, job_a: JobId, job_b: JobId) -> Result<Option<ReconcileJob>, ReconcileError> {
        let run_id = self.start(job_a, job_b).await?;
        Ok(self.wait(&run_id).await)
    }

    /// Resume polling a run restored from the previous session.
    pub async fn resume(&self) -> Option<ReconcileJob> {
        let tracked = self.board.reconcile()?;
        if tracked.status.is_terminal() {
            return Some(tracked);
        }
        recon_info!("Resuming reconciliation run {}", tracked.id);
        self.wait(&tracked.id).await
    }

    /// Poll `run_id` until it is terminal. Returns `None` when polling stops
    /// first (cancelled, bound reached, or the run is no longer tracked).
    pub async fn wait(&self, run_id: &str) -> Option<ReconcileJob> {
        let mut poller = Poller::new(self.policy, self.cancel.clone());
        loop {
            match poller.next().await {
                PollTick::Attempt(attempt) => {
                    let status = match self.api.reconcile_status(run_id).await {
                        Ok(status) => status,
                        Err(err) => {
                            recon_debug!("Reconcile poll {} for {} skipped: {}", attempt, run_id, err);
                            continue;
                        }
                    };

                    let terminal = match status.status {
                        RemoteStatus::Completed => ReconcileStatus::Completed,
                        RemoteStatus::Failed => ReconcileStatus::Failed,
                        RemoteStatus::Other => {
                            if !self.board.is_tracking_reconcile(run_id) {
                                recon_debug!("Reconciliation run {} no longer tracked", run_id);
                                return None;
                            }
                            continue;
                        }
                    };

                    let summary = status.result.as_ref().map(summary_from_result);
                    if !self.board.patch_reconcile(run_id, terminal, summary) {
                        recon_debug!("Dropping late result for reconciliation run {}", run_id);
                        return None;
                    }
                    recon_info!("Reconciliation run {} {}", run_id, terminal);
                    return self.board.reconcile();
                }
                PollTick::Exhausted(attempts) => {
                    recon_warn!(
                        "Reconciliation run {} not finished after {} polls",
                        run_id,
                        attempts
                    );
                    return None;
                }
                PollTick::Cancelled => return None,
            }
        }
    }

    fn server_job_id(&self, job_id: JobId) -> Result<String, ReconcileError> {
        self.board
            .get(job_id)
            .and_then(|job| job.server_job_id)
            .ok_or(ReconcileError::MissingServerJobId(job_id))
    }
}

fn count(result: &Value, pointer: &str) -> u64 {
    let Some(value) = result.pointer(pointer) else {
        return 0;
    };
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|n| n.is_finite() && *n >= 0.0).map(|n| n as u64))
        .unwrap_or(0)
}

fn records(result: &Value, pointer: &str) -> Vec<Value> {
    result
        .pointer(pointer)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Pull the counts (and literal records, when present) out of a run result.
pub(crate) fn summary_from_result(result: &Value) -> ReconcileSummary {
    ReconcileSummary {
        total_matches: count(result, "/matching/summary/total_matches"),
        total_breaks: count(result, "/exceptions/summary/total_breaks"),
        total_resolutions: count(result, "/resolutions/summary/total_resolutions"),
        matches: records(result, "/matching/matches"),
        exceptions: records(result, "/exceptions/exceptions"),
    }
}
