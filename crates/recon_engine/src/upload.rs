use std::sync::Arc;

use recon_core::{JobId, UploadJobPatch, UploadResult, UploadStatus};
use recon_logging::{recon_debug, recon_info, recon_warn};
use tokio_util::sync::CancellationToken;

use crate::board::JobBoard;
use crate::client::JobApi;
use crate::poll::{PollPolicy, PollTick, Poller};
use crate::types::{RemoteStatus, UploadJobStatus};

pub const PROCESSING_FAILED_MESSAGE: &str = "Processing failed";
pub const NO_JOB_ID_MESSAGE: &str = "Upload accepted but no job id returned";
pub const NO_PAYLOAD_MESSAGE: &str = "No file payload available for upload";

/// How one job's upload cycle ended, from the orchestrator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed,
    Failed,
    /// The poll bound ran out; the job stays `processing`.
    StillProcessing,
    /// The job was removed (or re-submitted) while polling.
    Discarded,
    Cancelled,
}

/// Drives upload jobs from `pending` to a terminal state, one at a time.
pub struct UploadOrchestrator {
    api: Arc<dyn JobApi>,
    board: JobBoard,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
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

    /// Upload and poll each job in order. A job's whole cycle, retries
    /// included, finishes before the next one starts.
    pub async fn run(&self, job_ids: &[JobId]) -> Vec<(JobId, UploadOutcome)> {
        let mut outcomes = Vec::with_capacity(job_ids.len());
        for &job_id in job_ids {
            if self.cancel.is_cancelled() {
                break;
            }
            let outcome = self.upload_one(job_id).await;
            recon_info!("Upload job {} finished: {:?}", job_id, outcome);
            outcomes.push((job_id, outcome));
        }
        outcomes
    }

    /// Re-enter the poll loop for restored `processing` jobs.
    pub async fn resume(&self, job_ids: &[JobId]) -> Vec<(JobId, UploadOutcome)> {
        let mut outcomes = Vec::with_capacity(job_ids.len());
        for &job_id in job_ids {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(job) = self.board.get(job_id) else {
                continue;
            };
            let Some(server_job_id) = job.server_job_id.filter(|_| job.status == UploadStatus::Processing)
            else {
                recon_debug!("Upload job {} is not resumable", job_id);
                continue;
            };
            recon_info!("Resuming upload job {} (server job {})", job_id, server_job_id);
            let outcome = self.poll_job(job_id, &server_job_id).await;
            outcomes.push((job_id, outcome));
        }
        outcomes
    }

    async fn upload_one(&self, job_id: JobId) -> UploadOutcome {
        let Some(job) = self.board.get(job_id) else {
            recon_warn!("Upload job {} no longer exists", job_id);
            return UploadOutcome::Discarded;
        };
        let Some(payload) = self.board.payload(job_id) else {
            return self.settle(job_id, UploadJobPatch::failed(NO_PAYLOAD_MESSAGE), UploadOutcome::Failed);
        };

        if !self
            .board
            .upsert_existing(job_id, UploadJobPatch::status(UploadStatus::Uploading, 0))
        {
            return UploadOutcome::Discarded;
        }

        let accepted = match self
            .api
            .submit_upload(&job.name, &job.mime_type, payload)
            .await
        {
            Ok(accepted) => accepted,
            Err(err) => {
                recon_warn!("Upload of {} rejected: {}", job.name, err);
                return self.settle(job_id, UploadJobPatch::failed(err.message), UploadOutcome::Failed);
            }
        };

        let Some(server_job_id) = accepted.job_id else {
            return self.settle(job_id, UploadJobPatch::failed(NO_JOB_ID_MESSAGE), UploadOutcome::Failed);
        };

        let processing = UploadJobPatch {
            server_job_id: Some(server_job_id.clone()),
            ..UploadJobPatch::status(UploadStatus::Processing, 50)
        };
        if !self.board.upsert_existing(job_id, processing) {
            return UploadOutcome::Discarded;
        }
        self.poll_job(job_id, &server_job_id).await
    }

    // Write a terminal patch unless the job was deleted in the meantime.
    fn settle(&self, job_id: JobId, patch: UploadJobPatch, outcome: UploadOutcome) -> UploadOutcome {
        if self.board.upsert_existing(job_id, patch) {
            outcome
        } else {
            UploadOutcome::Discarded
        }
    }

    async fn poll_job(&self, job_id: JobId, server_job_id: &str) -> UploadOutcome {
        let mut poller = Poller::new(self.policy, self.cancel.clone());
        loop {
            match poller.next().await {
                PollTick::Attempt(attempt) => {
                    let status = match self.api.upload_status(server_job_id).await {
                        Ok(status) => status,
                        Err(err) if err.is_transport() => {
                            let patch = UploadJobPatch::failed(err.message);
                            return self.finish(job_id, server_job_id, patch, UploadOutcome::Failed);
                        }
                        Err(err) => {
                            recon_debug!(
                                "Upload job {} poll {} skipped: {}",
                                job_id,
                                attempt,
                                err
                            );
                            continue;
                        }
                    };

                    match interpret_status(&status) {
                        Some((patch, outcome)) => {
                            return self.finish(job_id, server_job_id, patch, outcome);
                        }
                        None => {
                            if !self.board.is_current_upload(job_id, server_job_id) {
                                return UploadOutcome::Discarded;
                            }
                        }
                    }
                }
                PollTick::Exhausted(attempts) => {
                    recon_warn!(
                        "Upload job {} still processing after {} polls; leaving it as is",
                        job_id,
                        attempts
                    );
                    return UploadOutcome::StillProcessing;
                }
                PollTick::Cancelled => return UploadOutcome::Cancelled,
            }
        }
    }

    fn finish(
        &self,
        job_id: JobId,
        server_job_id: &str,
        patch: UploadJobPatch,
        outcome: UploadOutcome,
    ) -> UploadOutcome {
        if self.board.upsert_if_current(job_id, server_job_id, patch) {
            outcome
        } else {
            recon_debug!("Dropping late response for upload job {}", job_id);
            UploadOutcome::Discarded
        }
    }
}

/// Map a server status to the terminal patch it implies, or `None` to keep polling.
pub(crate) fn interpret_status(status: &UploadJobStatus) -> Option<(UploadJobPatch, UploadOutcome)> {
    match status.status {
        RemoteStatus::Completed if status.result.as_ref().is_some_and(|r| r.success) => {
            let result = status.result.clone().unwrap_or_default();
            Some((
                UploadJobPatch::completed(UploadResult {
                    records_processed: result.processed_records.unwrap_or(0),
                    matches_found: result.matches_found.unwrap_or(0),
                    exceptions_found: result.exceptions_found.unwrap_or(0),
                }),
                UploadOutcome::Completed,
            ))
        }
        RemoteStatus::Completed | RemoteStatus::Failed => {
            let message = status
                .result
                .as_ref()
                .and_then(|result| result.error.clone().or_else(|| result.message.clone()))
                .or_else(|| status.message.clone())
                .or_else(|| status.error.clone())
                .unwrap_or_else(|| PROCESSING_FAILED_MESSAGE.to_string());
            Some((UploadJobPatch::failed(message), UploadOutcome::Failed))
        }
        RemoteStatus::Other => None,
    }
}
