use crate::JobId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run the upload orchestrator over these jobs, in order.
    UploadFiles { job_ids: Vec<JobId> },
    /// Start a reconciliation run for the tagged pair.
    StartReconcile { job_a: JobId, job_b: JobId },
}
