use crate::{JobId, ReconcileStatus, ReconcileSummary, SourceRole, UploadResult, UploadStatus};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConsoleViewModel {
    pub jobs: Vec<UploadRowView>,
    pub reconcile: Option<ReconcileRowView>,
    /// A completed `source_a` and `source_b` job both exist.
    pub reconcile_ready: bool,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRowView {
    pub job_id: JobId,
    pub name: String,
    pub size_bytes: u64,
    pub status: UploadStatus,
    pub progress: u8,
    pub role: Option<SourceRole>,
    pub server_job_id: Option<String>,
    pub result: Option<UploadResult>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileRowView {
    pub id: String,
    pub status: ReconcileStatus,
    /// `false` for a run restored from a snapshot and not polled since.
    pub status_known: bool,
    pub summary: Option<ReconcileSummary>,
}
