use crate::{JobId, SelectedFile, SourceRole, UploadJob};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Operator selected files for upload; one pending job is created per file.
    FilesSelected(Vec<SelectedFile>),
    /// Operator tagged a job as one side of the reconciliation pair.
    RoleAssigned { job_id: JobId, role: SourceRole },
    /// Operator deleted a job.
    JobRemoved { job_id: JobId },
    /// Operator asked to reconcile the completed pair.
    ReconcileRequested,
    /// Operator cleared the whole session.
    SessionReset,
    /// Restore records persisted by a previous session.
    Restore {
        uploads: Vec<UploadJob>,
        reconcile_job_id: Option<String>,
    },
}
