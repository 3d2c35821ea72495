use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-side identity of an upload job, unique for the session.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Pending,
    Uploading,
    Processing,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Error)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Which side of the reconciliation pair a file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    SourceA,
    SourceB,
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRole::SourceA => f.write_str("source_a"),
            SourceRole::SourceB => f.write_str("source_b"),
        }
    }
}

/// Counts reported by the server once a file has been ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadResult {
    pub records_processed: u64,
    pub matches_found: u64,
    pub exceptions_found: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: JobId,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub status: UploadStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<SourceRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<UploadResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl UploadJob {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            name: String::new(),
            size_bytes: 0,
            mime_type: String::new(),
            status: UploadStatus::Pending,
            progress: 0,
            server_job_id: None,
            role: None,
            result: None,
            error_message: None,
        }
    }

    /// Merge `patch` into this record, keeping every field the patch leaves unset.
    ///
    /// Afterwards `result` only survives on `completed` records and
    /// `error_message` only on `error` records. Progress never moves backwards
    /// unless the record ends up in `error`.
    pub fn apply(&mut self, patch: UploadJobPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(size_bytes) = patch.size_bytes {
            self.size_bytes = size_bytes;
        }
        if let Some(mime_type) = patch.mime_type {
            self.mime_type = mime_type;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            if progress >= self.progress || self.status == UploadStatus::Error {
                self.progress = progress;
            }
        }
        if let Some(server_job_id) = patch.server_job_id {
            self.server_job_id = Some(server_job_id);
        }
        if let Some(role) = patch.role {
            self.role = Some(role);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }

        if self.status != UploadStatus::Completed {
            self.result = None;
        }
        if self.status != UploadStatus::Error {
            self.error_message = None;
        }
    }
}

/// Partial update for an [`UploadJob`]; `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadJobPatch {
    pub name: Option<String>,
    pub size_bytes: Option<u64>,
    pub mime_type: Option<String>,
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub server_job_id: Option<String>,
    pub role: Option<SourceRole>,
    pub result: Option<UploadResult>,
    pub error_message: Option<String>,
}

impl UploadJobPatch {
    pub fn status(status: UploadStatus, progress: u8) -> Self {
        Self {
            status: Some(status),
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Error),
            progress: Some(100),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn completed(result: UploadResult) -> Self {
        Self {
            status: Some(UploadStatus::Completed),
            progress: Some(100),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn role(role: SourceRole) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    #[default]
    Processing,
    Completed,
    Failed,
}

impl ReconcileStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReconcileStatus::Processing)
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileStatus::Processing => f.write_str("processing"),
            ReconcileStatus::Completed => f.write_str("completed"),
            ReconcileStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Outcome counts of a reconciliation run, plus the literal records when the server sends them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub total_matches: u64,
    pub total_breaks: u64,
    pub total_resolutions: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileJob {
    pub id: String,
    pub status: ReconcileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReconcileSummary>,
}

impl ReconcileJob {
    pub fn processing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ReconcileStatus::Processing,
            summary: None,
        }
    }
}

/// Metadata captured when the operator selects a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub role: Option<SourceRole>,
}
