use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: FailureKind,
    pub message: String,
}

impl ClientError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The request never reached the server or never got an answer back.
    /// A non-success status or an unreadable body still counts as an answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            FailureKind::InvalidUrl | FailureKind::Timeout | FailureKind::Network
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Decode,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Decode => write!(f, "invalid response body"),
        }
    }
}

/// Status value reported by the job API. Anything that is not terminal,
/// including a missing status, is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadAccepted {
    #[serde(default, deserialize_with = "optional_id")]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadJobStatus {
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default)]
    pub result: Option<UploadJobResult>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UploadJobResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_count")]
    pub processed_records: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub matches_found: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub exceptions_found: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconcileStarted {
    #[serde(default, deserialize_with = "optional_id")]
    pub reconcile_job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconcileJobStatus {
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowStarted {
    #[serde(default, deserialize_with = "optional_id")]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct WorkflowStatusEnvelope {
    pub workflow: WorkflowStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowStatus {
    #[serde(default)]
    pub status: RemoteStatus,
    #[serde(default)]
    pub steps: Option<Vec<RemoteStep>>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub result_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteStep {
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

// Servers hand out ids both as strings and as integers.
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

// Counts arrive as integers or floats; anything else reads as absent.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(number)) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|count| count.is_finite() && *count >= 0.0)
                .map(|count| count as u64)
        }),
        _ => None,
    })
}
