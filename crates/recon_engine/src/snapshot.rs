use std::sync::Arc;

use recon_core::{JobId, SourceRole, UploadJob, UploadResult, UploadStatus};
use recon_logging::{recon_info, recon_warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persist::{KeyValueStore, PersistError};

pub const UPLOAD_JOBS_KEY: &str = "reconcile-console.upload-jobs";
pub const RECONCILE_JOB_KEY: &str = "reconcile-console.reconcile-job";

/// Current snapshot layout. Bump together with a new arm in the migrations below.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct UploadJobsSnapshot {
    version: u32,
    jobs: Vec<UploadJob>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReconcilePointerSnapshot {
    version: u32,
    #[serde(default)]
    reconcile_job_id: Option<String>,
}

/// Persistence adapter: durable snapshot/restore of the job store.
///
/// `load*` never fails. Missing, unreadable or unparseable snapshots read as
/// "no prior state".
#[derive(Clone)]
pub struct SnapshotStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Overwrite the upload snapshot with `jobs`.
    pub fn save(&self, jobs: &[UploadJob]) -> Result<(), PersistError> {
        let snapshot = UploadJobsSnapshot {
            version: SNAPSHOT_VERSION,
            jobs: jobs.to_vec(),
        };
        self.kv.set(UPLOAD_JOBS_KEY, &serde_json::to_string(&snapshot)?)
    }

    pub fn load(&self) -> Vec<UploadJob> {
        let Some(value) = self.read(UPLOAD_JOBS_KEY) else {
            return Vec::new();
        };
        match migrate_upload_jobs(value) {
            Ok(jobs) => {
                recon_info!("Restored {} upload job(s) from snapshot", jobs.len());
                jobs
            }
            Err(reason) => {
                recon_warn!("Ignoring upload snapshot: {}", reason);
                Vec::new()
            }
        }
    }

    pub fn save_reconcile_pointer(&self, reconcile_job_id: Option<&str>) -> Result<(), PersistError> {
        let snapshot = ReconcilePointerSnapshot {
            version: SNAPSHOT_VERSION,
            reconcile_job_id: reconcile_job_id.map(str::to_string),
        };
        self.kv
            .set(RECONCILE_JOB_KEY, &serde_json::to_string(&snapshot)?)
    }

    pub fn load_reconcile_pointer(&self) -> Option<String> {
        let value = self.read(RECONCILE_JOB_KEY)?;
        match migrate_reconcile_pointer(value) {
            Ok(pointer) => pointer,
            Err(reason) => {
                recon_warn!("Ignoring reconcile snapshot: {}", reason);
                None
            }
        }
    }

    fn read(&self, key: &str) -> Option<Value> {
        let text = match self.kv.get(key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(err) => {
                recon_warn!("Failed to read snapshot {}: {}", key, err);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(err) => {
                recon_warn!("Failed to parse snapshot {}: {}", key, err);
                None
            }
        }
    }
}

fn snapshot_version(value: &Value) -> Option<u64> {
    value.get("version").and_then(Value::as_u64)
}

fn migrate_upload_jobs(value: Value) -> Result<Vec<UploadJob>, String> {
    match value {
        // Version 0: a bare array of camelCase records with string ids.
        Value::Array(items) => {
            let legacy: Vec<LegacyUploadJob> =
                serde_json::from_value(Value::Array(items)).map_err(|err| err.to_string())?;
            Ok(legacy
                .into_iter()
                .enumerate()
                .map(|(index, job)| job.into_upload_job(index as JobId + 1))
                .collect())
        }
        value => match snapshot_version(&value) {
            Some(1) => serde_json::from_value::<UploadJobsSnapshot>(value)
                .map(|snapshot| snapshot.jobs)
                .map_err(|err| err.to_string()),
            Some(version) => Err(format!("unsupported snapshot version {version}")),
            None => Err("snapshot has no version".to_string()),
        },
    }
}

fn migrate_reconcile_pointer(value: Value) -> Result<Option<String>, String> {
    match snapshot_version(&value) {
        Some(1) => serde_json::from_value::<ReconcilePointerSnapshot>(value)
            .map(|snapshot| snapshot.reconcile_job_id)
            .map_err(|err| err.to_string()),
        Some(version) => Err(format!("unsupported snapshot version {version}")),
        // Version 0: `{ "reconcileJobId": ... }`.
        None => match value.get("reconcileJobId") {
            Some(Value::String(id)) if !id.is_empty() => Ok(Some(id.clone())),
            Some(Value::Number(id)) => Ok(Some(id.to_string())),
            Some(Value::Null) | None => Ok(None),
            Some(other) => Err(format!("unexpected reconcile job id {other}")),
        },
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUploadJob {
    name: String,
    #[serde(default)]
    size_bytes: u64,
    #[serde(default)]
    mime_type: String,
    status: UploadStatus,
    #[serde(default)]
    progress: u8,
    #[serde(default)]
    server_job_id: Option<String>,
    #[serde(default)]
    role: Option<SourceRole>,
    #[serde(default)]
    result: Option<LegacyUploadResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyUploadResult {
    #[serde(default, alias = "processed_records")]
    records_processed: u64,
    #[serde(default)]
    matches_found: u64,
    #[serde(default)]
    exceptions_found: u64,
}

impl LegacyUploadJob {
    fn into_upload_job(self, id: JobId) -> UploadJob {
        UploadJob {
            id,
            name: self.name,
            size_bytes: self.size_bytes,
            mime_type: self.mime_type,
            status: self.status,
            progress: self.progress.min(100),
            server_job_id: self.server_job_id,
            role: self.role,
            result: self.result.map(|result| UploadResult {
                records_processed: result.records_processed,
                matches_found: result.matches_found,
                exceptions_found: result.exceptions_found,
            }),
            error_message: self.error_message,
        }
    }
}
