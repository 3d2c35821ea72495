use crate::job::{
    JobId, ReconcileJob, ReconcileStatus, ReconcileSummary, SourceRole, UploadJob, UploadJobPatch,
    UploadStatus,
};
use crate::view_model::{ConsoleViewModel, ReconcileRowView, UploadRowView};

/// Message attached to jobs that were mid-upload when the previous session ended.
pub const PAYLOAD_LOST_MESSAGE: &str = "file payload lost on restart; select the file again";

/// The JobRecord store: every upload job in insertion order plus the tracked reconcile run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobStore {
    uploads: Vec<UploadJob>,
    reconcile: Option<ReconcileJob>,
    // The tracked run came from a snapshot and has not been polled since.
    reconcile_restored: bool,
    next_id: JobId,
    dirty: bool,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Rebuild a store from persisted records.
    ///
    /// Jobs that were `pending` or `uploading` lost their payload with the
    /// previous process and cannot resume; they are failed here and the
    /// store is left dirty so the change gets persisted. The id counter
    /// continues above the largest restored id.
    ///
    /// Only the id of the tracked reconcile run survives a restart, so its
    /// status is unknown until the run is polled again.
    pub fn restore(uploads: Vec<UploadJob>, reconcile_job_id: Option<String>) -> Self {
        let mut store = Self::new();
        for mut job in uploads {
            if matches!(job.status, UploadStatus::Pending | UploadStatus::Uploading) {
                job.apply(UploadJobPatch::failed(PAYLOAD_LOST_MESSAGE));
                store.dirty = true;
            }
            store.next_id = store.next_id.max(job.id.saturating_add(1));
            match store.uploads.iter().position(|existing| existing.id == job.id) {
                Some(index) => store.uploads[index] = job,
                None => store.uploads.push(job),
            }
        }
        store.reconcile = reconcile_job_id.map(ReconcileJob::processing);
        store.reconcile_restored = store.reconcile.is_some();
        store
    }

    /// Allocate a fresh client-side job id.
    ///
    /// Once the counter is saturated, the lowest free id is handed out instead.
    pub fn next_id(&mut self) -> JobId {
        let mut id = self.next_id.max(1);
        if self.get(id).is_some() {
            id = (1..JobId::MAX)
                .find(|candidate| self.get(*candidate).is_none())
                .unwrap_or(JobId::MAX);
        }
        self.next_id = id.saturating_add(1);
        id
    }

    /// Merge `patch` into job `id`, creating the job if it does not exist yet.
    pub fn upsert(&mut self, id: JobId, patch: UploadJobPatch) -> &UploadJob {
        let index = match self.uploads.iter().position(|job| job.id == id) {
            Some(index) => index,
            None => {
                self.uploads.push(UploadJob::new(id));
                self.next_id = self.next_id.max(id.saturating_add(1));
                self.uploads.len() - 1
            }
        };
        self.uploads[index].apply(patch);
        self.dirty = true;
        &self.uploads[index]
    }

    /// Delete job `id`. Unknown ids are ignored.
    pub fn remove(&mut self, id: JobId) -> Option<UploadJob> {
        let index = self.uploads.iter().position(|job| job.id == id)?;
        self.dirty = true;
        Some(self.uploads.remove(index))
    }

    pub fn list(&self) -> &[UploadJob] {
        &self.uploads
    }

    pub fn get(&self, id: JobId) -> Option<&UploadJob> {
        self.uploads.iter().find(|job| job.id == id)
    }

    pub fn reconcile(&self) -> Option<&ReconcileJob> {
        self.reconcile.as_ref()
    }

    /// Track a new reconcile run, replacing any previously tracked run.
    pub fn track_reconcile(&mut self, job: ReconcileJob) {
        self.reconcile = Some(job);
        self.reconcile_restored = false;
        self.dirty = true;
    }

    /// Update the tracked reconcile run. Returns `false` (and changes nothing)
    /// when `id` is not the run currently tracked.
    pub fn patch_reconcile(
        &mut self,
        id: &str,
        status: ReconcileStatus,
        summary: Option<ReconcileSummary>,
    ) -> bool {
        match self.reconcile.as_mut() {
            Some(job) if job.id == id => {
                job.status = status;
                if status.is_terminal() {
                    job.summary = summary;
                }
                self.reconcile_restored = false;
                self.dirty = true;
                true
            }
            _ => false,
        }
    }

    pub fn clear_reconcile(&mut self) {
        self.reconcile_restored = false;
        if self.reconcile.take().is_some() {
            self.dirty = true;
        }
    }

    /// Drop every record; the id counter keeps counting.
    pub fn reset(&mut self) {
        if !self.uploads.is_empty() || self.reconcile.is_some() {
            self.dirty = true;
        }
        self.uploads.clear();
        self.reconcile = None;
        self.reconcile_restored = false;
    }

    /// First completed job tagged with `role`, in insertion order.
    pub fn completed_with_role(&self, role: SourceRole) -> Option<&UploadJob> {
        self.uploads
            .iter()
            .find(|job| job.role == Some(role) && job.status == UploadStatus::Completed)
    }

    /// The `(source_a, source_b)` pair eligible for reconciliation, if any.
    pub fn reconcile_pair(&self) -> Option<(JobId, JobId)> {
        let a = self.completed_with_role(SourceRole::SourceA)?;
        let b = self.completed_with_role(SourceRole::SourceB)?;
        Some((a.id, b.id))
    }

    /// Jobs whose server-side ingestion can still be polled.
    pub fn resumable_uploads(&self) -> Vec<JobId> {
        self.uploads
            .iter()
            .filter(|job| job.status == UploadStatus::Processing && job.server_job_id.is_some())
            .map(|job| job.id)
            .collect()
    }

    pub fn view(&self) -> ConsoleViewModel {
        ConsoleViewModel {
            jobs: self
                .uploads
                .iter()
                .map(|job| UploadRowView {
                    job_id: job.id,
                    name: job.name.clone(),
                    size_bytes: job.size_bytes,
                    status: job.status,
                    progress: job.progress,
                    role: job.role,
                    server_job_id: job.server_job_id.clone(),
                    result: job.result,
                    error_message: job.error_message.clone(),
                })
                .collect(),
            reconcile: self.reconcile.as_ref().map(|job| ReconcileRowView {
                id: job.id.clone(),
                status: job.status,
                status_known: !self.reconcile_restored,
                summary: job.summary.clone(),
            }),
            reconcile_ready: self.reconcile_pair().is_some(),
            dirty: self.dirty,
        }
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
