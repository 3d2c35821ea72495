use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use recon_core::{
    update, ConsoleViewModel, Effect, JobId, JobStore, Msg, ReconcileJob, ReconcileStatus,
    ReconcileSummary, SelectedFile, UploadJob, UploadJobPatch,
};
use recon_logging::{recon_debug, recon_error};

use crate::snapshot::SnapshotStore;

struct BoardInner {
    store: JobStore,
    // File contents only live in memory; snapshots never include them.
    payloads: HashMap<JobId, Bytes>,
    snapshots: SnapshotStore,
    saved_pointer: Option<Option<String>>,
}

impl BoardInner {
    fn persist_if_dirty(&mut self) {
        if !self.store.consume_dirty() {
            return;
        }
        let store = &self.store;
        self.payloads.retain(|id, _| store.get(*id).is_some());

        if let Err(err) = self.snapshots.save(self.store.list()) {
            recon_error!("Failed to persist upload jobs: {}", err);
        }
        let pointer = self.store.reconcile().map(|job| job.id.clone());
        if self.saved_pointer.as_ref() != Some(&pointer) {
            match self.snapshots.save_reconcile_pointer(pointer.as_deref()) {
                Ok(()) => self.saved_pointer = Some(pointer),
                Err(err) => recon_error!("Failed to persist reconcile pointer: {}", err),
            }
        }
        recon_debug!("Snapshot written ({} job(s))", self.store.list().len());
    }
}

/// The job store shared by every orchestrator.
///
/// All access is serialised by one mutex, and every mutation is snapshotted
/// before the call returns. The lock is never held across an `.await`.
#[derive(Clone)]
pub struct JobBoard {
    inner: Arc<Mutex<BoardInner>>,
}

impl JobBoard {
    /// Restore the board from `snapshots`.
    pub fn open(snapshots: SnapshotStore) -> Self {
        let uploads = snapshots.load();
        let reconcile_job_id = snapshots.load_reconcile_pointer();
        let (store, _) = update(
            JobStore::new(),
            Msg::Restore {
                uploads,
                reconcile_job_id: reconcile_job_id.clone(),
            },
        );
        let mut inner = BoardInner {
            store,
            payloads: HashMap::new(),
            snapshots,
            saved_pointer: Some(reconcile_job_id),
        };
        inner.persist_if_dirty();
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut JobStore) -> R) -> R {
        let mut inner = self.lock();
        let result = f(&mut inner.store);
        inner.persist_if_dirty();
        result
    }

    /// Apply an operator message and return the effects to run.
    pub fn dispatch(&self, msg: Msg) -> Vec<Effect> {
        let mut inner = self.lock();
        let state = std::mem::take(&mut inner.store);
        let (state, effects) = update(state, msg);
        inner.store = state;
        inner.persist_if_dirty();
        effects
    }

    /// Create one pending job per file and keep the payloads for the upload.
    pub fn select_files(&self, files: Vec<(SelectedFile, Bytes)>) -> Vec<Effect> {
        let (selected, payloads): (Vec<_>, Vec<_>) = files.into_iter().unzip();
        let mut inner = self.lock();
        let state = std::mem::take(&mut inner.store);
        let (state, effects) = update(state, Msg::FilesSelected(selected));
        inner.store = state;
        for effect in &effects {
            if let Effect::UploadFiles { job_ids } = effect {
                for (id, payload) in job_ids.iter().zip(payloads.iter()) {
                    inner.payloads.insert(*id, payload.clone());
                }
            }
        }
        inner.persist_if_dirty();
        effects
    }

    pub fn upsert(&self, id: JobId, patch: UploadJobPatch) -> UploadJob {
        self.mutate(|store| store.upsert(id, patch).clone())
    }

    /// Apply `patch` only if job `id` still exists. Returns `false` otherwise.
    pub fn upsert_existing(&self, id: JobId, patch: UploadJobPatch) -> bool {
        self.mutate(|store| {
            let exists = store.get(id).is_some();
            if exists {
                store.upsert(id, patch);
            }
            exists
        })
    }

    /// Apply `patch` only while job `id` still exists and carries
    /// `server_job_id`. Returns `false` when the response is stale.
    pub fn upsert_if_current(&self, id: JobId, server_job_id: &str, patch: UploadJobPatch) -> bool {
        self.mutate(|store| {
            let current = store
                .get(id)
                .is_some_and(|job| job.server_job_id.as_deref() == Some(server_job_id));
            if current {
                store.upsert(id, patch);
            }
            current
        })
    }

    pub fn is_current_upload(&self, id: JobId, server_job_id: &str) -> bool {
        self.lock()
            .store
            .get(id)
            .is_some_and(|job| job.server_job_id.as_deref() == Some(server_job_id))
    }

    pub fn remove(&self, id: JobId) -> Option<UploadJob> {
        self.mutate(|store| store.remove(id))
    }

    pub fn list(&self) -> Vec<UploadJob> {
        self.lock().store.list().to_vec()
    }

    pub fn get(&self, id: JobId) -> Option<UploadJob> {
        self.lock().store.get(id).cloned()
    }

    pub fn payload(&self, id: JobId) -> Option<Bytes> {
        self.lock().payloads.get(&id).cloned()
    }

    pub fn resumable_uploads(&self) -> Vec<JobId> {
        self.lock().store.resumable_uploads()
    }

    pub fn reconcile(&self) -> Option<ReconcileJob> {
        self.lock().store.reconcile().cloned()
    }

    pub fn track_reconcile(&self, job: ReconcileJob) {
        self.mutate(|store| store.track_reconcile(job));
    }

    /// Update the tracked run; `false` when `run_id` is no longer tracked.
    pub fn patch_reconcile(
        &self,
        run_id: &str,
        status: ReconcileStatus,
        summary: Option<ReconcileSummary>,
    ) -> bool {
        self.mutate(|store| store.patch_reconcile(run_id, status, summary))
    }

    pub fn is_tracking_reconcile(&self, run_id: &str) -> bool {
        self.lock()
            .store
            .reconcile()
            .is_some_and(|job| job.id == run_id)
    }

    pub fn view(&self) -> ConsoleViewModel {
        self.lock().store.view()
    }
}
