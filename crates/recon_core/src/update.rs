use crate::{Effect, JobStore, Msg, UploadJobPatch, UploadStatus};

/// Pure update function: applies a message to the store and returns any effects.
pub fn update(mut state: JobStore, msg: Msg) -> (JobStore, Vec<Effect>) {
    let effects = match msg {
        Msg::FilesSelected(files) => {
            if files.is_empty() {
                return (state, Vec::new());
            }
            let mut job_ids = Vec::with_capacity(files.len());
            for file in files {
                let id = state.next_id();
                state.upsert(
                    id,
                    UploadJobPatch {
                        name: Some(file.name),
                        size_bytes: Some(file.size_bytes),
                        mime_type: Some(file.mime_type),
                        status: Some(UploadStatus::Pending),
                        progress: Some(0),
                        role: file.role,
                        ..UploadJobPatch::default()
                    },
                );
                job_ids.push(id);
            }
            vec![Effect::UploadFiles { job_ids }]
        }
        Msg::RoleAssigned { job_id, role } => {
            // Tagging never creates a job.
            if state.get(job_id).is_some() {
                state.upsert(job_id, UploadJobPatch::role(role));
            }
            Vec::new()
        }
        Msg::JobRemoved { job_id } => {
            state.remove(job_id);
            Vec::new()
        }
        Msg::ReconcileRequested => match state.reconcile_pair() {
            Some((job_a, job_b)) => vec![Effect::StartReconcile { job_a, job_b }],
            None => Vec::new(),
        },
        Msg::SessionReset => {
            state.reset();
            Vec::new()
        }
        Msg::Restore {
            uploads,
            reconcile_job_id,
        } => {
            state = JobStore::restore(uploads, reconcile_job_id);
            Vec::new()
        }
    };

    (state, effects)
}
