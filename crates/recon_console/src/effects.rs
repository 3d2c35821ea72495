use recon_core::{ActionKind, Effect, ExceptionRecord, JobId};
use recon_engine::{EngineEvent, EngineHandle, WorkflowError, WorkflowOutcome};
use recon_logging::{recon_info, recon_warn};

/// Hands effects to the engine and blocks until each one has played out.
pub struct EffectRunner {
    engine: EngineHandle,
}

impl EffectRunner {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    pub fn run(&self, effects: Vec<Effect>, on_event: &mut dyn FnMut(&EngineEvent)) {
        for effect in effects {
            match effect {
                Effect::UploadFiles { job_ids } => {
                    recon_info!("UploadFiles job_ids={:?}", job_ids);
                    self.engine.upload(job_ids);
                    self.wait_for(on_event, |event| {
                        matches!(event, EngineEvent::UploadBatchFinished { .. })
                    });
                }
                Effect::StartReconcile { job_a, job_b } => {
                    recon_info!("StartReconcile job_a={} job_b={}", job_a, job_b);
                    self.engine.start_reconcile(job_a, job_b);
                    self.wait_for(on_event, |event| {
                        matches!(
                            event,
                            EngineEvent::ReconcileFinished { .. }
                                | EngineEvent::ReconcileStartFailed { .. }
                        )
                    });
                }
            }
        }
    }

    /// Pick up where the previous session stopped.
    pub fn resume(
        &self,
        uploads: Vec<JobId>,
        reconcile_pending: bool,
        on_event: &mut dyn FnMut(&EngineEvent),
    ) {
        if !uploads.is_empty() {
            self.engine.resume_uploads(uploads);
            self.wait_for(on_event, |event| {
                matches!(event, EngineEvent::UploadBatchFinished { .. })
            });
        }
        if reconcile_pending {
            self.engine.resume_reconcile();
            self.wait_for(on_event, |event| {
                matches!(event, EngineEvent::ReconcileFinished { .. })
            });
        }
    }

    pub fn execute_workflow(
        &self,
        exception: ExceptionRecord,
        action: &str,
        kind: ActionKind,
        on_event: &mut dyn FnMut(&EngineEvent),
    ) -> Result<WorkflowOutcome, WorkflowError> {
        self.engine.execute_workflow(exception, action, kind);
        let mut result = Err(WorkflowError::Cancelled);
        self.wait_for(
            &mut |event| {
                if let EngineEvent::WorkflowFinished(finished) = event {
                    result = finished.clone();
                }
                on_event(event);
            },
            |event| matches!(event, EngineEvent::WorkflowFinished(_)),
        );
        result
    }

    pub fn shutdown(self) {
        self.engine.cancel();
    }

    fn wait_for(
        &self,
        on_event: &mut dyn FnMut(&EngineEvent),
        done: impl Fn(&EngineEvent) -> bool,
    ) {
        while let Some(event) = self.engine.recv() {
            on_event(&event);
            if done(&event) {
                return;
            }
        }
        recon_warn!("Engine stopped before the command finished");
    }
}
