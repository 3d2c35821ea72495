use std::io;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use recon_core::{ActionKind, ExceptionRecord, JobId, ReconcileJob};
use recon_logging::{recon_info, recon_warn};
use tokio_util::sync::CancellationToken;

use crate::board::JobBoard;
use crate::client::JobApi;
use crate::poll::PollPolicy;
use crate::reconcile::ReconcileOrchestrator;
use crate::upload::{UploadOrchestrator, UploadOutcome};
use crate::workflow::{
    ExecutionSink, WorkflowError, WorkflowEvent, WorkflowExecutor, WorkflowOutcome,
};

/// Poll settings for each job class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub upload_poll: PollPolicy,
    pub reconcile_poll: PollPolicy,
    pub workflow_poll: PollPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            upload_poll: PollPolicy::upload(),
            reconcile_poll: PollPolicy::reconcile(),
            workflow_poll: PollPolicy::workflow(),
        }
    }
}

enum EngineCommand {
    Upload { job_ids: Vec<JobId> },
    ResumeUploads { job_ids: Vec<JobId> },
    StartReconcile { job_a: JobId, job_b: JobId },
    ResumeReconcile,
    ExecuteWorkflow {
        exception: ExceptionRecord,
        action: String,
        kind: ActionKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    UploadFinished {
        job_id: JobId,
        outcome: UploadOutcome,
    },
    /// Every job of one upload (or resume) command has been driven as far as it goes.
    UploadBatchFinished { job_ids: Vec<JobId> },
    ReconcileStarted { run_id: String },
    ReconcileStartFailed { message: String },
    /// `None` when polling stopped before the run finished.
    ReconcileFinished { job: Option<ReconcileJob> },
    Workflow(WorkflowEvent),
    WorkflowFinished(Result<WorkflowOutcome, WorkflowError>),
}

struct ChannelExecutionSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ExecutionSink for ChannelExecutionSink {
    fn emit(&self, event: WorkflowEvent) {
        let _ = self.tx.send(EngineEvent::Workflow(event));
    }
}

#[derive(Clone)]
struct Orchestrators {
    api: Arc<dyn JobApi>,
    board: JobBoard,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl Orchestrators {
    fn uploads(&self) -> UploadOrchestrator {
        UploadOrchestrator::new(self.api.clone(), self.board.clone(), self.settings.upload_poll)
            .with_cancellation(self.cancel.child_token())
    }

    fn reconcile(&self) -> ReconcileOrchestrator {
        ReconcileOrchestrator::new(
            self.api.clone(),
            self.board.clone(),
            self.settings.reconcile_poll,
        )
        .with_cancellation(self.cancel.child_token())
    }

    fn workflows(&self) -> WorkflowExecutor {
        WorkflowExecutor::new(self.api.clone(), self.settings.workflow_poll)
            .with_cancellation(self.cancel.child_token())
    }
}

/// Runs orchestrators on a background Tokio runtime and reports back over a channel.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    cancel: CancellationToken,
}

impl EngineHandle {
    pub fn new(api: Arc<dyn JobApi>, board: JobBoard, settings: EngineSettings) -> io::Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let cancel = CancellationToken::new();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let orchestrators = Orchestrators {
            api,
            board,
            settings,
            cancel: cancel.clone(),
        };

        thread::Builder::new()
            .name("recon-engine".to_string())
            .spawn(move || {
                while let Ok(command) = cmd_rx.recv() {
                    let orchestrators = orchestrators.clone();
                    let event_tx = event_tx.clone();
                    runtime.spawn(async move {
                        handle_command(&orchestrators, command, event_tx).await;
                    });
                }
                // Let loops that are still waiting wind down before the runtime drops.
                orchestrators.cancel.cancel();
                runtime.shutdown_timeout(Duration::from_secs(1));
            })?;

        Ok(Self {
            cmd_tx,
            event_rx,
            cancel,
        })
    }

    pub fn upload(&self, job_ids: Vec<JobId>) {
        self.send(EngineCommand::Upload { job_ids });
    }

    pub fn resume_uploads(&self, job_ids: Vec<JobId>) {
        self.send(EngineCommand::ResumeUploads { job_ids });
    }

    pub fn start_reconcile(&self, job_a: JobId, job_b: JobId) {
        self.send(EngineCommand::StartReconcile { job_a, job_b });
    }

    pub fn resume_reconcile(&self) {
        self.send(EngineCommand::ResumeReconcile);
    }

    pub fn execute_workflow(&self, exception: ExceptionRecord, action: impl Into<String>, kind: ActionKind) {
        self.send(EngineCommand::ExecuteWorkflow {
            exception,
            action: action.into(),
            kind,
        });
    }

    /// Block until the next event; `None` once the engine thread is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.event_rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Stop scheduling further poll iterations. Requests already in flight
    /// finish, and their results are discarded if they no longer apply.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: EngineCommand) {
        if self.cmd_tx.send(command).is_err() {
            recon_warn!("Engine thread is gone; command dropped");
        }
    }
}

async fn handle_command(
    orchestrators: &Orchestrators,
    command: EngineCommand,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::Upload { job_ids } => {
            let outcomes = orchestrators.uploads().run(&job_ids).await;
            report_uploads(&event_tx, job_ids, outcomes);
        }
        EngineCommand::ResumeUploads { job_ids } => {
            let outcomes = orchestrators.uploads().resume(&job_ids).await;
            report_uploads(&event_tx, job_ids, outcomes);
        }
        EngineCommand::StartReconcile { job_a, job_b } => {
            let reconcile = orchestrators.reconcile();
            match reconcile.start(job_a, job_b).await {
                Ok(run_id) => {
                    let _ = event_tx.send(EngineEvent::ReconcileStarted {
                        run_id: run_id.clone(),
                    });
                    let job = reconcile.wait(&run_id).await;
                    let _ = event_tx.send(EngineEvent::ReconcileFinished { job });
                }
                Err(err) => {
                    recon_warn!("Reconciliation not started: {}", err);
                    let _ = event_tx.send(EngineEvent::ReconcileStartFailed {
                        message: err.to_string(),
                    });
                }
            }
        }
        EngineCommand::ResumeReconcile => {
            let job = orchestrators.reconcile().resume().await;
            let _ = event_tx.send(EngineEvent::ReconcileFinished { job });
        }
        EngineCommand::ExecuteWorkflow {
            exception,
            action,
            kind,
        } => {
            let sink = ChannelExecutionSink {
                tx: event_tx.clone(),
            };
            let result = orchestrators
                .workflows()
                .execute(&exception, &action, kind, &sink)
                .await;
            match &result {
                Ok(outcome) => recon_info!("Workflow run {} succeeded", outcome.run_id),
                Err(err) => recon_warn!("Workflow {:?} failed: {}", action, err),
            }
            let _ = event_tx.send(EngineEvent::WorkflowFinished(result));
        }
    }
}

fn report_uploads(
    event_tx: &mpsc::Sender<EngineEvent>,
    job_ids: Vec<JobId>,
    outcomes: Vec<(JobId, UploadOutcome)>,
) {
    for (job_id, outcome) in outcomes {
        let _ = event_tx.send(EngineEvent::UploadFinished { job_id, outcome });
    }
    let _ = event_tx.send(EngineEvent::UploadBatchFinished { job_ids });
}
