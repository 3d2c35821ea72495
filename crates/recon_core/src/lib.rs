//! Reconciliation console core: job records, the pure state machine and
//! view-model helpers. Nothing in here performs IO.
mod effect;
mod job;
mod msg;
mod state;
mod update;
mod view_model;
pub mod workflow;

pub use effect::Effect;
pub use job::{
    JobId, ReconcileJob, ReconcileStatus, ReconcileSummary, SelectedFile, SourceRole, UploadJob,
    UploadJobPatch, UploadResult, UploadStatus,
};
pub use msg::Msg;
pub use state::{JobStore, PAYLOAD_LOST_MESSAGE};
pub use update::update;
pub use view_model::{ConsoleViewModel, ReconcileRowView, UploadRowView};
pub use workflow::{
    initial_steps, workflow_parameters, ActionKind, ExceptionRecord, StepStatus, Trigger,
    WorkflowExecution, WorkflowStep,
};
