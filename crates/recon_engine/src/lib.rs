//! Reconciliation console engine: HTTP job client, persistence and the
//! orchestrators that drive jobs through their poll loops.
mod board;
mod client;
mod engine;
mod persist;
mod poll;
mod reconcile;
mod snapshot;
mod types;
mod upload;
mod workflow;

pub use board::JobBoard;
pub use client::{ClientSettings, JobApi, ReqwestJobClient, UPLOAD_SOURCE_TAG};
pub use engine::{EngineEvent, EngineHandle, EngineSettings};
pub use persist::{
    ensure_state_dir, AtomicFileWriter, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore,
    PersistError,
};
pub use poll::{MaxAttempts, PollPolicy, PollTick, Poller};
pub use reconcile::{ReconcileError, ReconcileOrchestrator};
pub use snapshot::{SnapshotStore, RECONCILE_JOB_KEY, SNAPSHOT_VERSION, UPLOAD_JOBS_KEY};
pub use types::{
    ClientError, FailureKind, ReconcileJobStatus, ReconcileStarted, RemoteStatus, RemoteStep,
    UploadAccepted, UploadJobResult, UploadJobStatus, WorkflowStarted, WorkflowStatus,
};
pub use upload::{
    UploadOrchestrator, UploadOutcome, NO_JOB_ID_MESSAGE, NO_PAYLOAD_MESSAGE,
    PROCESSING_FAILED_MESSAGE,
};
pub use workflow::{
    ExecutionSink, WorkflowError, WorkflowEvent, WorkflowExecutor, WorkflowOutcome,
    FAILED_OR_TIMED_OUT_MESSAGE,
};
