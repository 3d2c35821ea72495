use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use recon_core::{
    initial_steps, workflow_parameters, ActionKind, ExceptionRecord, StepStatus, WorkflowExecution,
    WorkflowStep,
};
use recon_logging::{recon_debug, recon_info, recon_warn};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::JobApi;
use crate::poll::{PollPolicy, PollTick, Poller};
use crate::types::{RemoteStatus, RemoteStep, WorkflowStatus};

pub const FAILED_OR_TIMED_OUT_MESSAGE: &str = "Workflow execution failed or timed out.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("no workflow trigger found for action {action:?}")]
    NoTrigger { action: String },
    #[error("failed to start workflow: {0}")]
    StartFailed(String),
    #[error("{0}")]
    Failed(String),
    #[error("Workflow execution failed or timed out.")]
    TimedOut,
    #[error("workflow request failed: {0}")]
    Transport(String),
    #[error("workflow polling cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StepsChanged(Vec<WorkflowStep>),
    Started { run_id: String },
}

/// Receives step progress while a workflow runs.
pub trait ExecutionSink: Send + Sync {
    fn emit(&self, event: WorkflowEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub run_id: String,
    pub message: String,
    pub duration: Duration,
    pub changes_applied: Vec<String>,
    pub steps: Vec<WorkflowStep>,
}

/// Runs named remediation actions against an exception record.
pub struct WorkflowExecutor {
    api: Arc<dyn JobApi>,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl WorkflowExecutor {
    pub fn new(api: Arc<dyn JobApi>, policy: PollPolicy) -> Self {
        Self {
            api,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn execute(
        &self,
        exception: &ExceptionRecord,
        action: &str,
        kind: ActionKind,
        sink: &dyn ExecutionSink,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let mut execution = WorkflowExecution::new(initial_steps(exception, action, kind));
        sink.emit(WorkflowEvent::StepsChanged(execution.steps().to_vec()));

        let Some(trigger) = exception.find_trigger(action) else {
            recon_warn!("No trigger for action {:?} on exception {}", action, exception.id);
            return Err(WorkflowError::NoTrigger {
                action: action.to_string(),
            });
        };

        let parameters = workflow_parameters(trigger, exception, action, kind);
        let started_at = Instant::now();
        let run_id = match self.api.start_workflow(&trigger.workflow_id, &parameters).await {
            Ok(started) => match started.workflow_id {
                Some(run_id) => run_id,
                None => {
                    return Err(WorkflowError::StartFailed(
                        "no workflow id returned".to_string(),
                    ))
                }
            },
            Err(err) if err.is_transport() => {
                fail_cursor(&mut execution, &err.message, sink);
                return Err(WorkflowError::Transport(err.message));
            }
            Err(err) => return Err(WorkflowError::StartFailed(err.message)),
        };

        recon_info!(
            "Workflow {} started as run {} for exception {}",
            trigger.workflow_id,
            run_id,
            exception.id
        );
        execution.set_run_id(run_id.clone());
        sink.emit(WorkflowEvent::Started {
            run_id: run_id.clone(),
        });

        let mut poller = Poller::new(self.policy, self.cancel.clone());
        loop {
            match poller.next().await {
                PollTick::Attempt(attempt) => {
                    let status = match self.api.workflow_status(&run_id).await {
                        Ok(status) => status,
                        Err(err) if err.is_transport() => {
                            fail_cursor(&mut execution, &err.message, sink);
                            return Err(WorkflowError::Transport(err.message));
                        }
                        Err(err) => {
                            recon_debug!("Workflow poll {} for {} skipped: {}", attempt, run_id, err);
                            continue;
                        }
                    };

                    if let Some(steps) = status.steps.as_ref() {
                        execution.replace_steps(steps.iter().map(to_step).collect());
                        sink.emit(WorkflowEvent::StepsChanged(execution.steps().to_vec()));
                    }

                    match status.status {
                        RemoteStatus::Completed => {
                            let elapsed = started_at.elapsed();
                            return Ok(outcome(&status, run_id, &trigger.title, elapsed, &execution));
                        }
                        RemoteStatus::Failed => {
                            let message = result_text(status.result_data.as_ref(), &["error", "message"])
                                .unwrap_or_else(|| FAILED_OR_TIMED_OUT_MESSAGE.to_string());
                            return Err(WorkflowError::Failed(message));
                        }
                        RemoteStatus::Other => {}
                    }
                }
                PollTick::Exhausted(attempts) => {
                    recon_warn!("Workflow run {} unfinished after {} polls", run_id, attempts);
                    return Err(WorkflowError::TimedOut);
                }
                PollTick::Cancelled => return Err(WorkflowError::Cancelled),
            }
        }
    }
}

// Blames whichever step the cursor points at, not necessarily the one in flight.
fn fail_cursor(execution: &mut WorkflowExecution, message: &str, sink: &dyn ExecutionSink) {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    execution.mark_cursor_failed(message, timestamp);
    sink.emit(WorkflowEvent::StepsChanged(execution.steps().to_vec()));
}

fn to_step(remote: &RemoteStep) -> WorkflowStep {
    let title = remote
        .title
        .clone()
        .or_else(|| remote.name.clone())
        .unwrap_or_default();
    let id = remote.id.clone().unwrap_or_else(|| title.clone());
    WorkflowStep {
        id,
        title,
        description: remote.description.clone().unwrap_or_default(),
        status: step_status(remote.status.as_deref()),
        details: remote.details.as_ref().map(value_text),
        timestamp: remote.timestamp.clone(),
    }
}

fn step_status(status: Option<&str>) -> StepStatus {
    match status {
        Some("running" | "in_progress") => StepStatus::Running,
        Some("completed" | "success") => StepStatus::Completed,
        Some("failed" | "error") => StepStatus::Failed,
        _ => StepStatus::Pending,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn result_text(result: Option<&Value>, keys: &[&str]) -> Option<String> {
    let result = result?;
    keys.iter()
        .find_map(|key| result.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn outcome(
    status: &WorkflowStatus,
    run_id: String,
    title: &str,
    elapsed: Duration,
    execution: &WorkflowExecution,
) -> WorkflowOutcome {
    let message = result_text(status.result_data.as_ref(), &["message"])
        .unwrap_or_else(|| format!("{title} completed successfully"));
    let changes_applied = status
        .result_data
        .as_ref()
        .and_then(|data| data.get("changes_applied"))
        .and_then(Value::as_array)
        .map(|changes| changes.iter().map(change_text).collect())
        .unwrap_or_default();

    WorkflowOutcome {
        success: true,
        run_id,
        message,
        duration: status
            .execution_time_ms
            .map(Duration::from_millis)
            .unwrap_or(elapsed),
        changes_applied,
        steps: execution.steps().to_vec(),
    }
}

fn change_text(change: &Value) -> String {
    ["description", "summary"]
        .iter()
        .find_map(|key| change.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| value_text(change))
}
