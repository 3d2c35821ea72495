//! Remediation workflow model: triggers attached to exception records and the
//! step list an execution reports progress against.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    Execute,
    Review,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Execute => f.write_str("execute"),
            ActionKind::Review => f.write_str("review"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl WorkflowStep {
    pub fn pending(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: StepStatus::Pending,
            details: None,
            timestamp: None,
        }
    }
}

/// Remediation metadata attached to an exception record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Trigger {
    fn answers_to(&self, action: &str) -> bool {
        self.title == action || self.name.as_deref() == Some(action)
    }
}

/// The subset of an exception record the workflow executor reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub id: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl ExceptionRecord {
    /// Trigger whose title (or name) equals the requested action.
    pub fn find_trigger(&self, action: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|trigger| trigger.answers_to(action))
    }
}

/// Step list shown for `action` before anything runs.
///
/// A matching trigger gets the canonical four-step template with the
/// execution step named after the trigger; otherwise the template depends on
/// the action kind.
pub fn initial_steps(exception: &ExceptionRecord, action: &str, kind: ActionKind) -> Vec<WorkflowStep> {
    if let Some(trigger) = exception.find_trigger(action) {
        let description = trigger
            .description
            .clone()
            .unwrap_or_else(|| format!("Run workflow {}", trigger.workflow_id));
        return vec![
            WorkflowStep::pending(
                "initialization",
                "Initialization",
                "Prepare the workflow execution context",
            ),
            WorkflowStep::pending("validation", "Validation", "Validate the exception and inputs"),
            WorkflowStep {
                title: trigger.title.clone(),
                description,
                ..WorkflowStep::pending("execution", "", "")
            },
            WorkflowStep::pending("verification", "Verification", "Verify the applied changes"),
        ];
    }

    match kind {
        ActionKind::Execute => vec![
            WorkflowStep::pending("validation", "Validation", "Validate the exception and inputs"),
            WorkflowStep::pending("security", "Security check", "Check permissions for the action"),
            WorkflowStep::pending("execution", "Execution", action),
            WorkflowStep::pending("verification", "Verification", "Verify the applied changes"),
        ],
        ActionKind::Review => vec![
            WorkflowStep::pending("analysis", "Analysis", "Analyse the exception"),
            WorkflowStep::pending("review", "Review", action),
            WorkflowStep::pending("approval", "Approval", "Record the review decision"),
        ],
    }
}

/// Parameters sent when starting `trigger`: its declared parameters plus the
/// action context. Context keys overwrite declared ones.
pub fn workflow_parameters(
    trigger: &Trigger,
    exception: &ExceptionRecord,
    action: &str,
    kind: ActionKind,
) -> Map<String, Value> {
    let mut parameters = trigger.parameters.clone();
    parameters.insert("action_type".to_string(), Value::String(kind.to_string()));
    parameters.insert("exception_id".to_string(), Value::String(exception.id.clone()));
    parameters.insert("action".to_string(), Value::String(action.to_string()));
    parameters
}

/// Local state of one remediation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowExecution {
    run_id: Option<String>,
    steps: Vec<WorkflowStep>,
    cursor: usize,
}

impl WorkflowExecution {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self {
            run_id: None,
            steps,
            cursor: 0,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = Some(run_id.into());
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Index of the step currently shown as active.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Replace the whole step list with the server's view. Steps the server
    /// no longer reports are dropped.
    pub fn replace_steps(&mut self, steps: Vec<WorkflowStep>) {
        self.steps = steps;
        self.cursor = self
            .steps
            .iter()
            .position(|step| step.status != StepStatus::Completed)
            .unwrap_or_else(|| self.steps.len().saturating_sub(1));
    }

    /// Mark the step under the cursor as failed.
    ///
    /// This goes by position, so it can blame a step other than the one the
    /// server was running when the error happened.
    pub fn mark_cursor_failed(&mut self, details: impl Into<String>, timestamp: impl Into<String>) {
        if let Some(step) = self.steps.get_mut(self.cursor) {
            step.status = StepStatus::Failed;
            step.details = Some(details.into());
            step.timestamp = Some(timestamp.into());
        }
    }
}
