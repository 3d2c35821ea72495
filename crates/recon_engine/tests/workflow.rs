use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use recon_core::{ActionKind, ExceptionRecord, StepStatus, Trigger, WorkflowStep};
use recon_engine::{
    ClientSettings, ExecutionSink, JobApi, MaxAttempts, PollPolicy, ReqwestJobClient,
    WorkflowError, WorkflowEvent, WorkflowExecutor,
};
use serde_json::{json, Map};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct TestSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl TestSink {
    fn take(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }

    fn last_steps(events: &[WorkflowEvent]) -> Vec<WorkflowStep> {
        events
            .iter()
            .rev()
            .find_map(|event| match event {
                WorkflowEvent::StepsChanged(steps) => Some(steps.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

impl ExecutionSink for TestSink {
    fn emit(&self, event: WorkflowEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn client(base_url: &str) -> Arc<dyn JobApi> {
    Arc::new(ReqwestJobClient::new(ClientSettings::new(base_url)).expect("client"))
}

fn fast(max_attempts: u32) -> PollPolicy {
    PollPolicy::new(Duration::from_millis(5), MaxAttempts::Limited(max_attempts))
}

fn exception() -> ExceptionRecord {
    let mut parameters = Map::new();
    parameters.insert("account".to_string(), json!("4000"));
    parameters.insert("action".to_string(), json!("overridden"));
    ExceptionRecord {
        id: "EX-42".to_string(),
        triggers: vec![Trigger {
            title: "Auto-adjust".to_string(),
            name: Some("auto_adjust".to_string()),
            workflow_id: "wf-adjust".to_string(),
            description: None,
            parameters,
        }],
    }
}

#[tokio::test]
async fn missing_trigger_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let executor = WorkflowExecutor::new(client(&server.uri()), fast(3));
    let sink = TestSink::default();
    let err = executor
        .execute(&exception(), "Escalate", ActionKind::Review, &sink)
        .await
        .expect_err("no trigger");

    assert_eq!(
        err,
        WorkflowError::NoTrigger {
            action: "Escalate".to_string()
        }
    );
    let steps = TestSink::last_steps(&sink.take());
    let ids: Vec<&str> = steps.iter().map(|step| step.id.as_str()).collect();
    assert_eq!(ids, vec!["analysis", "review", "approval"]);
    assert!(server.received_requests().await.expect("recording").is_empty());
}

#[tokio::test]
async fn completed_run_replaces_steps_and_reports_changes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflows/execute"))
        .and(body_partial_json(json!({
            "workflow_id": "wf-adjust",
            "parameters": {
                "account": "4000",
                "action": "auto_adjust",
                "action_type": "execute",
                "exception_id": "EX-42"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"workflow_id": "run-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/run-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow": {
                "status": "running",
                "steps": [
                    {"id": "prepare", "title": "Prepare", "status": "completed"},
                    {"id": "post", "title": "Post", "status": "running"}
                ]
            }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/run-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow": {
                "status": "completed",
                "steps": [{"id": "post", "title": "Post", "status": "success"}],
                "execution_time_ms": 1200,
                "result_data": {
                    "message": "Adjustment posted",
                    "changes_applied": [{"description": "Posted 12.50 to 4000"}, "Closed break"]
                }
            }
        })))
        .mount(&server)
        .await;

    let executor = WorkflowExecutor::new(client(&server.uri()), fast(5));
    let sink = TestSink::default();
    let outcome = executor
        .execute(&exception(), "auto_adjust", ActionKind::Execute, &sink)
        .await
        .expect("workflow succeeds");

    assert!(outcome.success);
    assert_eq!(outcome.run_id, "run-1");
    assert_eq!(outcome.message, "Adjustment posted");
    assert_eq!(outcome.duration, Duration::from_millis(1200));
    assert_eq!(
        outcome.changes_applied,
        vec!["Posted 12.50 to 4000".to_string(), "Closed break".to_string()]
    );
    assert_eq!(outcome.steps.len(), 1);
    assert_eq!(outcome.steps[0].id, "post");
    assert_eq!(outcome.steps[0].status, StepStatus::Completed);

    let events = sink.take();
    assert!(events.contains(&WorkflowEvent::Started {
        run_id: "run-1".to_string()
    }));
    match events.first() {
        Some(WorkflowEvent::StepsChanged(steps)) => {
            assert_eq!(steps.len(), 4);
            assert_eq!(steps[2].title, "Auto-adjust");
        }
        other => panic!("unexpected first event {other:?}"),
    }
}

#[tokio::test]
async fn failed_run_surfaces_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflows/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"workflow_id": "run-2"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/run-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow": {"status": "failed", "result_data": {"error": "Ledger period closed"}}
        })))
        .mount(&server)
        .await;

    let executor = WorkflowExecutor::new(client(&server.uri()), fast(5));
    let err = executor
        .execute(&exception(), "Auto-adjust", ActionKind::Execute, &TestSink::default())
        .await
        .expect_err("workflow fails");
    assert_eq!(err, WorkflowError::Failed("Ledger period closed".to_string()));
}

#[tokio::test]
async fn unfinished_run_times_out_after_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflows/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"workflow_id": 9})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/9"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"workflow": {"status": "running"}})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let executor = WorkflowExecutor::new(client(&server.uri()), fast(2));
    let err = executor
        .execute(&exception(), "Auto-adjust", ActionKind::Execute, &TestSink::default())
        .await
        .expect_err("times out");
    assert_eq!(err, WorkflowError::TimedOut);
    assert_eq!(err.to_string(), "Workflow execution failed or timed out.");
}

#[tokio::test]
async fn rejected_start_marks_no_step() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflows/execute"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Unknown workflow"))
        .mount(&server)
        .await;

    let executor = WorkflowExecutor::new(client(&server.uri()), fast(2));
    let sink = TestSink::default();
    let err = executor
        .execute(&exception(), "Auto-adjust", ActionKind::Execute, &sink)
        .await
        .expect_err("rejected");

    assert_eq!(err, WorkflowError::StartFailed("Unknown workflow".to_string()));
    let steps = TestSink::last_steps(&sink.take());
    assert!(steps.iter().all(|step| step.status == StepStatus::Pending));
}

#[tokio::test]
async fn transport_failure_marks_cursor_step() {
    let executor = WorkflowExecutor::new(client("http://127.0.0.1:1"), fast(2));
    let sink = TestSink::default();
    let err = executor
        .execute(&exception(), "Auto-adjust", ActionKind::Execute, &sink)
        .await
        .expect_err("unreachable");

    assert!(matches!(err, WorkflowError::Transport(_)));
    let steps = TestSink::last_steps(&sink.take());
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0].status, StepStatus::Failed);
    assert!(steps[0].details.is_some());
    assert!(steps[0].timestamp.is_some());
    assert!(steps[1..].iter().all(|step| step.status == StepStatus::Pending));
}

#[tokio::test]
async fn status_without_state_keeps_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflows/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"workflow_id": "run-4"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/run-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"workflow": {}})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/run-4"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows/status/run-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow": {"status": "failed", "result_data": {"error": "Ledger period closed"}}
        })))
        .mount(&server)
        .await;

    let sink = TestSink::default();
    let executor = WorkflowExecutor::new(client(&server.uri()), fast(5));
    let err = executor
        .execute(&exception(), "Auto-adjust", ActionKind::Execute, &sink)
        .await
        .expect_err("workflow fails");
    assert_eq!(err, WorkflowError::Failed("Ledger period closed".to_string()));

    let steps = TestSink::last_steps(&sink.take());
    assert!(steps.iter().all(|step| step.status != StepStatus::Failed));
    assert_eq!(server.received_requests().await.expect("recorded").len(), 4);
}
