use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use recon_core::{
    Effect, JobId, SelectedFile, SourceRole, UploadJobPatch, UploadResult, UploadStatus,
};
use recon_engine::{
    ClientError, ClientSettings, JobApi, JobBoard, MaxAttempts, MemoryKeyValueStore, PollPolicy,
    ReconcileJobStatus, ReconcileStarted, ReqwestJobClient, SnapshotStore, UploadAccepted,
    UploadJobStatus, UploadOrchestrator, UploadOutcome, WorkflowStarted, WorkflowStatus,
    NO_JOB_ID_MESSAGE,
};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn board() -> JobBoard {
    JobBoard::open(SnapshotStore::new(Arc::new(MemoryKeyValueStore::new())))
}

fn fast(max_attempts: MaxAttempts) -> PollPolicy {
    PollPolicy::new(Duration::from_millis(5), max_attempts)
}

fn client(base_url: &str) -> Arc<dyn JobApi> {
    Arc::new(ReqwestJobClient::new(ClientSettings::new(base_url)).expect("client"))
}

fn select(board: &JobBoard, name: &str, role: Option<SourceRole>) -> Vec<JobId> {
    let file = SelectedFile {
        name: name.to_string(),
        size_bytes: 11,
        mime_type: "text/csv".to_string(),
        role,
    };
    let effects = board.select_files(vec![(file, Bytes::from_static(b"id,amount\n"))]);
    match effects.as_slice() {
        [Effect::UploadFiles { job_ids }] => job_ids.clone(),
        other => panic!("unexpected effects {other:?}"),
    }
}

#[tokio::test]
async fn upload_completes_with_server_counts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("reconciliation_console"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "srv-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": {
                "success": true,
                "processed_records": 50,
                "matches_found": 45,
                "exceptions_found": 5
            }
        })))
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "ledger.csv", Some(SourceRole::SourceA));
    let orchestrator = UploadOrchestrator::new(
        client(&server.uri()),
        board.clone(),
        fast(MaxAttempts::Limited(10)),
    );

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Completed)]);

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.server_job_id.as_deref(), Some("srv-1"));
    assert_eq!(job.role, Some(SourceRole::SourceA));
    assert_eq!(
        job.result,
        Some(UploadResult {
            records_processed: 50,
            matches_found: 45,
            exceptions_found: 5,
        })
    );
    assert_eq!(job.error_message, None);
}

#[tokio::test]
async fn rejected_upload_reports_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(400).set_body_string("File type not supported"))
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "notes.txt", None);
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(3)));

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Failed)]);

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Error);
    assert_eq!(job.progress, 100);
    assert_eq!(job.error_message.as_deref(), Some("File type not supported"));
    assert_eq!(job.server_job_id, None);
}

#[tokio::test]
async fn accepted_upload_without_job_id_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "queued"})))
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(3)));

    orchestrator.run(&ids).await;

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Error);
    assert_eq!(job.error_message.as_deref(), Some(NO_JOB_ID_MESSAGE));
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn exhausted_poll_bound_leaves_job_processing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": 77})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .expect(3)
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(3)));

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::StillProcessing)]);

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Processing);
    assert_eq!(job.progress, 50);
    assert_eq!(job.server_job_id.as_deref(), Some("77"));
}

#[tokio::test]
async fn http_errors_while_polling_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "srv-2"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-2"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "result": {"success": false, "error": "Missing amount column"}
        })))
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(5)));

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Failed)]);

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Error);
    assert_eq!(job.error_message.as_deref(), Some("Missing amount column"));
}

#[tokio::test]
async fn unreachable_server_fails_the_job() {
    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let orchestrator = UploadOrchestrator::new(
        client("http://127.0.0.1:1"),
        board.clone(),
        fast(MaxAttempts::Limited(3)),
    );

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Failed)]);

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Error);
    assert!(job.error_message.is_some());
}

#[tokio::test]
async fn jobs_upload_one_after_another() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "srv-9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": {"success": true, "processed_records": 3}
        })))
        .mount(&server)
        .await;

    let board = board();
    let mut ids = select(&board, "a.csv", None);
    ids.extend(select(&board, "b.csv", None));
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(3)));

    orchestrator.run(&ids).await;

    let requests = server.received_requests().await.expect("recording enabled");
    let methods: Vec<String> = requests.iter().map(|r| r.method.to_string()).collect();
    assert_eq!(methods, vec!["POST", "GET", "POST", "GET"]);
    assert!(board
        .list()
        .iter()
        .all(|job| job.status == UploadStatus::Completed));
}

/// Fake API whose status call lets the test act between request and response.
struct RemovingApi {
    board: JobBoard,
    job_id: JobId,
}

#[async_trait]
impl JobApi for RemovingApi {
    async fn submit_upload(
        &self,
        _file_name: &str,
        _mime_type: &str,
        _payload: Bytes,
    ) -> Result<UploadAccepted, ClientError> {
        Ok(serde_json::from_value(json!({"job_id": "srv-gone"})).expect("accepted"))
    }

    async fn upload_status(&self, _server_job_id: &str) -> Result<UploadJobStatus, ClientError> {
        self.board.remove(self.job_id);
        Ok(serde_json::from_value(json!({
            "status": "completed",
            "result": {"success": true, "processed_records": 1}
        }))
        .expect("status"))
    }

    async fn start_reconcile(&self, _a: &str, _b: &str) -> Result<ReconcileStarted, ClientError> {
        unreachable!("not used")
    }

    async fn reconcile_status(&self, _run_id: &str) -> Result<ReconcileJobStatus, ClientError> {
        unreachable!("not used")
    }

    async fn start_workflow(
        &self,
        _workflow_id: &str,
        _parameters: &Map<String, Value>,
    ) -> Result<WorkflowStarted, ClientError> {
        unreachable!("not used")
    }

    async fn workflow_status(&self, _run_id: &str) -> Result<WorkflowStatus, ClientError> {
        unreachable!("not used")
    }
}

#[tokio::test]
async fn late_response_does_not_recreate_removed_job() {
    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let api = Arc::new(RemovingApi {
        board: board.clone(),
        job_id: ids[0],
    });
    let orchestrator = UploadOrchestrator::new(api, board.clone(), fast(MaxAttempts::Limited(3)));

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Discarded)]);
    assert_eq!(board.get(ids[0]), None);
    assert!(board.list().is_empty());
}

#[tokio::test]
async fn resume_polls_restored_processing_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": {"success": true, "processed_records": 8, "matches_found": 8}
        })))
        .mount(&server)
        .await;

    let board = board();
    board.upsert(
        4,
        UploadJobPatch {
            name: Some("restored.csv".to_string()),
            server_job_id: Some("srv-4".to_string()),
            ..UploadJobPatch::status(UploadStatus::Processing, 50)
        },
    );
    assert_eq!(board.resumable_uploads(), vec![4]);

    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(3)));
    let outcomes = orchestrator.resume(&board.resumable_uploads()).await;

    assert_eq!(outcomes, vec![(4, UploadOutcome::Completed)]);
    let job = board.get(4).expect("job");
    assert_eq!(job.status, UploadStatus::Completed);
    assert_eq!(job.result.map(|r| r.matches_found), Some(8));
}

#[tokio::test]
async fn payloadless_job_fails_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let board = board();
    board.upsert(1, UploadJobPatch::status(UploadStatus::Pending, 0));
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(3)));

    let outcomes = orchestrator.run(&[1]).await;
    assert_eq!(outcomes, vec![(1, UploadOutcome::Failed)]);
    assert_eq!(board.get(1).map(|job| job.status), Some(UploadStatus::Error));
}

#[tokio::test]
async fn poll_without_status_keeps_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "srv-7"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"progress": 30})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": {
                "success": true,
                "processed_records": 50.0,
                "matches_found": 45,
                "exceptions_found": 5.0
            }
        })))
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(5)));

    let outcomes = orchestrator.run(&ids).await;
    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Completed)]);

    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Completed);
    assert_eq!(
        job.result,
        Some(UploadResult {
            records_processed: 50,
            matches_found: 45,
            exceptions_found: 5,
        })
    );
    assert_eq!(job.error_message, None);
}

#[tokio::test]
async fn cancelled_poll_leaves_job_processing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "srv-8"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/upload/job/srv-8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .mount(&server)
        .await;

    let board = board();
    let ids = select(&board, "ledger.csv", None);
    let cancel = CancellationToken::new();
    let orchestrator =
        UploadOrchestrator::new(client(&server.uri()), board.clone(), fast(MaxAttempts::Limited(10_000)))
            .with_cancellation(cancel.clone());

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
    });
    let outcomes = orchestrator.run(&ids).await;
    stopper.await.expect("cancel task");

    assert_eq!(outcomes, vec![(ids[0], UploadOutcome::Cancelled)]);
    let job = board.get(ids[0]).expect("job");
    assert_eq!(job.status, UploadStatus::Processing);
    assert_eq!(job.progress, 50);
    assert_eq!(job.server_job_id.as_deref(), Some("srv-8"));
    assert_eq!(job.error_message, None);
}
