use std::time::Duration;

use bytes::Bytes;
use recon_logging::recon_debug;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use url::Url;

use crate::types::WorkflowStatusEnvelope;
use crate::{
    ClientError, FailureKind, ReconcileJobStatus, ReconcileStarted, UploadAccepted,
    UploadJobStatus, WorkflowStarted, WorkflowStatus,
};

/// Metadata tag sent with every uploaded file.
pub const UPLOAD_SOURCE_TAG: &str = "reconciliation_console";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Remote job API used by the orchestrators.
#[async_trait::async_trait]
pub trait JobApi: Send + Sync {
    async fn submit_upload(
        &self,
        file_name: &str,
        mime_type: &str,
        payload: Bytes,
    ) -> Result<UploadAccepted, ClientError>;

    async fn upload_status(&self, server_job_id: &str) -> Result<UploadJobStatus, ClientError>;

    async fn start_reconcile(
        &self,
        job_id_a: &str,
        job_id_b: &str,
    ) -> Result<ReconcileStarted, ClientError>;

    async fn reconcile_status(&self, run_id: &str) -> Result<ReconcileJobStatus, ClientError>;

    async fn start_workflow(
        &self,
        workflow_id: &str,
        parameters: &Map<String, Value>,
    ) -> Result<WorkflowStarted, ClientError>;

    async fn workflow_status(&self, run_id: &str) -> Result<WorkflowStatus, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestJobClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestJobClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|err| ClientError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::new(
                FailureKind::InvalidUrl,
                format!("{} cannot be used as a base url", settings.base_url),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ClientError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait::async_trait]
impl JobApi for ReqwestJobClient {
    async fn submit_upload(
        &self,
        file_name: &str,
        mime_type: &str,
        payload: Bytes,
    ) -> Result<UploadAccepted, ClientError> {
        let part = Part::bytes(payload.to_vec()).file_name(file_name.to_string());
        let part = match part.mime_str(mime_type) {
            Ok(part) => part,
            Err(_) => Part::bytes(payload.to_vec())
                .file_name(file_name.to_string())
                .mime_str("application/octet-stream")
                .map_err(map_reqwest_error)?,
        };
        let form = Form::new().part("file", part).text("source", UPLOAD_SOURCE_TAG);

        let url = self.endpoint(&["upload"]);
        recon_debug!("POST {} ({} bytes)", url, payload.len());
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn upload_status(&self, server_job_id: &str) -> Result<UploadJobStatus, ClientError> {
        self.get_json(self.endpoint(&["upload", "job", server_job_id]))
            .await
    }

    async fn start_reconcile(
        &self,
        job_id_a: &str,
        job_id_b: &str,
    ) -> Result<ReconcileStarted, ClientError> {
        let body = json!({ "job_id_a": job_id_a, "job_id_b": job_id_b });
        self.post_json(self.endpoint(&["reconcile", "start"]), &body)
            .await
    }

    async fn reconcile_status(&self, run_id: &str) -> Result<ReconcileJobStatus, ClientError> {
        self.get_json(self.endpoint(&["reconcile", "job", run_id]))
            .await
    }

    async fn start_workflow(
        &self,
        workflow_id: &str,
        parameters: &Map<String, Value>,
    ) -> Result<WorkflowStarted, ClientError> {
        let body = json!({ "workflow_id": workflow_id, "parameters": parameters });
        self.post_json(self.endpoint(&["workflows", "execute"]), &body)
            .await
    }

    async fn workflow_status(&self, run_id: &str) -> Result<WorkflowStatus, ClientError> {
        let envelope: WorkflowStatusEnvelope = self
            .get_json(self.endpoint(&["workflows", "status", run_id]))
            .await?;
        Ok(envelope.workflow)
    }
}

impl ReqwestJobClient {
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ClientError> {
        recon_debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        read_json(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: Url, body: &Value) -> Result<T, ClientError> {
        recon_debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        };
        return Err(ClientError::new(
            FailureKind::HttpStatus(status.as_u16()),
            message,
        ));
    }

    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&bytes).map_err(|err| ClientError::new(FailureKind::Decode, err.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        return ClientError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return ClientError::new(FailureKind::Decode, err.to_string());
    }
    ClientError::new(FailureKind::Network, err.to_string())
}
