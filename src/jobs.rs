//! Client for the background ingestion job queue
//!
//! Document uploads are heavy (parsing, chunking, indexing), so they run on a
//! worker fleet behind a small HTTP queue: enqueue returns a job id right
//! away and the outcome is fetched by polling.

use crate::error::{OrchestratorError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One observation of a job, as reported by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnqueueReceipt {
    status: JobStatus,
    job_id: String,
}

/// Reusable job queue client (connection-pooled)
pub struct JobQueueClient {
    client: Client,
    base_url: String,
}

impl JobQueueClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Reads the queue endpoint from `JOB_QUEUE_BASE_URL`. Deployments
    /// without a worker fleet leave it unset and skip document ingestion.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("JOB_QUEUE_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        info!("Job queue endpoint: {}", base_url);
        Self::new(&base_url).ok()
    }

    /// Submits a document for ingestion and returns the queue's job id.
    pub async fn enqueue_document(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        let url = format!("{}/jobs/documents", self.base_url);
        let body = serde_json::json!({
            "filename": filename,
            "content_base64": BASE64.encode(bytes),
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Job queue enqueue failed: {}", e);
                OrchestratorError::Transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Upstream(format!(
                "job queue returned {} on enqueue: {}",
                status, payload
            )));
        }

        let receipt = response.json::<EnqueueReceipt>().await?;
        debug!(job_id = %receipt.job_id, status = %receipt.status, "Document enqueued");
        Ok(receipt.job_id)
    }

    /// Fetches the current status (and result, once finished) of a job.
    pub async fn fetch(&self, job_id: &str) -> Result<JobSnapshot> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);

        let response = self.client.get(url).send().await.map_err(|e| {
            error!("Job queue fetch failed for {}: {}", job_id, e);
            OrchestratorError::Transport(e)
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(OrchestratorError::Upstream(format!(
                "job queue does not know job '{}'",
                job_id
            )));
        }
        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Upstream(format!(
                "job queue returned {} for job '{}': {}",
                status, job_id, payload
            )));
        }

        Ok(response.json::<JobSnapshot>().await?)
    }

    /// Polls until the job reaches a terminal status or the timeout passes.
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<JobSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.fetch(job_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OrchestratorError::Upstream(format!(
                    "job '{}' still {} after {:?}",
                    job_id, snapshot.status, timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminality() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Started.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_snapshot_parses_queue_payloads() {
        let running: JobSnapshot = serde_json::from_str(r#"{"status":"started"}"#).unwrap();
        assert_eq!(running.status, JobStatus::Started);
        assert!(running.result.is_none());

        let finished: JobSnapshot = serde_json::from_str(
            r#"{"status":"finished","result":{"document_id":"doc-42","chunks":17}}"#,
        )
        .unwrap();
        assert_eq!(finished.status, JobStatus::Finished);
        assert_eq!(finished.result.unwrap()["document_id"], "doc-42");

        let failed: JobSnapshot =
            serde_json::from_str(r#"{"status":"failed","error":"unsupported file type"}"#).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("unsupported file type"));
    }

    #[test]
    fn test_enqueue_receipt_parses_minimal_reply() {
        let receipt: EnqueueReceipt =
            serde_json::from_str(r#"{"status":"queued","job_id":"rq:job:abc123"}"#).unwrap();
        assert_eq!(receipt.status, JobStatus::Queued);
        assert_eq!(receipt.job_id, "rq:job:abc123");
    }
}
