//! AI task-service client
//!
//! Every heavy computation (chat completion, web search, document QA, stock
//! research, transcription, text extraction) lives in an external service
//! reached over request/response. This module owns the typed contract and a
//! long-lived pooled HTTP client; the mock implementation keeps the stack
//! functional without the service.

use crate::error::{OrchestratorError, Result};
use crate::models::{CheckpointId, Message};
use crate::workflow::{TaskStart, WorkflowBackend};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::{error, info};

/// Request/response contract of the external AI task service.
#[async_trait::async_trait]
pub trait TaskService: Send + Sync {
    async fn chat(&self, context: &[Message], message: &str) -> Result<String>;
    async fn web_search(&self, query: &str) -> Result<String>;
    async fn document_answer(&self, document_id: &str, question: &str) -> Result<String>;
    async fn stock_research(&self, query: &str) -> Result<String>;
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String>;
    async fn extract_text(&self, image: &[u8]) -> Result<String>;
}

/// Reusable AI service client (connection-pooled)
pub struct AiServiceClient {
    client: Client,
    base_url: String,
}

impl AiServiceClient {
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

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("AI_SERVICE_BASE_URL")
            .or_else(|_| env::var("TASKS_API_BASE_URL"))
            .ok()?;
        Self::new(&base_url).ok()
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("AI service request failed for {}: {}", path, e);
                OrchestratorError::Transport(e)
            })?;

        let status = response.status();
        let payload = response.json::<Value>().await?;

        if !status.is_success() {
            return Err(OrchestratorError::Upstream(format!(
                "AI service returned {} for {}: {}",
                status, path, payload
            )));
        }

        Ok(payload)
    }

    fn string_field(payload: &Value, field: &str) -> Result<String> {
        payload
            .get(field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                OrchestratorError::Upstream(format!(
                    "AI service response missing '{}' field",
                    field
                ))
            })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    context: &'a [Message],
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct WorkflowStartResponse {
    status: String,
    checkpoint_id: Option<String>,
    partial: Option<Value>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowResumeResponse {
    status: String,
    result: Option<String>,
    reason: Option<String>,
}

#[async_trait::async_trait]
impl TaskService for AiServiceClient {
    async fn chat(&self, context: &[Message], message: &str) -> Result<String> {
        let request = ChatRequest { context, message };
        let payload = self.post_json("/chat", &serde_json::to_value(&request)?).await?;
        Self::string_field(&payload, "answer")
    }

    async fn web_search(&self, query: &str) -> Result<String> {
        let payload = self.post_json("/search", &json!({ "query": query })).await?;
        Self::string_field(&payload, "answer")
    }

    async fn document_answer(&self, document_id: &str, question: &str) -> Result<String> {
        let payload = self
            .post_json(
                "/documents/answer",
                &json!({ "document_id": document_id, "question": question }),
            )
            .await?;
        Self::string_field(&payload, "answer")
    }

    async fn stock_research(&self, query: &str) -> Result<String> {
        let payload = self
            .post_json("/stocks/research", &json!({ "query": query }))
            .await?;
        Self::string_field(&payload, "report")
    }

    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        let payload = self
            .post_json(
                "/speech/transcriptions",
                &json!({
                    "audio_base64": BASE64.encode(audio),
                    "mime_type": mime_type,
                }),
            )
            .await?;
        Self::string_field(&payload, "text")
    }

    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        let payload = self
            .post_json("/images/text", &json!({ "image_base64": BASE64.encode(image) }))
            .await?;
        Self::string_field(&payload, "text")
    }
}

#[async_trait::async_trait]
impl WorkflowBackend for AiServiceClient {
    async fn start(&self, query: &str) -> Result<TaskStart> {
        info!("Starting workflow via AI service");

        let payload = self
            .post_json("/workflow/start", &json!({ "query": query }))
            .await?;
        let parsed: WorkflowStartResponse = serde_json::from_value(payload)?;

        match parsed.status.as_str() {
            "complete" => Ok(TaskStart::Complete {
                result: parsed.result.unwrap_or_default(),
            }),
            "awaiting_input" => {
                let raw = parsed.checkpoint_id.ok_or_else(|| {
                    OrchestratorError::Upstream(
                        "workflow start paused without a checkpoint id".to_string(),
                    )
                })?;
                Ok(TaskStart::Paused {
                    checkpoint: CheckpointId::parse(&raw)?,
                    partial: parsed.partial.unwrap_or(Value::Null),
                })
            }
            other => Err(OrchestratorError::Upstream(format!(
                "unexpected workflow start status: {}",
                other
            ))),
        }
    }

    async fn resume(&self, checkpoint: &CheckpointId, preferences: &Value) -> Result<String> {
        let url = format!("{}/workflow/resume", self.base_url);
        let body = json!({
            "checkpoint_id": checkpoint.as_str(),
            "preferences": preferences,
        });

        let response = self.client.post(url).json(&body).send().await.map_err(|e| {
            error!("Workflow resume request failed: {}", e);
            OrchestratorError::Transport(e)
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(OrchestratorError::ResumeNotFound(checkpoint.to_string()));
        }

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Upstream(format!(
                "AI service returned {} for workflow resume: {}",
                status, error_text
            )));
        }

        let parsed: WorkflowResumeResponse = response.json().await?;
        match parsed.status.as_str() {
            "complete" => Ok(parsed.result.unwrap_or_default()),
            "failed" => Err(OrchestratorError::WorkflowFailed(
                parsed.reason.unwrap_or_else(|| "no reason reported".to_string()),
            )),
            other => Err(OrchestratorError::Upstream(format!(
                "unexpected workflow resume status: {}",
                other
            ))),
        }
    }
}

/// Offline task service. Deterministic canned responses so the demo binary
/// and tests run without the external service.
pub struct MockTaskService;

#[async_trait::async_trait]
impl TaskService for MockTaskService {
    async fn chat(&self, context: &[Message], message: &str) -> Result<String> {
        if context.is_empty() {
            Ok(format!("Here is my answer to \"{}\".", message))
        } else {
            Ok(format!(
                "Considering {} earlier messages, here is my answer to \"{}\".",
                context.len(),
                message
            ))
        }
    }

    async fn web_search(&self, query: &str) -> Result<String> {
        Ok(format!("Top findings for \"{}\": three relevant sources summarized.", query))
    }

    async fn document_answer(&self, document_id: &str, question: &str) -> Result<String> {
        Ok(format!(
            "Based on document {}, the answer to \"{}\" is in section 2.",
            document_id, question
        ))
    }

    async fn stock_research(&self, query: &str) -> Result<String> {
        Ok(format!(
            "## Research report: {}\n\n- Sector is consolidating\n- Sentiment is neutral\n- Suggested stance: hold",
            query
        ))
    }

    async fn transcribe(&self, audio: &[u8], _mime_type: &str) -> Result<String> {
        Ok(format!("[transcript of {} audio bytes]", audio.len()))
    }

    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        Ok(format!("[text extracted from {} image bytes]", image.len()))
    }
}
