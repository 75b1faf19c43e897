//! REST API server for the assistant orchestrator
//!
//! Exposes thread persistence, chat, and the pause/resume workflow surface
//! via HTTP endpoints. Integrates with frontend UI.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::chat::ChatService;
use crate::error::OrchestratorError;
use crate::jobs::JobQueueClient;
use crate::models::ThreadId;
use crate::store::ThreadStore;
use crate::workflow::WorkflowCorrelator;

const DEFAULT_PAGE_SIZE: u32 = 20;

/// =============================
/// Request Models
/// =============================

// Required fields are declared optional so a missing one surfaces as a
// validation error in the response envelope instead of a rejected body.

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub thread_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowStartRequest {
    pub thread_id: Option<String>,
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowResumeRequest {
    pub checkpoint_id: Option<String>,
    pub thread_id: Option<String>,
    pub preferences: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentUploadRequest {
    pub filename: Option<String>,
    pub content_base64: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ThreadStore>,
    pub chat: Arc<ChatService>,
    pub workflows: Arc<WorkflowCorrelator>,
    pub jobs: Option<Arc<JobQueueClient>>,
}

/// =============================
/// Error Mapping
/// =============================

fn error_response(error: OrchestratorError) -> (StatusCode, Json<ApiResponse>) {
    let status = match &error {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) | OrchestratorError::ResumeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        OrchestratorError::WorkflowFailed(_)
        | OrchestratorError::Upstream(_)
        | OrchestratorError::Transport(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::Persistence(_) | OrchestratorError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Thread Endpoints
/// =============================

async fn list_threads(State(state): State<ApiState>) -> (StatusCode, Json<ApiResponse>) {
    match state.store.list().await {
        Ok(threads) => (StatusCode::OK, Json(ApiResponse::success(threads))),
        Err(e) => error_response(e),
    }
}

async fn thread_messages(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<PageQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let thread_id = match ThreadId::parse(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    match state.store.page(&thread_id, page, limit).await {
        Ok(messages) => (StatusCode::OK, Json(ApiResponse::success(messages))),
        Err(e) => error_response(e),
    }
}

async fn rename_thread(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let thread_id = match ThreadId::parse(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let title = req.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return error_response(OrchestratorError::Validation(
            "title must not be empty".to_string(),
        ));
    }

    match state.store.rename(&thread_id, title).await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => error_response(e),
    }
}

async fn delete_thread(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let thread_id = match ThreadId::parse(&id) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.store.delete(&thread_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "deleted": true }))),
        ),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received chat request");

    let Some(message) = req.message else {
        return error_response(OrchestratorError::Validation(
            "message is required".to_string(),
        ));
    };

    match state
        .chat
        .exchange(req.thread_id.as_deref(), &message)
        .await
    {
        Ok(reply) => (StatusCode::OK, Json(ApiResponse::success(reply))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Workflow Endpoints
/// =============================

async fn workflow_start_handler(
    State(state): State<ApiState>,
    Json(req): Json<WorkflowStartRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received workflow start request");

    let Some(query) = req.query else {
        return error_response(OrchestratorError::Validation(
            "query is required".to_string(),
        ));
    };

    match state
        .workflows
        .start(req.thread_id.as_deref(), &query)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) => error_response(e),
    }
}

async fn workflow_resume_handler(
    State(state): State<ApiState>,
    Json(req): Json<WorkflowResumeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!("Received workflow resume request");

    let Some(checkpoint_id) = req.checkpoint_id else {
        return error_response(OrchestratorError::Validation(
            "checkpoint_id is required".to_string(),
        ));
    };
    let Some(thread_id) = req.thread_id else {
        return error_response(OrchestratorError::Validation(
            "thread_id is required".to_string(),
        ));
    };
    let Some(preferences) = req.preferences else {
        return error_response(OrchestratorError::Validation(
            "preferences is required".to_string(),
        ));
    };

    match state
        .workflows
        .resume(&checkpoint_id, &thread_id, &preferences)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Document Ingestion Endpoints
/// =============================

async fn upload_document(
    State(state): State<ApiState>,
    Json(req): Json<DocumentUploadRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(jobs) = &state.jobs else {
        return error_response(OrchestratorError::Validation(
            "document ingestion is not configured".to_string(),
        ));
    };

    let filename = req
        .filename
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if filename.is_empty() {
        return error_response(OrchestratorError::Validation(
            "filename must not be empty".to_string(),
        ));
    }
    let Some(content_base64) = req.content_base64 else {
        return error_response(OrchestratorError::Validation(
            "content_base64 is required".to_string(),
        ));
    };
    let bytes = match BASE64.decode(content_base64.as_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(OrchestratorError::Validation(
                "content_base64 is not valid base64".to_string(),
            ))
        }
    };

    match jobs.enqueue_document(&filename, &bytes).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(serde_json::json!({ "job_id": job_id }))),
        ),
        Err(e) => error_response(e),
    }
}

async fn job_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(jobs) = &state.jobs else {
        return error_response(OrchestratorError::Validation(
            "document ingestion is not configured".to_string(),
        ));
    };

    match jobs.fetch(&id).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/threads", get(list_threads))
        .route("/api/threads/:id", patch(rename_thread).delete(delete_thread))
        .route("/api/threads/:id/messages", get(thread_messages))
        .route("/api/chat", post(chat_handler))
        .route("/api/workflow/start", post(workflow_start_handler))
        .route("/api/workflow/resume", post(workflow_resume_handler))
        .route("/api/documents", post(upload_document))
        .route("/api/jobs/:id", get(job_status))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
