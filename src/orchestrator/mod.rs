//! Client-side request orchestration
//!
//! Drives every user submission through one armed execution mode and a
//! strict request lifecycle: idle, submitting (input preprocessing), in
//! flight (awaiting the gateway), then back to idle with a recorded outcome.
//! Submitting while a request is in flight cancels the in-flight request
//! rather than queueing behind it, and a cancelled request's response is
//! discarded even if it arrives later.

pub mod progress;

use crate::ai::TaskService;
use crate::chat::{ChatReply, ChatService};
use crate::error::Result;
use crate::models::{CheckpointId, MessageRole, ThreadId};
use crate::workflow::{interim_summary, ResumeResult, StartResult, WorkflowCorrelator};
use async_trait::async_trait;
use progress::{
    spawn_ticker, ProgressSimulator, StageSnapshot, STOCK_RESEARCH_STAGES, TRIP_PLANNING_STAGES,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};

//
// ================= Gateway =================
//

/// Everything the client can ask of the service side, behind one seam so
/// tests can script it.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn chat(&self, thread_ref: Option<&str>, message: &str) -> Result<ChatReply>;
    async fn web_search(&self, query: &str) -> Result<String>;
    async fn document_answer(&self, document_id: &str, question: &str) -> Result<String>;
    async fn stock_research(&self, query: &str) -> Result<String>;
    async fn workflow_start(&self, thread_ref: Option<&str>, query: &str) -> Result<StartResult>;
    async fn workflow_resume(
        &self,
        checkpoint: &str,
        thread: &str,
        preferences: &Value,
    ) -> Result<ResumeResult>;
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String>;
    async fn extract_text(&self, image: &[u8]) -> Result<String>;
}

/// Gateway wired to the in-process services.
pub struct ServiceGateway {
    chat: Arc<ChatService>,
    tasks: Arc<dyn TaskService>,
    workflows: Arc<WorkflowCorrelator>,
}

impl ServiceGateway {
    pub fn new(
        chat: Arc<ChatService>,
        tasks: Arc<dyn TaskService>,
        workflows: Arc<WorkflowCorrelator>,
    ) -> Self {
        Self {
            chat,
            tasks,
            workflows,
        }
    }
}

#[async_trait]
impl Gateway for ServiceGateway {
    async fn chat(&self, thread_ref: Option<&str>, message: &str) -> Result<ChatReply> {
        self.chat.exchange(thread_ref, message).await
    }

    async fn web_search(&self, query: &str) -> Result<String> {
        self.tasks.web_search(query).await
    }

    async fn document_answer(&self, document_id: &str, question: &str) -> Result<String> {
        self.tasks.document_answer(document_id, question).await
    }

    async fn stock_research(&self, query: &str) -> Result<String> {
        self.tasks.stock_research(query).await
    }

    async fn workflow_start(&self, thread_ref: Option<&str>, query: &str) -> Result<StartResult> {
        self.workflows.start(thread_ref, query).await
    }

    async fn workflow_resume(
        &self,
        checkpoint: &str,
        thread: &str,
        preferences: &Value,
    ) -> Result<ResumeResult> {
        self.workflows.resume(checkpoint, thread, preferences).await
    }

    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        self.tasks.transcribe(audio, mime_type).await
    }

    async fn extract_text(&self, image: &[u8]) -> Result<String> {
        self.tasks.extract_text(image).await
    }
}

//
// ================= Modes and Lifecycle =================
//

/// The single armed execution mode. Arming a new one replaces the previous
/// one; two modes are never active at once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    Chat,
    WebSearch,
    DocumentQa { document_id: String },
    StockResearch,
    TripPlanning,
}

impl ExecutionMode {
    fn stages(&self) -> Option<&'static [&'static str]> {
        match self {
            ExecutionMode::StockResearch => Some(&STOCK_RESEARCH_STAGES),
            ExecutionMode::TripPlanning => Some(&TRIP_PLANNING_STAGES),
            _ => None,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Chat
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Chat => "chat",
            ExecutionMode::WebSearch => "web_search",
            ExecutionMode::DocumentQa { .. } => "document_qa",
            ExecutionMode::StockResearch => "stock_research",
            ExecutionMode::TripPlanning => "trip_planning",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Idle,
    Submitting,
    InFlight,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular conversation content.
    Normal,
    /// A failed request, rendered distinctly.
    Error,
    /// Interim summary shown while a workflow waits for input.
    Interim,
    /// Short lifecycle notice, such as a cancellation.
    Notice,
}

/// One line of the client-side transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: MessageRole,
    pub content: String,
    pub kind: EntryKind,
}

/// One user submission. Voice and image inputs are converted to text during
/// the submitting phase, before dispatch.
#[derive(Debug, Clone)]
pub enum UserInput {
    Text(String),
    Voice { audio: Vec<u8>, mime_type: String },
    Image { image: Vec<u8>, caption: String },
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Tick interval of the simulated progress display.
    pub progress_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(900),
        }
    }
}

//
// ================= Orchestrator =================
//

struct PendingResume {
    checkpoint: CheckpointId,
    thread: ThreadId,
}

struct InFlight {
    abort: AbortHandle,
    ticker: Option<AbortHandle>,
}

struct Inner {
    mode: ExecutionMode,
    phase: RequestPhase,
    last_outcome: Option<RequestOutcome>,
    transcript: Vec<TranscriptEntry>,
    thread_ref: Option<String>,
    pending: Option<PendingResume>,
    progress: Option<Arc<Mutex<ProgressSimulator>>>,
    in_flight: Option<InFlight>,
    // Bumped on every submit and cancel. A request may only land its
    // response while its own generation is still current.
    generation: u64,
}

pub struct RequestOrchestrator {
    gateway: Arc<dyn Gateway>,
    config: OrchestratorConfig,
    inner: Arc<Mutex<Inner>>,
}

impl RequestOrchestrator {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self::with_config(gateway, OrchestratorConfig::default())
    }

    pub fn with_config(gateway: Arc<dyn Gateway>, config: OrchestratorConfig) -> Self {
        Self {
            gateway,
            config,
            inner: Arc::new(Mutex::new(Inner {
                mode: ExecutionMode::default(),
                phase: RequestPhase::Idle,
                last_outcome: None,
                transcript: Vec::new(),
                thread_ref: None,
                pending: None,
                progress: None,
                in_flight: None,
                generation: 0,
            })),
        }
    }

    pub async fn mode(&self) -> ExecutionMode {
        self.inner.lock().await.mode.clone()
    }

    /// Arms `mode`, replacing whichever mode was armed before. A pending
    /// workflow correlation belongs to the mode that created it and is
    /// dropped when the armed mode changes.
    pub async fn set_mode(&self, mode: ExecutionMode) {
        let mut inner = self.inner.lock().await;
        if inner.mode != mode {
            if inner.pending.take().is_some() {
                info!(mode = %mode, "Armed mode changed, dropped pending workflow correlation");
            }
            inner.mode = mode;
        }
    }

    pub async fn phase(&self) -> RequestPhase {
        self.inner.lock().await.phase
    }

    pub async fn last_outcome(&self) -> Option<RequestOutcome> {
        self.inner.lock().await.last_outcome
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.inner.lock().await.transcript.clone()
    }

    pub async fn has_pending_resume(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    /// Canonical id of the server-side thread this conversation writes to,
    /// once one is known.
    pub async fn active_thread(&self) -> Option<String> {
        self.inner.lock().await.thread_ref.clone()
    }

    /// Points the client at an existing conversation thread.
    pub async fn open_thread(&self, thread_id: &ThreadId) {
        let mut inner = self.inner.lock().await;
        inner.thread_ref = Some(thread_id.to_string());
    }

    /// Clears client-side conversation state. Server-side history is
    /// untouched.
    pub async fn reset_conversation(&self) {
        let mut inner = self.inner.lock().await;
        inner.thread_ref = None;
        inner.pending = None;
        inner.transcript.clear();
    }

    /// Stage display of the current (or latest) request in a staged mode.
    pub async fn progress(&self) -> Option<Vec<StageSnapshot>> {
        let progress = self.inner.lock().await.progress.clone();
        match progress {
            Some(sim) => Some(sim.lock().await.snapshot()),
            None => None,
        }
    }

    /// Cancels the in-flight request, if any. Its response is discarded even
    /// if it arrives later.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        cancel_in_flight(&mut inner).await;
    }

    /// Submits one user input under the armed mode and returns a handle the
    /// caller may await. While a request is in flight a submission acts as a
    /// cancel gesture instead: the outstanding request is aborted, nothing
    /// new is started from the same action, and `None` is returned.
    pub async fn submit(&self, input: UserInput) -> Option<JoinHandle<()>> {
        let mut inner = self.inner.lock().await;

        if inner.in_flight.is_some() {
            cancel_in_flight(&mut inner).await;
            return None;
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.phase = RequestPhase::Submitting;

        // Typed text is echoed into the visible history right away. Voice
        // and image inputs are echoed once preprocessing has turned them
        // into text.
        if let UserInput::Text(text) = &input {
            inner.transcript.push(TranscriptEntry {
                role: MessageRole::User,
                content: text.clone(),
                kind: EntryKind::Normal,
            });
        }

        let mode = inner.mode.clone();
        let thread_ref = inner.thread_ref.clone();
        let pending = if matches!(mode, ExecutionMode::TripPlanning) {
            inner.pending.take()
        } else {
            None
        };

        // Fresh stage display per staged request; none for instant modes.
        let progress = mode
            .stages()
            .map(|stages| Arc::new(Mutex::new(ProgressSimulator::new(stages))));
        inner.progress = progress.clone();
        let ticker = progress
            .as_ref()
            .map(|sim| spawn_ticker(sim.clone(), self.config.progress_interval).abort_handle());

        let task = tokio::spawn(run_request(
            self.gateway.clone(),
            self.inner.clone(),
            generation,
            mode,
            thread_ref,
            pending,
            input,
        ));
        inner.in_flight = Some(InFlight {
            abort: task.abort_handle(),
            ticker,
        });
        Some(task)
    }
}

/// Aborts the outstanding request and records the cancellation. The aborted
/// request's generation is retired so a response already on the wire can
/// never land.
async fn cancel_in_flight(inner: &mut Inner) {
    if let Some(in_flight) = inner.in_flight.take() {
        inner.generation += 1;
        in_flight.abort.abort();
        if let Some(ticker) = in_flight.ticker {
            ticker.abort();
        }
        if let Some(progress) = &inner.progress {
            progress.lock().await.halt();
        }
        inner.phase = RequestPhase::Idle;
        inner.last_outcome = Some(RequestOutcome::Cancelled);
        inner.transcript.push(TranscriptEntry {
            role: MessageRole::Assistant,
            content: "Request cancelled.".to_string(),
            kind: EntryKind::Notice,
        });
        info!("Cancelled in-flight request");
    }
}

//
// ================= Request Execution =================
//

enum Landing {
    Answer {
        text: String,
        thread: Option<ThreadId>,
    },
    Awaiting {
        checkpoint: CheckpointId,
        thread: ThreadId,
        summary: String,
    },
}

async fn run_request(
    gateway: Arc<dyn Gateway>,
    shared: Arc<Mutex<Inner>>,
    generation: u64,
    mode: ExecutionMode,
    thread_ref: Option<String>,
    pending: Option<PendingResume>,
    input: UserInput,
) {
    let was_text = matches!(input, UserInput::Text(_));
    let message = match prepare_input(gateway.as_ref(), input).await {
        Ok(message) => message,
        Err(error) => {
            let mut inner = shared.lock().await;
            if inner.generation != generation {
                return;
            }
            finish(&mut inner, RequestOutcome::Failed).await;
            inner.transcript.push(TranscriptEntry {
                role: MessageRole::Assistant,
                content: error.to_string(),
                kind: EntryKind::Error,
            });
            warn!(mode = %mode, "Input preprocessing failed: {}", error);
            return;
        }
    };

    {
        let mut inner = shared.lock().await;
        if inner.generation != generation {
            return;
        }
        if !was_text {
            inner.transcript.push(TranscriptEntry {
                role: MessageRole::User,
                content: message.clone(),
                kind: EntryKind::Normal,
            });
        }
        inner.phase = RequestPhase::InFlight;
    }

    let landing = dispatch(
        gateway.as_ref(),
        &mode,
        thread_ref.as_deref(),
        pending,
        &message,
    )
    .await;

    let mut inner = shared.lock().await;
    if inner.generation != generation {
        // Cancelled while the response was on the wire. Do not land it.
        return;
    }
    match landing {
        Ok(Landing::Answer { text, thread }) => {
            finish(&mut inner, RequestOutcome::Succeeded).await;
            if let Some(thread) = thread {
                inner.thread_ref = Some(thread.to_string());
            }
            inner.transcript.push(TranscriptEntry {
                role: MessageRole::Assistant,
                content: text,
                kind: EntryKind::Normal,
            });
        }
        Ok(Landing::Awaiting {
            checkpoint,
            thread,
            summary,
        }) => {
            finish(&mut inner, RequestOutcome::Succeeded).await;
            inner.thread_ref = Some(thread.to_string());
            inner.pending = Some(PendingResume { checkpoint, thread });
            inner.transcript.push(TranscriptEntry {
                role: MessageRole::Assistant,
                content: summary,
                kind: EntryKind::Interim,
            });
        }
        Err(error) => {
            finish(&mut inner, RequestOutcome::Failed).await;
            inner.transcript.push(TranscriptEntry {
                role: MessageRole::Assistant,
                content: error.to_string(),
                kind: EntryKind::Error,
            });
            warn!(mode = %mode, "Request failed: {}", error);
        }
    }
}

/// Settles the lifecycle bookkeeping: stops the timer, reconciles the stage
/// display, and returns the orchestrator to idle.
async fn finish(inner: &mut Inner, outcome: RequestOutcome) {
    if let Some(in_flight) = inner.in_flight.take() {
        if let Some(ticker) = in_flight.ticker {
            ticker.abort();
        }
    }
    if let Some(progress) = &inner.progress {
        let mut sim = progress.lock().await;
        match outcome {
            RequestOutcome::Succeeded => sim.complete_all(),
            _ => sim.halt(),
        }
    }
    inner.phase = RequestPhase::Idle;
    inner.last_outcome = Some(outcome);
}

async fn prepare_input(gateway: &dyn Gateway, input: UserInput) -> Result<String> {
    match input {
        UserInput::Text(text) => Ok(text),
        UserInput::Voice { audio, mime_type } => gateway.transcribe(&audio, &mime_type).await,
        UserInput::Image { image, caption } => {
            let extracted = gateway.extract_text(&image).await?;
            if caption.trim().is_empty() {
                Ok(extracted)
            } else {
                Ok(format!("{}\n\n{}", caption.trim(), extracted))
            }
        }
    }
}

async fn dispatch(
    gateway: &dyn Gateway,
    mode: &ExecutionMode,
    thread_ref: Option<&str>,
    pending: Option<PendingResume>,
    message: &str,
) -> Result<Landing> {
    match mode {
        ExecutionMode::Chat => {
            let reply = gateway.chat(thread_ref, message).await?;
            Ok(Landing::Answer {
                text: reply.answer,
                thread: Some(reply.thread_id),
            })
        }
        ExecutionMode::WebSearch => Ok(Landing::Answer {
            text: gateway.web_search(message).await?,
            thread: None,
        }),
        ExecutionMode::DocumentQa { document_id } => Ok(Landing::Answer {
            text: gateway.document_answer(document_id, message).await?,
            thread: None,
        }),
        ExecutionMode::StockResearch => Ok(Landing::Answer {
            text: gateway.stock_research(message).await?,
            thread: None,
        }),
        ExecutionMode::TripPlanning => match pending {
            Some(resume) => {
                let preferences = wrap_preferences(message);
                let outcome = gateway
                    .workflow_resume(
                        resume.checkpoint.as_str(),
                        &resume.thread.to_string(),
                        &preferences,
                    )
                    .await?;
                Ok(Landing::Answer {
                    text: outcome.result,
                    thread: Some(resume.thread),
                })
            }
            None => match gateway.workflow_start(thread_ref, message).await? {
                StartResult::Complete {
                    conversation_thread_id,
                    result,
                } => Ok(Landing::Answer {
                    text: result,
                    thread: Some(conversation_thread_id),
                }),
                StartResult::AwaitingInput {
                    checkpoint_id,
                    conversation_thread_id,
                    partial,
                } => Ok(Landing::Awaiting {
                    checkpoint: checkpoint_id,
                    thread: conversation_thread_id,
                    summary: interim_summary(&partial),
                }),
            },
        },
    }
}

/// Free text typed at a waiting workflow becomes the preferences object. A
/// payload that already parses as a JSON object is passed through as-is.
fn wrap_preferences(message: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(message) {
        if value.is_object() {
            return value;
        }
    }
    json!({ "preferences": message })
}
