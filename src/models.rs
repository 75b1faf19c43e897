//! Core data models for conversation threads and workflow checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Namespace prefix for workflow checkpoint identifiers. Keeps the checkpoint
/// id space disjoint from canonical thread ids (plain UUIDs), so a swapped id
/// fails parsing instead of resolving against the wrong record.
pub const CHECKPOINT_PREFIX: &str = "wf-";

const TITLE_MAX_CHARS: usize = 60;

//
// ================= Identifiers =================
//

/// Canonical conversation-thread identifier assigned by the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ThreadId(Uuid);

impl ThreadId {
    pub fn generate() -> Self {
        ThreadId(Uuid::new_v4())
    }

    /// Strict parse: accepts only the canonical UUID shape. A checkpoint id in
    /// this slot is rejected with a validation error rather than treated as a
    /// provisional id.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with(CHECKPOINT_PREFIX) {
            return Err(OrchestratorError::Validation(format!(
                "'{}' is a workflow checkpoint id, expected a conversation thread id",
                trimmed
            )));
        }
        Uuid::parse_str(trimmed).map(ThreadId).map_err(|_| {
            OrchestratorError::Validation(format!(
                "'{}' is not a canonical conversation thread id",
                trimmed
            ))
        })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ThreadId {
    fn from(id: Uuid) -> Self {
        ThreadId(id)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow checkpoint identifier, `wf-` followed by an opaque token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub fn generate() -> Self {
        CheckpointId(format!("{}{}", CHECKPOINT_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if Uuid::parse_str(trimmed).is_ok() {
            return Err(OrchestratorError::Validation(format!(
                "'{}' is a conversation thread id, expected a workflow checkpoint id",
                trimmed
            )));
        }
        if !trimmed.starts_with(CHECKPOINT_PREFIX) || trimmed.len() == CHECKPOINT_PREFIX.len() {
            return Err(OrchestratorError::Validation(format!(
                "'{}' is not a workflow checkpoint id",
                trimmed
            )));
        }
        Ok(CheckpointId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a caller-supplied thread reference. Anything that is not
/// canonical (and not a misplaced checkpoint id) counts as "not yet persisted"
/// and gets a fresh store-assigned id on first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRef {
    Canonical(ThreadId),
    Unpersisted,
}

impl ThreadRef {
    pub fn resolve(raw: Option<&str>) -> Result<ThreadRef> {
        let Some(raw) = raw else {
            return Ok(ThreadRef::Unpersisted);
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(ThreadRef::Unpersisted);
        }
        if trimmed.starts_with(CHECKPOINT_PREFIX) {
            return Err(OrchestratorError::Validation(format!(
                "'{}' is a workflow checkpoint id, expected a conversation thread id",
                trimmed
            )));
        }
        match Uuid::parse_str(trimmed) {
            Ok(id) => Ok(ThreadRef::Canonical(ThreadId(id))),
            Err(_) => Ok(ThreadRef::Unpersisted),
        }
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

//
// ================= Threads =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// One window of a thread's message log, newest-first paginated: page 1 holds
/// the most recent `limit` messages, in their original order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub total_messages: usize,
    pub page: u32,
}

//
// ================= Workflow =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Researching,
    AwaitingInput,
    Finalizing,
    Complete,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Complete | WorkflowStatus::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Researching => "researching",
            WorkflowStatus::AwaitingInput => "awaiting_input",
            WorkflowStatus::Finalizing => "finalizing",
            WorkflowStatus::Complete => "complete",
            WorkflowStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Helpers =================
//

/// Provisional thread title derived from the first user message.
pub fn derive_title(query: &str) -> String {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "New conversation".to_string();
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", truncated.trim_end())
}
