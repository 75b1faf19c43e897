//! Human-in-the-loop workflow correlation
//!
//! Long-running workflows pause when they need user preferences. This module
//! correlates the pause (a checkpoint id) with the conversation thread that
//! launched the run, so a later resume lands the final answer in the right
//! history. Once the engine has produced output, history writes are
//! best-effort: an engine result is never discarded because a write failed.

use crate::error::{OrchestratorError, Result};
use crate::models::{derive_title, CheckpointId, Message, ThreadId, ThreadRef, WorkflowStatus};
use crate::store::ThreadStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

//
// ================= Backend Contract =================
//

/// Outcome of launching a workflow run.
#[derive(Debug, Clone)]
pub enum TaskStart {
    /// The run finished without needing user input.
    Complete { result: String },
    /// The run paused at a checkpoint and waits for user preferences.
    Paused {
        checkpoint: CheckpointId,
        partial: Value,
    },
}

/// Engine that executes pause-capable workflow runs.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    async fn start(&self, query: &str) -> Result<TaskStart>;

    /// Resumes a paused run. Returns `ResumeNotFound` when the checkpoint is
    /// unknown or already consumed, `WorkflowFailed` when the engine reports
    /// a failed run.
    async fn resume(&self, checkpoint: &CheckpointId, preferences: &Value) -> Result<String>;
}

//
// ================= Results =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartResult {
    AwaitingInput {
        checkpoint_id: CheckpointId,
        conversation_thread_id: ThreadId,
        partial: Value,
    },
    Complete {
        conversation_thread_id: ThreadId,
        result: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeResult {
    pub status: WorkflowStatus,
    pub result: String,
}

//
// ================= Correlator =================
//

/// Pairs workflow checkpoints with conversation threads across the pause.
pub struct WorkflowCorrelator {
    store: Arc<dyn ThreadStore>,
    backend: Arc<dyn WorkflowBackend>,
}

impl WorkflowCorrelator {
    pub fn new(store: Arc<dyn ThreadStore>, backend: Arc<dyn WorkflowBackend>) -> Self {
        Self { store, backend }
    }

    /// Launches a run. The launching query must be recorded before dispatch;
    /// appends after the engine has produced output are best-effort.
    pub async fn start(&self, thread_ref: Option<&str>, query: &str) -> Result<StartResult> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(OrchestratorError::Validation(
                "workflow query must not be empty".to_string(),
            ));
        }

        let thread = self
            .store
            .create_or_get(thread_ref, &derive_title(trimmed))
            .await?;
        self.store
            .append(&thread.id, Message::user(trimmed))
            .await?;

        match self.backend.start(trimmed).await? {
            TaskStart::Complete { result } => {
                info!(thread_id = %thread.id, "Workflow completed without pausing");
                self.append_best_effort(&thread.id, &result, "final answer")
                    .await;
                Ok(StartResult::Complete {
                    conversation_thread_id: thread.id,
                    result,
                })
            }
            TaskStart::Paused { checkpoint, partial } => {
                info!(
                    thread_id = %thread.id,
                    checkpoint_id = %checkpoint,
                    "Workflow paused for user input"
                );
                let summary = interim_summary(&partial);
                self.append_best_effort(&thread.id, &summary, "interim summary")
                    .await;
                Ok(StartResult::AwaitingInput {
                    checkpoint_id: checkpoint,
                    conversation_thread_id: thread.id,
                    partial,
                })
            }
        }
    }

    /// Resumes a paused run with the user's preferences and lands the final
    /// answer in the originating thread. Both identifiers are shape-checked
    /// before the engine is touched, so a swapped pair cannot consume a
    /// checkpoint.
    pub async fn resume(
        &self,
        checkpoint_ref: &str,
        thread_ref: &str,
        preferences: &Value,
    ) -> Result<ResumeResult> {
        let checkpoint = CheckpointId::parse(checkpoint_ref)?;
        let thread = ThreadRef::resolve(Some(thread_ref))?;
        if !preferences.is_object() {
            return Err(OrchestratorError::Validation(
                "preferences must be a JSON object".to_string(),
            ));
        }

        let result = self.backend.resume(&checkpoint, preferences).await?;

        match thread {
            ThreadRef::Canonical(id) => {
                self.append_best_effort(&id, &result, "final answer").await;
            }
            ThreadRef::Unpersisted => {
                warn!(
                    checkpoint_id = %checkpoint,
                    "Resume carried an unpersisted thread reference, final answer not recorded"
                );
            }
        }

        Ok(ResumeResult {
            status: WorkflowStatus::Complete,
            result,
        })
    }

    async fn append_best_effort(&self, id: &ThreadId, content: &str, label: &str) {
        if let Err(error) = self.store.append(id, Message::assistant(content)).await {
            warn!(
                thread_id = %id,
                "Recording {} failed, continuing: {}",
                label,
                error
            );
        }
    }
}

/// Interim assistant message shown while a run waits for input. Pulls the
/// engine's own summary and clarifying questions out of the partial payload
/// when they are present.
pub fn interim_summary(partial: &Value) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(summary) = partial.get("summary").and_then(Value::as_str) {
        lines.push(summary.to_string());
    }
    if let Some(questions) = partial.get("questions").and_then(Value::as_array) {
        for question in questions.iter().filter_map(Value::as_str) {
            lines.push(format!("- {}", question));
        }
    }
    if lines.is_empty() {
        "I need a few preferences from you before I can finish this plan.".to_string()
    } else {
        lines.join("\n")
    }
}

//
// ================= Scripted Backend =================
//

/// Deterministic in-process backend for local runs and tests. Every run
/// pauses once for preferences, and each checkpoint can be consumed exactly
/// once.
pub struct ScriptedWorkflowBackend {
    pending: Arc<RwLock<HashMap<CheckpointId, String>>>,
}

impl ScriptedWorkflowBackend {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for ScriptedWorkflowBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowBackend for ScriptedWorkflowBackend {
    async fn start(&self, query: &str) -> Result<TaskStart> {
        let checkpoint = CheckpointId::generate();
        self.pending
            .write()
            .await
            .insert(checkpoint.clone(), query.to_string());
        let partial = serde_json::json!({
            "summary": format!("Drafted an outline for: {}", query),
            "questions": [
                "What is your budget?",
                "Which dates are you considering?",
            ],
        });
        Ok(TaskStart::Paused { checkpoint, partial })
    }

    async fn resume(&self, checkpoint: &CheckpointId, preferences: &Value) -> Result<String> {
        let Some(query) = self.pending.write().await.remove(checkpoint) else {
            return Err(OrchestratorError::ResumeNotFound(checkpoint.to_string()));
        };
        Ok(format!(
            "Here is the finished plan for \"{}\", tailored to your preferences: {}",
            query, preferences
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;
    use crate::store::InMemoryThreadStore;
    use serde_json::json;

    fn correlator() -> (Arc<dyn ThreadStore>, WorkflowCorrelator) {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let correlator =
            WorkflowCorrelator::new(store.clone(), Arc::new(ScriptedWorkflowBackend::new()));
        (store, correlator)
    }

    #[tokio::test]
    async fn test_round_trip_pause_and_resume() {
        let (store, correlator) = correlator();

        let started = correlator
            .start(None, "Plan a solo trip from Delhi to Goa")
            .await
            .unwrap();
        let StartResult::AwaitingInput {
            checkpoint_id,
            conversation_thread_id,
            partial,
        } = started
        else {
            panic!("scripted backend should pause");
        };
        assert!(partial["summary"]
            .as_str()
            .unwrap()
            .contains("Delhi to Goa"));

        // Query and interim summary are in the log while the run is paused.
        let paused = store.page(&conversation_thread_id, 1, 10).await.unwrap();
        assert_eq!(paused.messages.len(), 2);
        assert_eq!(paused.messages[0].role, MessageRole::User);
        assert!(paused.messages[1].content.contains("What is your budget?"));

        let resumed = correlator
            .resume(
                checkpoint_id.as_str(),
                &conversation_thread_id.to_string(),
                &json!({"budget": "moderate", "days": 4}),
            )
            .await
            .unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Complete);
        assert!(resumed.result.contains("Delhi to Goa"));

        let finished = store.page(&conversation_thread_id, 1, 10).await.unwrap();
        assert_eq!(finished.messages.len(), 3);
        assert_eq!(finished.messages[2].content, resumed.result);
    }

    #[tokio::test]
    async fn test_unknown_checkpoint_leaves_history_untouched() {
        let (store, correlator) = correlator();

        let started = correlator.start(None, "weekend in Jaipur").await.unwrap();
        let StartResult::AwaitingInput {
            conversation_thread_id,
            ..
        } = started
        else {
            panic!("scripted backend should pause");
        };

        let fabricated = CheckpointId::generate();
        let result = correlator
            .resume(
                fabricated.as_str(),
                &conversation_thread_id.to_string(),
                &json!({}),
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::ResumeNotFound(_))));

        let log = store.page(&conversation_thread_id, 1, 10).await.unwrap();
        assert_eq!(log.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_is_consumed_by_successful_resume() {
        let (_store, correlator) = correlator();

        let started = correlator.start(None, "hiking trip").await.unwrap();
        let StartResult::AwaitingInput {
            checkpoint_id,
            conversation_thread_id,
            ..
        } = started
        else {
            panic!("scripted backend should pause");
        };

        let thread = conversation_thread_id.to_string();
        correlator
            .resume(checkpoint_id.as_str(), &thread, &json!({"pace": "easy"}))
            .await
            .unwrap();

        let second = correlator
            .resume(checkpoint_id.as_str(), &thread, &json!({"pace": "easy"}))
            .await;
        assert!(matches!(second, Err(OrchestratorError::ResumeNotFound(_))));
    }

    #[tokio::test]
    async fn test_resume_rejects_swapped_identifiers() {
        let (_store, correlator) = correlator();

        let started = correlator.start(None, "city break").await.unwrap();
        let StartResult::AwaitingInput {
            checkpoint_id,
            conversation_thread_id,
            ..
        } = started
        else {
            panic!("scripted backend should pause");
        };

        // Thread id in the checkpoint slot.
        let swapped = correlator
            .resume(
                &conversation_thread_id.to_string(),
                &conversation_thread_id.to_string(),
                &json!({}),
            )
            .await;
        assert!(matches!(swapped, Err(OrchestratorError::Validation(_))));

        // Checkpoint id in the thread slot.
        let swapped = correlator
            .resume(checkpoint_id.as_str(), checkpoint_id.as_str(), &json!({}))
            .await;
        assert!(matches!(swapped, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_invalid_preferences_do_not_consume_checkpoint() {
        let (_store, correlator) = correlator();

        let started = correlator.start(None, "beach holiday").await.unwrap();
        let StartResult::AwaitingInput {
            checkpoint_id,
            conversation_thread_id,
            ..
        } = started
        else {
            panic!("scripted backend should pause");
        };
        let thread = conversation_thread_id.to_string();

        let rejected = correlator
            .resume(checkpoint_id.as_str(), &thread, &json!("cheap"))
            .await;
        assert!(matches!(rejected, Err(OrchestratorError::Validation(_))));

        // Validation ran before the engine, so the checkpoint is still live.
        let resumed = correlator
            .resume(checkpoint_id.as_str(), &thread, &json!({"budget": "low"}))
            .await;
        assert!(resumed.is_ok());
    }

    #[tokio::test]
    async fn test_start_rejects_empty_query() {
        let (_store, correlator) = correlator();
        let result = correlator.start(None, "   ").await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    /// Backend that finishes immediately, for the no-pause path.
    struct InstantBackend;

    #[async_trait]
    impl WorkflowBackend for InstantBackend {
        async fn start(&self, query: &str) -> Result<TaskStart> {
            Ok(TaskStart::Complete {
                result: format!("Summary for: {}", query),
            })
        }

        async fn resume(&self, checkpoint: &CheckpointId, _preferences: &Value) -> Result<String> {
            Err(OrchestratorError::ResumeNotFound(checkpoint.to_string()))
        }
    }

    #[tokio::test]
    async fn test_run_that_never_pauses_records_final_answer() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let correlator = WorkflowCorrelator::new(store.clone(), Arc::new(InstantBackend));

        let started = correlator.start(None, "quick fact check").await.unwrap();
        let StartResult::Complete {
            conversation_thread_id,
            result,
        } = started
        else {
            panic!("instant backend should complete");
        };

        let log = store.page(&conversation_thread_id, 1, 10).await.unwrap();
        assert_eq!(log.messages.len(), 2);
        assert_eq!(log.messages[1].content, result);
    }

    #[tokio::test]
    async fn test_resume_result_survives_deleted_thread() {
        let (store, correlator) = correlator();

        let started = correlator.start(None, "mountain retreat").await.unwrap();
        let StartResult::AwaitingInput {
            checkpoint_id,
            conversation_thread_id,
            ..
        } = started
        else {
            panic!("scripted backend should pause");
        };

        store.delete(&conversation_thread_id).await.unwrap();

        // The append fails, but the engine's answer still reaches the caller.
        let resumed = correlator
            .resume(
                checkpoint_id.as_str(),
                &conversation_thread_id.to_string(),
                &json!({"season": "winter"}),
            )
            .await
            .unwrap();
        assert!(resumed.result.contains("mountain retreat"));
    }

    #[test]
    fn test_interim_summary_renders_questions_or_falls_back() {
        let partial = json!({
            "summary": "Day-wise outline ready.",
            "questions": ["Window or aisle?", "Any dietary limits?"],
        });
        let summary = interim_summary(&partial);
        assert!(summary.starts_with("Day-wise outline ready."));
        assert!(summary.contains("- Window or aisle?"));

        let opaque = interim_summary(&json!({"nodes_done": 3}));
        assert!(opaque.contains("preferences"));
    }

    #[test]
    fn test_start_result_serializes_with_status_tag() {
        let awaiting = StartResult::AwaitingInput {
            checkpoint_id: CheckpointId::generate(),
            conversation_thread_id: ThreadId::generate(),
            partial: json!({"summary": "draft"}),
        };
        let value = serde_json::to_value(&awaiting).unwrap();
        assert_eq!(value["status"], "awaiting_input");
        assert!(value["checkpoint_id"].as_str().unwrap().starts_with("wf-"));

        let complete = StartResult::Complete {
            conversation_thread_id: ThreadId::generate(),
            result: "done".to_string(),
        };
        let value = serde_json::to_value(&complete).unwrap();
        assert_eq!(value["status"], "complete");
        assert_eq!(value["result"], "done");
    }
}
