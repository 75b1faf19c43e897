//! Plain-chat exchange path
//!
//! Resolves the conversation thread, assembles context through the global
//! memory aggregator, calls the task service, then records the exchange.
//! History writes after a successful answer are best-effort: the answer is
//! returned even when they fail.

use crate::ai::TaskService;
use crate::error::{OrchestratorError, Result};
use crate::memory::GlobalMemoryAggregator;
use crate::models::{derive_title, ThreadId};
use crate::store::ThreadStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub thread_id: ThreadId,
    pub answer: String,
}

pub struct ChatService {
    store: Arc<dyn ThreadStore>,
    memory: Arc<GlobalMemoryAggregator>,
    tasks: Arc<dyn TaskService>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        memory: Arc<GlobalMemoryAggregator>,
        tasks: Arc<dyn TaskService>,
    ) -> Self {
        Self { store, memory, tasks }
    }

    /// One user turn: the returned thread id is canonical and must be used
    /// for all follow-up operations, whatever reference the caller supplied.
    pub async fn exchange(&self, thread_ref: Option<&str>, message: &str) -> Result<ChatReply> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(OrchestratorError::Validation(
                "message must not be empty".to_string(),
            ));
        }

        let thread = self
            .store
            .create_or_get(thread_ref, &derive_title(trimmed))
            .await?;
        info!(thread_id = %thread.id, "Handling chat exchange");

        let context = match self.memory.context_for(&thread.id).await {
            Ok(context) => context,
            Err(error) => {
                warn!(
                    thread_id = %thread.id,
                    "Context assembly failed, continuing without memory: {}",
                    error
                );
                Vec::new()
            }
        };

        let answer = self.tasks.chat(&context, trimmed).await?;

        if let Err(error) = self.memory.record_exchange(&thread.id, trimmed, &answer).await {
            warn!(
                thread_id = %thread.id,
                "Chat history write failed, response will still be returned: {}",
                error
            );
        }

        Ok(ChatReply {
            thread_id: thread.id,
            answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockTaskService;
    use crate::memory::{global_thread_id, MemoryConfig};
    use crate::models::{Message, MessagePage, Thread, ThreadSummary};
    use crate::store::InMemoryThreadStore;

    fn chat_service(store: Arc<dyn ThreadStore>) -> ChatService {
        let memory = Arc::new(GlobalMemoryAggregator::with_config(
            store.clone(),
            MemoryConfig {
                capacity: 10,
                window: 6,
            },
        ));
        ChatService::new(store, memory, Arc::new(MockTaskService))
    }

    #[tokio::test]
    async fn test_exchange_creates_thread_and_records_both_logs() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let service = chat_service(store.clone());

        let reply = service.exchange(None, "what is an ETF?").await.unwrap();
        assert!(!reply.answer.is_empty());

        let local = store.page(&reply.thread_id, 1, 10).await.unwrap();
        assert_eq!(local.messages.len(), 2);
        assert_eq!(local.messages[0].content, "what is an ETF?");
        assert_eq!(local.messages[1].content, reply.answer);

        let global = store.page(&global_thread_id(), 1, 10).await.unwrap();
        assert_eq!(global.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_assigns_canonical_id_for_provisional_ref() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let service = chat_service(store.clone());

        let reply = service
            .exchange(Some("local-1724012345"), "hello there")
            .await
            .unwrap();
        assert_ne!(reply.thread_id.to_string(), "local-1724012345");

        // Follow-up under the returned canonical id lands in the same thread.
        let follow_up = service
            .exchange(Some(&reply.thread_id.to_string()), "second question")
            .await
            .unwrap();
        assert_eq!(follow_up.thread_id, reply.thread_id);

        let local = store.page(&reply.thread_id, 1, 10).await.unwrap();
        assert_eq!(local.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_current_turn_excluded_from_context() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let service = chat_service(store.clone());

        // First turn: nothing recorded yet, so the mock sees empty context.
        let first = service.exchange(None, "first question").await.unwrap();
        assert!(!first.answer.contains("earlier messages"));

        // Second turn: global (2) + local (2) earlier messages, current turn
        // still excluded.
        let second = service
            .exchange(Some(&first.thread_id.to_string()), "second question")
            .await
            .unwrap();
        assert!(second.answer.contains("4 earlier messages"));
    }

    #[tokio::test]
    async fn test_empty_message_is_validation_error() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let service = chat_service(store);

        let result = service.exchange(None, "   ").await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    /// Store whose appends always fail, for exercising the best-effort path.
    struct AppendFailStore {
        inner: InMemoryThreadStore,
    }

    #[async_trait::async_trait]
    impl ThreadStore for AppendFailStore {
        async fn create_or_get(&self, id: Option<&str>, title: &str) -> Result<Thread> {
            self.inner.create_or_get(id, title).await
        }

        async fn append(&self, _id: &ThreadId, _message: Message) -> Result<Thread> {
            Err(OrchestratorError::Persistence("write refused".to_string()))
        }

        async fn page(&self, id: &ThreadId, page: u32, limit: u32) -> Result<MessagePage> {
            self.inner.page(id, page, limit).await
        }

        async fn rename(&self, id: &ThreadId, title: &str) -> Result<ThreadSummary> {
            self.inner.rename(id, title).await
        }

        async fn delete(&self, id: &ThreadId) -> Result<()> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> Result<Vec<ThreadSummary>> {
            self.inner.list().await
        }

        async fn trim_front(&self, id: &ThreadId, max_len: usize) -> Result<usize> {
            self.inner.trim_front(id, max_len).await
        }
    }

    #[tokio::test]
    async fn test_answer_survives_history_write_failure() {
        let store: Arc<dyn ThreadStore> = Arc::new(AppendFailStore {
            inner: InMemoryThreadStore::new(),
        });
        let service = chat_service(store.clone());

        let reply = service.exchange(None, "is history durable?").await.unwrap();
        assert!(!reply.answer.is_empty());

        // Nothing was persisted, but the answer was still delivered.
        let local = store.page(&reply.thread_id, 1, 10).await.unwrap();
        assert!(local.messages.is_empty());
    }
}
