//! Cross-conversation global memory
//!
//! One bounded message log under a reserved thread id. Every plain-chat
//! exchange merges its recent window with the active thread's window into the
//! outbound request context, then records both sides of the exchange in both
//! logs.

use crate::error::{OrchestratorError, Result};
use crate::models::{Message, ThreadId};
use crate::store::ThreadStore;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const GLOBAL_MEMORY_TITLE: &str = "Global memory";

/// Reserved identifier for the singleton global-memory thread.
pub fn global_thread_id() -> ThreadId {
    ThreadId::from(Uuid::nil())
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Hard cap on the global log; oldest entries are evicted past this.
    pub capacity: usize,
    /// Recent-window size read from each log when building context.
    pub window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 40,
            window: 20,
        }
    }
}

pub struct GlobalMemoryAggregator {
    store: Arc<dyn ThreadStore>,
    config: MemoryConfig,
}

impl GlobalMemoryAggregator {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self::with_config(store, MemoryConfig::default())
    }

    pub fn with_config(store: Arc<dyn ThreadStore>, config: MemoryConfig) -> Self {
        Self { store, config }
    }

    /// Context for one outbound request: the recent global window first, then
    /// the active thread's recent window. The just-submitted user turn is in
    /// neither log yet; it travels separately as the current turn.
    pub async fn context_for(&self, active: &ThreadId) -> Result<Vec<Message>> {
        let mut context = self.recent_window(&global_thread_id()).await?;
        if *active != global_thread_id() {
            context.extend(self.recent_window(active).await?);
        }

        debug!(
            thread_id = %active,
            context_len = context.len(),
            "Assembled request context"
        );
        Ok(context)
    }

    /// Records one completed exchange in the active thread and the global
    /// log, then enforces the global cap (oldest evicted first).
    pub async fn record_exchange(
        &self,
        active: &ThreadId,
        user: &str,
        assistant: &str,
    ) -> Result<()> {
        self.store.append(active, Message::user(user)).await?;
        self.store.append(active, Message::assistant(assistant)).await?;

        let global = self
            .store
            .create_or_get(Some(&global_thread_id().to_string()), GLOBAL_MEMORY_TITLE)
            .await?;
        self.store.append(&global.id, Message::user(user)).await?;
        self.store
            .append(&global.id, Message::assistant(assistant))
            .await?;

        let evicted = self
            .store
            .trim_front(&global.id, self.config.capacity)
            .await?;
        if evicted > 0 {
            debug!(evicted, "Trimmed global memory to capacity");
        }

        Ok(())
    }

    async fn recent_window(&self, id: &ThreadId) -> Result<Vec<Message>> {
        match self.store.page(id, 1, self.config.window as u32).await {
            Ok(page) => Ok(page.messages),
            // The global thread does not exist until the first write.
            Err(OrchestratorError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryThreadStore;

    fn small_aggregator(store: Arc<dyn ThreadStore>) -> GlobalMemoryAggregator {
        GlobalMemoryAggregator::with_config(
            store,
            MemoryConfig {
                capacity: 6,
                window: 4,
            },
        )
    }

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.capacity, 40);
        assert_eq!(config.window, 20);
    }

    #[tokio::test]
    async fn test_global_log_stays_bounded_and_drops_oldest() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let memory = small_aggregator(store.clone());
        let thread = store.create_or_get(None, "chat").await.unwrap();

        for i in 0..10 {
            memory
                .record_exchange(&thread.id, &format!("u{}", i), &format!("a{}", i))
                .await
                .unwrap();

            let global = store.page(&global_thread_id(), 1, 100).await.unwrap();
            assert!(global.total_messages <= 6);
        }

        let global = store.page(&global_thread_id(), 1, 100).await.unwrap();
        let contents: Vec<&str> = global.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u7", "a7", "u8", "a8", "u9", "a9"]);
    }

    #[tokio::test]
    async fn test_context_merges_global_window_then_local_window() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let memory = small_aggregator(store.clone());

        let other = store.create_or_get(None, "other chat").await.unwrap();
        memory
            .record_exchange(&other.id, "capital of France?", "Paris.")
            .await
            .unwrap();

        let active = store.create_or_get(None, "active chat").await.unwrap();
        memory
            .record_exchange(&active.id, "and of Italy?", "Rome.")
            .await
            .unwrap();

        let context = memory.context_for(&active.id).await.unwrap();
        let contents: Vec<&str> = context.iter().map(|m| m.content.as_str()).collect();

        // Global window (both exchanges) first, then the active thread's own.
        assert_eq!(
            contents,
            vec![
                "capital of France?",
                "Paris.",
                "and of Italy?",
                "Rome.",
                "and of Italy?",
                "Rome.",
            ]
        );
    }

    #[tokio::test]
    async fn test_context_empty_before_first_exchange() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let memory = small_aggregator(store.clone());
        let thread = store.create_or_get(None, "fresh").await.unwrap();

        // Nothing recorded yet: the current turn is supplied separately and
        // must not appear in context.
        let context = memory.context_for(&thread.id).await.unwrap();
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_window_caps_each_side() {
        let store: Arc<dyn ThreadStore> = Arc::new(InMemoryThreadStore::new());
        let memory = small_aggregator(store.clone());
        let thread = store.create_or_get(None, "long chat").await.unwrap();

        for i in 0..8 {
            memory
                .record_exchange(&thread.id, &format!("q{}", i), &format!("r{}", i))
                .await
                .unwrap();
        }

        // window = 4 per side regardless of how much history exists.
        let context = memory.context_for(&thread.id).await.unwrap();
        assert_eq!(context.len(), 8);
    }
}
