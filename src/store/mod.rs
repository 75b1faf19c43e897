//! Conversation thread persistence
//!
//! Owns threads and their append-only message logs: creation, append,
//! newest-first pagination, rename, delete, list-by-recency.
//! In-memory by default; Postgres when a database URL is configured.

use crate::error::{OrchestratorError, Result};
use crate::models::{Message, MessagePage, Thread, ThreadId, ThreadRef, ThreadSummary};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub mod postgres;

pub use postgres::PostgresThreadStore;

/// Trait for thread persistence
#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    /// Idempotent create-or-fetch. A canonical id is fetched, or created under
    /// that id when absent. A missing or provisional reference allocates a
    /// fresh store-assigned id; callers must track the returned id.
    async fn create_or_get(&self, id: Option<&str>, title: &str) -> Result<Thread>;

    /// Appends one message to the end of the log. `NotFound` when the thread
    /// does not exist.
    async fn append(&self, id: &ThreadId, message: Message) -> Result<Thread>;

    /// Newest-first windowed read: page 1 holds the most recent `limit`
    /// messages. A page past the data is empty with `has_more = false`.
    async fn page(&self, id: &ThreadId, page: u32, limit: u32) -> Result<MessagePage>;

    async fn rename(&self, id: &ThreadId, title: &str) -> Result<ThreadSummary>;

    /// Fully removes the thread and its messages.
    async fn delete(&self, id: &ThreadId) -> Result<()>;

    /// Thread summaries sorted by `updated_at` descending.
    async fn list(&self) -> Result<Vec<ThreadSummary>>;

    /// Evicts oldest messages until the log holds at most `max_len`. Returns
    /// the evicted count. Only the bounded global-memory log is ever trimmed.
    async fn trim_front(&self, id: &ThreadId, max_len: usize) -> Result<usize>;
}

/// Builds the store from the environment: Postgres when a database URL is
/// set, in-memory otherwise.
pub fn from_env() -> Arc<dyn ThreadStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match PostgresThreadStore::connect_lazy(&url) {
            Ok(store) => {
                info!("Thread store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres thread store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Thread store backend: in-memory");
    Arc::new(InMemoryThreadStore::new())
}

//
// ================= Pagination math =================
//

pub fn validate_paging(page: u32, limit: u32) -> Result<()> {
    if limit == 0 {
        return Err(OrchestratorError::Validation(
            "limit must be at least 1".to_string(),
        ));
    }
    if page == 0 {
        return Err(OrchestratorError::Validation(
            "page must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Window `[start, end)` into a log of `total` messages for newest-first
/// pagination: `end = max(0, total - (page-1)*limit)`,
/// `start = max(0, end - limit)`. `has_more` is `start > 0`.
pub fn page_bounds(total: usize, page: u32, limit: u32) -> (usize, usize) {
    let skip = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
    let end = total.saturating_sub(skip);
    let start = end.saturating_sub(limit as usize);
    (start, end)
}

//
// ================= In-memory backend =================
//

#[derive(Debug, Clone)]
struct ThreadRecord {
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    messages: VecDeque<Message>,
}

impl ThreadRecord {
    fn new(title: &str) -> Self {
        let now = Utc::now();
        Self {
            title: title.to_string(),
            created_at: now,
            updated_at: now,
            messages: VecDeque::new(),
        }
    }

    fn to_thread(&self, id: ThreadId) -> Thread {
        Thread {
            id,
            title: self.title.clone(),
            messages: self.messages.iter().cloned().collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn to_summary(&self, id: ThreadId) -> ThreadSummary {
        ThreadSummary {
            id,
            title: self.title.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// In-memory thread store, the default backend. One write lock per operation
/// is what makes concurrent `create_or_get` calls for the same id converge on
/// a single record.
pub struct InMemoryThreadStore {
    threads: Arc<RwLock<HashMap<ThreadId, ThreadRecord>>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self {
            threads: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn create_or_get(&self, id: Option<&str>, title: &str) -> Result<Thread> {
        let resolved = ThreadRef::resolve(id)?;

        let mut threads = self.threads.write().await;
        let id = match resolved {
            ThreadRef::Canonical(id) => id,
            ThreadRef::Unpersisted => ThreadId::generate(),
        };

        let record = threads.entry(id).or_insert_with(|| ThreadRecord::new(title));
        Ok(record.to_thread(id))
    }

    async fn append(&self, id: &ThreadId, message: Message) -> Result<Thread> {
        let mut threads = self.threads.write().await;
        let record = threads
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        record.messages.push_back(message);
        record.updated_at = Utc::now();
        Ok(record.to_thread(*id))
    }

    async fn page(&self, id: &ThreadId, page: u32, limit: u32) -> Result<MessagePage> {
        validate_paging(page, limit)?;

        let threads = self.threads.read().await;
        let record = threads
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        let total = record.messages.len();
        let (start, end) = page_bounds(total, page, limit);

        let messages: Vec<Message> = record
            .messages
            .iter()
            .skip(start)
            .take(end - start)
            .cloned()
            .collect();

        Ok(MessagePage {
            messages,
            has_more: start > 0,
            total_messages: total,
            page,
        })
    }

    async fn rename(&self, id: &ThreadId, title: &str) -> Result<ThreadSummary> {
        let mut threads = self.threads.write().await;
        let record = threads
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        record.title = title.to_string();
        record.updated_at = Utc::now();
        Ok(record.to_summary(*id))
    }

    async fn delete(&self, id: &ThreadId) -> Result<()> {
        let mut threads = self.threads.write().await;
        threads
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>> {
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .iter()
            .map(|(id, record)| record.to_summary(*id))
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn trim_front(&self, id: &ThreadId, max_len: usize) -> Result<usize> {
        let mut threads = self.threads.write().await;
        let record = threads
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        let mut evicted = 0;
        while record.messages.len() > max_len {
            record.messages.pop_front();
            evicted += 1;
        }

        if evicted > 0 {
            record.updated_at = Utc::now();
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckpointId;
    use std::time::Duration;

    async fn seeded_store(message_count: usize) -> (InMemoryThreadStore, ThreadId) {
        let store = InMemoryThreadStore::new();
        let thread = store.create_or_get(None, "seeded").await.unwrap();
        for i in 0..message_count {
            store
                .append(&thread.id, Message::user(format!("msg {}", i)))
                .await
                .unwrap();
        }
        (store, thread.id)
    }

    #[tokio::test]
    async fn test_create_or_get_assigns_fresh_id_for_provisional() {
        let store = InMemoryThreadStore::new();

        let thread = store
            .create_or_get(Some("local-1724012345"), "first chat")
            .await
            .unwrap();

        assert_ne!(thread.id.to_string(), "local-1724012345");
        assert_eq!(thread.title, "first chat");
        assert!(thread.messages.is_empty());
    }

    #[tokio::test]
    async fn test_create_or_get_idempotent_for_canonical_id() {
        let store = Arc::new(InMemoryThreadStore::new());
        let id = ThreadId::generate();
        let raw = id.to_string();

        let (a, b) = tokio::join!(
            store.create_or_get(Some(&raw), "left"),
            store.create_or_get(Some(&raw), "right"),
        );
        assert_eq!(a.unwrap().id, id);
        assert_eq!(b.unwrap().id, id);

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test]
    async fn test_create_or_get_rejects_checkpoint_id() {
        let store = InMemoryThreadStore::new();
        let checkpoint = CheckpointId::generate();

        let result = store.create_or_get(Some(checkpoint.as_str()), "oops").await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_bumps_recency() {
        let store = InMemoryThreadStore::new();
        let thread = store.create_or_get(None, "chat").await.unwrap();
        let created = thread.updated_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.append(&thread.id, Message::user("one")).await.unwrap();
        let updated = store
            .append(&thread.id, Message::assistant("two"))
            .await
            .unwrap();

        let contents: Vec<&str> = updated.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert!(updated.updated_at > created);
    }

    #[tokio::test]
    async fn test_append_missing_thread_is_not_found() {
        let store = InMemoryThreadStore::new();
        let result = store.append(&ThreadId::generate(), Message::user("hi")).await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pagination_newest_first() {
        let (store, id) = seeded_store(100).await;

        // Page 1: most recent 20, in original order.
        let first = store.page(&id, 1, 20).await.unwrap();
        assert_eq!(first.messages.len(), 20);
        assert_eq!(first.messages[0].content, "msg 80");
        assert_eq!(first.messages[19].content, "msg 99");
        assert!(first.has_more);
        assert_eq!(first.total_messages, 100);

        // Page 5: the oldest window.
        let last = store.page(&id, 5, 20).await.unwrap();
        assert_eq!(last.messages[0].content, "msg 0");
        assert_eq!(last.messages[19].content, "msg 19");
        assert!(!last.has_more);

        // Page 6: past the data.
        let past = store.page(&id, 6, 20).await.unwrap();
        assert!(past.messages.is_empty());
        assert!(!past.has_more);
    }

    #[tokio::test]
    async fn test_pagination_window_property() {
        for total in [0usize, 1, 7, 20, 41] {
            let (store, id) = seeded_store(total).await;
            for limit in [1u32, 3, 20] {
                for page in 1u32..=5 {
                    let result = store.page(&id, page, limit).await.unwrap();
                    let skip = (page as usize - 1) * limit as usize;
                    let expected_len = (limit as usize).min(total.saturating_sub(skip));
                    assert_eq!(result.messages.len(), expected_len);

                    let (start, _) = page_bounds(total, page, limit);
                    assert_eq!(result.has_more, start > 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_pagination_validation() {
        let (store, id) = seeded_store(3).await;

        let zero_limit = store.page(&id, 1, 0).await;
        assert!(matches!(zero_limit, Err(OrchestratorError::Validation(_))));

        let zero_page = store.page(&id, 0, 10).await;
        assert!(matches!(zero_page, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let store = InMemoryThreadStore::new();
        let thread = store.create_or_get(None, "before").await.unwrap();

        let renamed = store.rename(&thread.id, "after").await.unwrap();
        assert_eq!(renamed.title, "after");

        store.delete(&thread.id).await.unwrap();
        let second = store.delete(&thread.id).await;
        assert!(matches!(second, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_sorted_by_recency() {
        let store = InMemoryThreadStore::new();
        let first = store.create_or_get(None, "first").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.create_or_get(None, "second").await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].id, second.id);

        // Appending to the older thread moves it to the top.
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.append(&first.id, Message::user("bump")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].id, first.id);
    }

    #[tokio::test]
    async fn test_trim_front_evicts_oldest() {
        let (store, id) = seeded_store(10).await;

        let evicted = store.trim_front(&id, 4).await.unwrap();
        assert_eq!(evicted, 6);

        let window = store.page(&id, 1, 10).await.unwrap();
        let contents: Vec<&str> = window.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 6", "msg 7", "msg 8", "msg 9"]);

        // Already within bounds: nothing to evict.
        assert_eq!(store.trim_front(&id, 4).await.unwrap(), 0);
    }
}
