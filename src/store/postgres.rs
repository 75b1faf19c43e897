//! Postgres-backed thread store
//!
//! Durable backend selected when `POSTGRES_URL`/`DATABASE_URL` is set.
//! Schema is created lazily on first use; message order is an explicit
//! per-thread position column.

use crate::error::{OrchestratorError, Result};
use crate::models::{
    Message, MessagePage, MessageRole, Thread, ThreadId, ThreadRef, ThreadSummary,
};
use crate::store::{page_bounds, validate_paging, ThreadStore};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PostgresThreadStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresThreadStore {
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| {
                OrchestratorError::Persistence(format!(
                    "Failed to create postgres pool: {}",
                    e
                ))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS threads (
                      id UUID PRIMARY KEY,
                      title TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS thread_messages (
                      message_id UUID PRIMARY KEY,
                      thread_id UUID NOT NULL,
                      position BIGINT NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_thread_messages_thread_position
                    ON thread_messages (thread_id, position);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!(
                    "Failed to initialize thread store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn role_to_db(role: MessageRole) -> &'static str {
        match role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    fn role_from_db(role: &str) -> MessageRole {
        match role.to_lowercase().as_str() {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }

    async fn load_thread(&self, id: &ThreadId) -> Result<Thread> {
        let row = sqlx::query("SELECT title, created_at, updated_at FROM threads WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to load thread: {}", e))
            })?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        let title: String = row.try_get("title").unwrap_or_default();
        let created_at: DateTime<Utc> = row.try_get("created_at").unwrap_or_else(|_| Utc::now());
        let updated_at: DateTime<Utc> = row.try_get("updated_at").unwrap_or_else(|_| Utc::now());

        let message_rows = sqlx::query(
            r#"
            SELECT role, content FROM thread_messages
            WHERE thread_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Persistence(format!("Failed to load thread messages: {}", e))
        })?;

        let messages = message_rows
            .into_iter()
            .map(|row| {
                let db_role: String = row.try_get("role").unwrap_or_else(|_| "user".to_string());
                Message {
                    role: Self::role_from_db(&db_role),
                    content: row.try_get("content").unwrap_or_default(),
                }
            })
            .collect();

        Ok(Thread {
            id: *id,
            title,
            messages,
            created_at,
            updated_at,
        })
    }
}

#[async_trait::async_trait]
impl ThreadStore for PostgresThreadStore {
    async fn create_or_get(&self, id: Option<&str>, title: &str) -> Result<Thread> {
        let resolved = ThreadRef::resolve(id)?;
        self.ensure_schema().await?;

        let id = match resolved {
            ThreadRef::Canonical(id) => id,
            ThreadRef::Unpersisted => ThreadId::generate(),
        };

        sqlx::query("INSERT INTO threads (id, title) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(id.as_uuid())
            .bind(title)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to create thread: {}", e))
            })?;

        self.load_thread(&id).await
    }

    async fn append(&self, id: &ThreadId, message: Message) -> Result<Thread> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            OrchestratorError::Persistence(format!(
                "Failed to begin transaction for message append: {}",
                e
            ))
        })?;

        let bumped = sqlx::query("UPDATE threads SET updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to bump thread recency: {}", e))
            })?;
        if bumped.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        let next_position: i64 = sqlx::query(
            "SELECT COALESCE(MAX(position) + 1, 0) AS next FROM thread_messages WHERE thread_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            OrchestratorError::Persistence(format!("Failed to compute message position: {}", e))
        })?
        .try_get("next")
        .unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO thread_messages (message_id, thread_id, position, role, content)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id.as_uuid())
        .bind(next_position)
        .bind(Self::role_to_db(message.role))
        .bind(&message.content)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            OrchestratorError::Persistence(format!("Failed to insert message: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            OrchestratorError::Persistence(format!(
                "Failed to commit message append transaction: {}",
                e
            ))
        })?;

        self.load_thread(id).await
    }

    async fn page(&self, id: &ThreadId, page: u32, limit: u32) -> Result<MessagePage> {
        validate_paging(page, limit)?;
        self.ensure_schema().await?;

        sqlx::query("SELECT 1 FROM threads WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to look up thread: {}", e))
            })?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM thread_messages WHERE thread_id = $1")
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to count messages: {}", e))
            })?
            .try_get("total")
            .unwrap_or(0);

        let total = total.max(0) as usize;
        let (start, end) = page_bounds(total, page, limit);

        let rows = sqlx::query(
            r#"
            SELECT role, content FROM thread_messages
            WHERE thread_id = $1
            ORDER BY position ASC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(id.as_uuid())
        .bind(start as i64)
        .bind((end - start) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Persistence(format!("Failed to load message page: {}", e))
        })?;

        let messages = rows
            .into_iter()
            .map(|row| {
                let db_role: String = row.try_get("role").unwrap_or_else(|_| "user".to_string());
                Message {
                    role: Self::role_from_db(&db_role),
                    content: row.try_get("content").unwrap_or_default(),
                }
            })
            .collect();

        Ok(MessagePage {
            messages,
            has_more: start > 0,
            total_messages: total,
            page,
        })
    }

    async fn rename(&self, id: &ThreadId, title: &str) -> Result<ThreadSummary> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "UPDATE threads SET title = $2, updated_at = NOW() WHERE id = $1 RETURNING title, updated_at",
        )
        .bind(id.as_uuid())
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Persistence(format!("Failed to rename thread: {}", e))
        })?
        .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        Ok(ThreadSummary {
            id: *id,
            title: row.try_get("title").unwrap_or_else(|_| title.to_string()),
            updated_at: row.try_get("updated_at").unwrap_or_else(|_| Utc::now()),
        })
    }

    async fn delete(&self, id: &ThreadId) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            OrchestratorError::Persistence(format!(
                "Failed to begin transaction for thread delete: {}",
                e
            ))
        })?;

        sqlx::query("DELETE FROM thread_messages WHERE thread_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to delete thread messages: {}", e))
            })?;

        let deleted = sqlx::query("DELETE FROM threads WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to delete thread: {}", e))
            })?;

        if deleted.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(id.to_string()));
        }

        tx.commit().await.map_err(|e| {
            OrchestratorError::Persistence(format!(
                "Failed to commit thread delete transaction: {}",
                e
            ))
        })
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("SELECT id, title, updated_at FROM threads ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                OrchestratorError::Persistence(format!("Failed to list threads: {}", e))
            })?;

        Ok(rows
            .into_iter()
            .map(|row| ThreadSummary {
                id: ThreadId::from(row.try_get::<Uuid, _>("id").unwrap_or_else(|_| Uuid::nil())),
                title: row.try_get("title").unwrap_or_default(),
                updated_at: row.try_get("updated_at").unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    async fn trim_front(&self, id: &ThreadId, max_len: usize) -> Result<usize> {
        self.ensure_schema().await?;

        // Keep only the newest max_len rows.
        let evicted = sqlx::query(
            r#"
            DELETE FROM thread_messages
            WHERE thread_id = $1
              AND position NOT IN (
                SELECT position FROM thread_messages
                WHERE thread_id = $1
                ORDER BY position DESC
                LIMIT $2
              )
            "#,
        )
        .bind(id.as_uuid())
        .bind(max_len as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Persistence(format!("Failed to trim thread messages: {}", e))
        })?
        .rows_affected();

        if evicted > 0 {
            sqlx::query("UPDATE threads SET updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    OrchestratorError::Persistence(format!(
                        "Failed to bump thread recency after trim: {}",
                        e
                    ))
                })?;
        }

        Ok(evicted as usize)
    }
}
