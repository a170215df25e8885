use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use crate::context::Role;
use crate::core::config::defaults::{DEFAULT_EMBEDDING_TIMEOUT_MS, DEFAULT_THREAD_TITLE};
use crate::core::errors::{CompanionError, Result};
use crate::llm::Embedder;
use crate::vector_math::{cmp_scores_desc, cosine_similarity};

mod embedding;

pub use embedding::{decode_embedding, encode_embedding};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: i64,
    pub role: Role,
    pub content: String,
    pub trace: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantMessage {
    pub message_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: String,
    pub score: f32,
}

/// Durable record of threads and their messages, backed by SQLite.
///
/// Constructed explicitly and shared by reference (or `Arc`) with whatever
/// needs it; several instances may open the same file concurrently.
#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
    db_path: PathBuf,
    default_title: String,
    embedding_timeout: Duration,
}

impl ConversationStore {
    /// Opens (creating if needed) the database, applies the schema and
    /// removes threads that never received a message.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CompanionError::Storage(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| CompanionError::Storage(format!("Failed to open history db: {}", e)))?;

        let store = Self {
            pool,
            db_path,
            default_title: DEFAULT_THREAD_TITLE.to_string(),
            embedding_timeout: Duration::from_millis(DEFAULT_EMBEDDING_TIMEOUT_MS),
        };
        store.init_schema().await?;

        let pruned = store.prune_empty_threads().await?;
        if !pruned.is_empty() {
            tracing::info!("Removed {} empty thread(s) on startup", pruned.len());
        }

        Ok(store)
    }

    pub fn with_default_title(mut self, title: impl Into<String>) -> Self {
        self.default_title = title.into();
        self
    }

    /// Upper bound on one embedding call; slower calls count as failures.
    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS threads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CompanionError::Storage(format!("Failed to init threads table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                trace TEXT,
                embedding BLOB,
                created_at TEXT NOT NULL,
                FOREIGN KEY(thread_id) REFERENCES threads(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CompanionError::Storage(format!("Failed to init messages table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_thread_created_at
             ON messages(thread_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CompanionError::Storage(format!("Failed to create index: {}", e)))?;

        Ok(())
    }

    pub async fn create_thread(&self, title: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO threads (title, created_at) VALUES (?1, ?2)")
            .bind(title)
            .bind(now_timestamp())
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(thread_id = id, "Created thread");
        Ok(id)
    }

    /// Most recently created first.
    pub async fn list_threads(&self) -> Result<Vec<Thread>> {
        let rows = sqlx::query(
            "SELECT id, title, created_at FROM threads ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(thread_from_row).collect()
    }

    pub async fn get_thread(&self, thread_id: i64) -> Result<Option<Thread>> {
        let row = sqlx::query("SELECT id, title, created_at FROM threads WHERE id = ?1")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(thread_from_row).transpose()
    }

    /// Title of `thread_id`, or the default title if it does not exist.
    pub async fn thread_title(&self, thread_id: i64) -> Result<String> {
        Ok(self
            .get_thread(thread_id)
            .await?
            .map(|thread| thread.title)
            .unwrap_or_else(|| self.default_title.clone()))
    }

    pub fn default_title(&self) -> &str {
        &self.default_title
    }

    pub async fn rename_thread(&self, thread_id: i64, new_title: &str) -> Result<()> {
        let result = sqlx::query("UPDATE threads SET title = ?1 WHERE id = ?2")
            .bind(new_title)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CompanionError::NotFound(format!("thread {}", thread_id)));
        }
        Ok(())
    }

    /// Deletes a thread and, by cascade, its messages. Returns whether a
    /// thread was removed.
    pub async fn delete_thread(&self, thread_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM threads WHERE id = ?1")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persists one message. Embedding failures (including timeouts) are
    /// logged and the message is stored without a vector.
    pub async fn save_message(
        &self,
        thread_id: i64,
        role: Role,
        content: &str,
        trace: Option<&str>,
        embedder: Option<&dyn Embedder>,
    ) -> Result<i64> {
        let embedding = match embedder {
            Some(embedder) => match self.embed(embedder, content).await {
                Ok(vector) => Some(vector),
                Err(err) => {
                    tracing::warn!(thread_id, "Saving message without embedding: {}", err);
                    None
                }
            },
            None => None,
        };

        self.save_message_with_embedding(thread_id, role, content, trace, embedding.as_deref())
            .await
    }

    /// Persists one message with an already computed vector, if any.
    pub async fn save_message_with_embedding(
        &self,
        thread_id: i64,
        role: Role,
        content: &str,
        trace: Option<&str>,
        embedding: Option<&[f32]>,
    ) -> Result<i64> {
        let embedding = embedding.map(encode_embedding);

        let result = sqlx::query(
            "INSERT INTO messages (thread_id, role, content, trace, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(thread_id)
        .bind(role.as_str())
        .bind(content)
        .bind(trace)
        .bind(embedding)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_foreign_key_violation() => {
                CompanionError::NotFound(format!("thread {}", thread_id))
            }
            _ => CompanionError::from(e),
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Messages of a thread, oldest first.
    pub async fn get_messages(&self, thread_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, thread_id, role, content, trace, created_at
             FROM messages
             WHERE thread_id = ?1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let role_text: String = row.try_get("role")?;
            let Ok(role) = Role::from_str(&role_text) else {
                tracing::warn!(message_id = id, "Skipping message with unknown role '{}'", role_text);
                continue;
            };
            messages.push(Message {
                id,
                thread_id: row.try_get("thread_id")?,
                role,
                content: row.try_get("content")?,
                trace: row.try_get("trace")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(messages)
    }

    pub async fn message_count(&self, thread_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE thread_id = ?1")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Up to `top_n` embedded messages of `thread_id`, most similar to
    /// `query` first; equal scores prefer the more recent message.
    ///
    /// A thread without embedded messages yields an empty result without
    /// consulting the embedder.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        thread_id: i64,
        embedder: &dyn Embedder,
        top_n: usize,
    ) -> Result<Vec<RelevantMessage>> {
        if top_n == 0 {
            return Ok(Vec::new());
        }

        let rows = self.embedded_rows(thread_id).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embed(embedder, query).await?;
        rank_rows(rows, &query_embedding, top_n)
    }

    /// Same ranking as [`ConversationStore::retrieve_relevant`] for a query
    /// vector the caller already holds.
    pub async fn retrieve_relevant_by_embedding(
        &self,
        query_embedding: &[f32],
        thread_id: i64,
        top_n: usize,
    ) -> Result<Vec<RelevantMessage>> {
        if top_n == 0 {
            return Ok(Vec::new());
        }
        let rows = self.embedded_rows(thread_id).await?;
        rank_rows(rows, query_embedding, top_n)
    }

    async fn embedded_rows(&self, thread_id: i64) -> Result<Vec<SqliteRow>> {
        let rows = sqlx::query(
            "SELECT id, role, content, embedding, created_at
             FROM messages
             WHERE thread_id = ?1 AND embedding IS NOT NULL",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Deletes every thread without messages and returns their ids.
    ///
    /// The emptiness check and the delete are one statement inside one
    /// transaction, so a message committed to a thread before the delete
    /// keeps that thread alive, and an insert racing a completed delete fails
    /// with `NotFound` instead of being silently orphaned.
    pub async fn prune_empty_threads(&self) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;

        let deleted: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM threads
             WHERE NOT EXISTS (SELECT 1 FROM messages WHERE messages.thread_id = threads.id)
             RETURNING id",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        if !deleted.is_empty() {
            tracing::debug!(?deleted, "Pruned empty threads");
        }
        Ok(deleted)
    }

    /// Embeds `text`, bounded by the store's embedding timeout. Every
    /// failure comes back as `CompanionError::Embedding`.
    pub async fn embed(&self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
        let vector = tokio::time::timeout(self.embedding_timeout, embedder.embed(text))
            .await
            .map_err(|_| {
                CompanionError::Embedding(format!(
                    "timed out after {} ms",
                    self.embedding_timeout.as_millis()
                ))
            })?
            .map_err(|e| match e {
                CompanionError::Embedding(_) => e,
                other => CompanionError::embedding(other),
            })?;

        if vector.is_empty() {
            return Err(CompanionError::Embedding(
                "embedder returned an empty vector".to_string(),
            ));
        }
        Ok(vector)
    }
}

fn rank_rows(
    rows: Vec<SqliteRow>,
    query_embedding: &[f32],
    top_n: usize,
) -> Result<Vec<RelevantMessage>> {
    let mut scored = Vec::new();
    for row in rows {
        let message_id: i64 = row.try_get("id")?;
        let blob: Vec<u8> = match row.try_get("embedding") {
            Ok(blob) => blob,
            Err(err) => {
                tracing::warn!(message_id, "Skipping unreadable embedding: {}", err);
                continue;
            }
        };

        let embedding = match decode_embedding(&blob) {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(message_id, "Skipping unreadable embedding: {}", err);
                continue;
            }
        };
        let Some(score) = cosine_similarity(query_embedding, &embedding) else {
            tracing::warn!(
                message_id,
                "Skipping embedding of dimension {} (query has {})",
                embedding.len(),
                query_embedding.len()
            );
            continue;
        };
        let role_text: String = row.try_get("role")?;
        let Ok(role) = Role::from_str(&role_text) else {
            tracing::warn!(message_id, "Skipping message with unknown role '{}'", role_text);
            continue;
        };

        scored.push(RelevantMessage {
            message_id,
            role,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            score,
        });
    }

    scored.sort_by(|a, b| {
        cmp_scores_desc(a.score, b.score)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.message_id.cmp(&a.message_id))
    });
    scored.truncate(top_n);

    Ok(scored)
}

fn thread_from_row(row: &SqliteRow) -> Result<Thread> {
    Ok(Thread {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
    })
}

/// RFC 3339 with microseconds, so text order is chronological.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
