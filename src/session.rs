//! Session and message persistence.
//!
//! Conversations live in two tables: `sessions` (title + timestamps) and
//! `messages` (ordered by a per-session `seq`). AI answers carry their
//! token counts and serialized citation list; everything else leaves
//! those columns NULL. Deleting a session removes its messages in the
//! same transaction.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::models::{AgentMessage, AgentSession, MessageKind, SourceReference, TokenUsage};

const DEFAULT_TITLE: &str = "New Chat";
const TITLE_MAX_CHARS: usize = 50;

#[derive(Clone)]
pub struct Sessions {
    pool: SqlitePool,
}

impl Sessions {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, title: Option<&str>) -> Result<AgentSession> {
        let now = Utc::now().timestamp();
        let id = uuid::Uuid::new_v4().to_string();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string();

        sqlx::query("INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(&title)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(AgentSession {
            id,
            title,
            created_at: now,
            updated_at: now,
            last_message: None,
            message_count: 0,
        })
    }

    /// All sessions, most recently touched first, with the last message
    /// preview and message count for listings.
    pub async fn list(&self) -> Result<Vec<AgentSession>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.title, s.created_at, s.updated_at,
                   (SELECT m.content FROM messages m
                    WHERE m.session_id = s.id
                    ORDER BY m.seq DESC LIMIT 1) AS last_message,
                   (SELECT COUNT(*) FROM messages m
                    WHERE m.session_id = s.id) AS message_count
            FROM sessions s
            ORDER BY s.updated_at DESC, s.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_session).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<AgentSession>> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.title, s.created_at, s.updated_at,
                   (SELECT m.content FROM messages m
                    WHERE m.session_id = s.id
                    ORDER BY m.seq DESC LIMIT 1) AS last_message,
                   (SELECT COUNT(*) FROM messages m
                    WHERE m.session_id = s.id) AS message_count
            FROM sessions s
            WHERE s.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_session))
    }

    /// Replay a session's messages in order, with token usage and the
    /// citation list restored.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<AgentMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, content, created_at,
                   prompt_tokens, completion_tokens, total_tokens, sources
            FROM messages
            WHERE session_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind_str: String = row.get("kind");
            let Some(kind) = MessageKind::parse(&kind_str) else {
                eprintln!("Warning: skipping message with unknown kind '{}'", kind_str);
                continue;
            };

            let usage = row
                .get::<Option<i64>, _>("total_tokens")
                .map(|total| TokenUsage {
                    prompt_tokens: row.get::<Option<i64>, _>("prompt_tokens").unwrap_or(0),
                    completion_tokens: row
                        .get::<Option<i64>, _>("completion_tokens")
                        .unwrap_or(0),
                    total_tokens: total,
                });

            let sources = row
                .get::<Option<String>, _>("sources")
                .and_then(|json| match serde_json::from_str::<Vec<SourceReference>>(&json) {
                    Ok(list) => Some(list),
                    Err(e) => {
                        eprintln!("Warning: unreadable citation list on message: {}", e);
                        None
                    }
                });

            messages.push(AgentMessage {
                id: row.get("id"),
                kind,
                content: row.get("content"),
                created_at: row.get("created_at"),
                usage,
                sources,
            });
        }

        Ok(messages)
    }

    /// Append one message and bump the session's `updated_at`. The first
    /// user message also titles the session when it still has the default
    /// title.
    pub async fn append_message(&self, session_id: &str, message: &AgentMessage) -> Result<()> {
        let now = Utc::now().timestamp();
        let sources_json = match &message.sources {
            Some(list) => Some(serde_json::to_string(list)?),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let seq: i64 =
            sqlx::query("SELECT COALESCE(MAX(seq), -1) + 1 AS next FROM messages WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?
                .get("next");

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, session_id, seq, kind, content, created_at,
                 prompt_tokens, completion_tokens, total_tokens, sources)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(session_id)
        .bind(seq)
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.usage.as_ref().map(|u| u.prompt_tokens))
        .bind(message.usage.as_ref().map(|u| u.completion_tokens))
        .bind(message.usage.as_ref().map(|u| u.total_tokens))
        .bind(sources_json)
        .execute(&mut *tx)
        .await?;

        if message.kind == MessageKind::User && seq == 0 {
            sqlx::query("UPDATE sessions SET title = ?, updated_at = ? WHERE id = ? AND title = ?")
                .bind(derive_title(&message.content))
                .bind(now)
                .bind(session_id)
                .bind(DEFAULT_TITLE)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a session and everything in it. Returns false when the id
    /// was unknown.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove trailing messages of the given kinds, stopping at the first
    /// message that doesn't match. Used before a retry to drop the failed
    /// attempt's ERROR/AI tail. Returns how many were removed.
    pub async fn remove_trailing(
        &self,
        session_id: &str,
        kinds: &[MessageKind],
    ) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT id, kind FROM messages WHERE session_id = ? ORDER BY seq DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut doomed = Vec::new();
        for row in &rows {
            let kind_str: String = row.get("kind");
            match MessageKind::parse(&kind_str) {
                Some(kind) if kinds.contains(&kind) => doomed.push(row.get::<String, _>("id")),
                _ => break,
            }
        }

        if doomed.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for id in &doomed {
            sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(doomed.len() as u64)
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> AgentSession {
    AgentSession {
        id: row.get("id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_message: row.get("last_message"),
        message_count: row.get("message_count"),
    }
}

/// First ~50 chars of the first user message, with an ellipsis when cut.
fn derive_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}
