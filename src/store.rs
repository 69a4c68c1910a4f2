//! SQLite-backed vector store.
//!
//! Files and their chunks live in two tables; embeddings are stored as
//! little-endian f32 BLOBs on the chunk rows and stay NULL until a vector
//! has been computed. Search is a linear scan with cosine similarity in
//! Rust — no ANN index, which is fine at the corpus sizes this tool
//! targets (thousands of chunks, not millions).

use anyhow::{bail, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::AgentError;
use crate::models::{DocumentChunk, IndexedFile, SearchResult};

/// What `upsert_file` did with the incoming content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New file row created, chunks inserted.
    Inserted,
    /// Checksum changed: old chunks dropped, new set inserted.
    Replaced,
    /// Checksum identical: nothing touched, existing vectors kept.
    Unchanged,
}

/// A chunk id paired with its text, for embedding backfill.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub id: String,
    pub text: String,
}

/// Index summary for `agt stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub files: i64,
    pub chunks: i64,
    pub embedded: i64,
    pub last_indexed: Option<i64>,
}

#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace one file and its chunks.
    ///
    /// The checksum (SHA-256 of the content) is the re-index key: when a
    /// row with the same origin already carries the same checksum the call
    /// is a no-op and existing chunk rows — including any embeddings — are
    /// left untouched. Otherwise the old chunks are deleted and the new
    /// set inserted in one transaction, so readers never observe a
    /// partially replaced file.
    ///
    /// Returns the file id, the ids of the file's chunk rows (in
    /// chunk_index order; the current rows when unchanged), and what
    /// happened.
    pub async fn upsert_file(
        &self,
        name: &str,
        origin: &str,
        content: &str,
        chunks: &[DocumentChunk],
    ) -> Result<(String, Vec<String>, UpsertOutcome)> {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let checksum = format!("{:x}", hasher.finalize());

        let existing = sqlx::query("SELECT id, checksum FROM files WHERE origin = ?")
            .bind(origin)
            .fetch_optional(&self.pool)
            .await?;

        let now = chrono::Utc::now().timestamp();

        let (file_id, outcome) = match existing {
            Some(row) => {
                let id: String = row.get("id");
                let old_checksum: String = row.get("checksum");
                if old_checksum == checksum {
                    let ids = self.chunk_ids(&id).await?;
                    return Ok((id, ids, UpsertOutcome::Unchanged));
                }
                (id, UpsertOutcome::Replaced)
            }
            None => (Uuid::new_v4().to_string(), UpsertOutcome::Inserted),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (id, name, origin, checksum, size_bytes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(origin) DO UPDATE SET
                name = excluded.name,
                checksum = excluded.checksum,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&file_id)
        .bind(name)
        .bind(origin)
        .bind(&checksum)
        .bind(content.len() as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(&file_id)
            .execute(&mut *tx)
            .await?;

        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO chunks (id, file_id, chunk_index, total_chunks, text, embedding)
                VALUES (?, ?, ?, ?, ?, NULL)
                "#,
            )
            .bind(&chunk_id)
            .bind(&file_id)
            .bind(chunk.chunk_index)
            .bind(chunk.total_chunks)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
            chunk_ids.push(chunk_id);
        }

        tx.commit().await?;

        Ok((file_id, chunk_ids, outcome))
    }

    async fn chunk_ids(&self, file_id: &str) -> Result<Vec<String>> {
        let rows =
            sqlx::query("SELECT id FROM chunks WHERE file_id = ? ORDER BY chunk_index ASC")
                .bind(file_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    /// Store one chunk's embedding vector.
    pub async fn set_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(vector))
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Chunks still waiting for a vector, oldest file first.
    pub async fn pending_chunks(&self, limit: i64) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.text
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE c.embedding IS NULL
            ORDER BY f.updated_at ASC, c.chunk_index ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                id: row.get("id"),
                text: row.get("text"),
            })
            .collect())
    }

    pub async fn count_pending(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Drop every stored vector (used by `embed rebuild`).
    pub async fn clear_embeddings(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE chunks SET embedding = NULL")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Cosine-similarity scan over every embedded chunk.
    ///
    /// Chunks without vectors are skipped. Results come back ordered by
    /// similarity descending; ties broken by smaller chunk_index, then
    /// smaller file id, so the same query against an unchanged store
    /// always returns the identical list. `k <= 0` yields nothing.
    pub async fn search(&self, query_vec: &[f32], k: i64) -> Result<Vec<SearchResult>> {
        if k <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.file_id, c.chunk_index, c.total_chunks, c.text, c.embedding,
                   f.name, f.origin
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE c.embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            if vec.len() != query_vec.len() {
                bail!(AgentError::EmbeddingDimensionMismatch {
                    expected: query_vec.len(),
                    got: vec.len(),
                });
            }
            let similarity = cosine_similarity(query_vec, &vec);
            results.push(SearchResult {
                file_id: row.get("file_id"),
                file_name: row.get("name"),
                origin: row.get("origin"),
                chunk_index: row.get("chunk_index"),
                total_chunks: row.get("total_chunks"),
                text: row.get("text"),
                similarity,
            });
        }

        // Similarity desc, then chunk_index asc, then file id asc.
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
                .then(a.file_id.cmp(&b.file_id))
        });
        results.truncate(k as usize);

        Ok(results)
    }

    /// Delete one file (matched by id or origin) and its chunks.
    /// Returns the deleted row, or None when nothing matched.
    pub async fn delete_file(&self, key: &str) -> Result<Option<IndexedFile>> {
        let found = self.find_file(key).await?;
        let Some(file) = found else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(&file.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(&file.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(file))
    }

    async fn find_file(&self, key: &str) -> Result<Option<IndexedFile>> {
        let row = sqlx::query(
            r#"
            SELECT f.id, f.name, f.origin, f.checksum, f.size_bytes,
                   f.created_at, f.updated_at,
                   (SELECT COUNT(*) FROM chunks WHERE file_id = f.id) AS chunk_count
            FROM files f
            WHERE f.id = ? OR f.origin = ?
            "#,
        )
        .bind(key)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| row_to_file(&r)))
    }

    /// All indexed files, most recently indexed first.
    pub async fn list_files(&self) -> Result<Vec<IndexedFile>> {
        let rows = sqlx::query(
            r#"
            SELECT f.id, f.name, f.origin, f.checksum, f.size_bytes,
                   f.created_at, f.updated_at,
                   (SELECT COUNT(*) FROM chunks WHERE file_id = f.id) AS chunk_count
            FROM files f
            ORDER BY f.updated_at DESC, f.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_file).collect())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embedded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        let last_indexed: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM files")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            files,
            chunks,
            embedded,
            last_indexed,
        })
    }
}

fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> IndexedFile {
    IndexedFile {
        id: row.get("id"),
        name: row.get("name"),
        origin: row.get("origin"),
        checksum: row.get("checksum"),
        size_bytes: row.get("size_bytes"),
        chunk_count: row.get("chunk_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
