//! `embed` subcommand: vector backfill and rebuild.
//!
//! Chunks are written with NULL embeddings whenever the provider is
//! disabled or a batch fails mid-index; `embed pending` picks them up
//! later, `embed rebuild` drops every vector and regenerates (for
//! provider or model changes).

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::DocumentChunk;
use crate::store::VectorStore;

/// Embed every chunk still missing a vector.
pub async fn run_embed_pending(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
) -> Result<()> {
    if !embedder.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pending = store.pending_chunks(i64::MAX).await?;

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks embedded");
        return Ok(());
    }

    let total = pending.len();
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    store.set_embedding(&item.id, vec).await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    Ok(())
}

/// Drop every stored vector and regenerate from chunk text.
pub async fn run_embed_rebuild(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
) -> Result<()> {
    if !embedder.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let cleared = store.clear_embeddings().await?;
    println!("embed rebuild");
    println!("  cleared: {}", cleared);

    let pending = store.pending_chunks(i64::MAX).await?;
    if pending.is_empty() {
        println!("  no chunks to embed");
        return Ok(());
    }

    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        match embedder.embed_batch(&texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    store.set_embedding(&item.id, vec).await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                failed += batch.len() as u64;
            }
        }
    }

    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    Ok(())
}

/// Embed freshly written chunks during indexing. Non-fatal: anything
/// that cannot be embedded stays NULL for `embed pending` to pick up.
/// Returns (embedded, pending) counts.
pub async fn embed_chunks_inline(
    store: &VectorStore,
    embedder: &dyn Embedder,
    batch_size: usize,
    chunk_ids: &[String],
    chunks: &[DocumentChunk],
) -> (u64, u64) {
    if !embedder.is_enabled() {
        return (0, chunk_ids.len() as u64);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let step = batch_size.max(1);
    let mut embedded = 0u64;
    let mut pending = 0u64;

    for (id_batch, text_batch) in chunk_ids.chunks(step).zip(texts.chunks(step)) {
        match embedder.embed_batch(text_batch).await {
            Ok(vectors) => {
                for (id, vec) in id_batch.iter().zip(vectors.iter()) {
                    match store.set_embedding(id, vec).await {
                        Ok(()) => embedded += 1,
                        Err(e) => {
                            eprintln!("Warning: failed to store embedding for {}: {}", id, e);
                            pending += 1;
                        }
                    }
                }
            }
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                pending += id_batch.len() as u64;
            }
        }
    }

    (embedded, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::EmbeddingClient;
    use crate::{db, migrate};
    use async_trait::async_trait;

    /// Deterministic embedder: vector derived from text length.
    struct FixedEmbedder {
        dims: usize,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn is_enabled(&self) -> bool {
            true
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    v[0] = t.chars().count() as f32;
                    v
                })
                .collect())
        }
    }

    /// Always fails, as a provider outage would.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn is_enabled(&self) -> bool {
            true
        }

        fn dims(&self) -> usize {
            3
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("provider offline")
        }
    }

    async fn seeded_store(texts: &[&str]) -> (tempfile::TempDir, VectorStore, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("store.db")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = VectorStore::new(pool);

        let total = texts.len() as i64;
        let chunks: Vec<DocumentChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| DocumentChunk {
                text: t.to_string(),
                chunk_index: i as i64,
                total_chunks: total,
            })
            .collect();
        let (_, ids, _) = store
            .upsert_file("doc.md", "/doc.md", &texts.join(" "), &chunks)
            .await
            .unwrap();
        (dir, store, ids)
    }

    fn doc_chunks(texts: &[&str]) -> Vec<DocumentChunk> {
        let total = texts.len() as i64;
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| DocumentChunk {
                text: t.to_string(),
                chunk_index: i as i64,
                total_chunks: total,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_inline_disabled_reports_all_pending() {
        let (_dir, store, ids) = seeded_store(&["one", "two"]).await;
        let disabled = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();

        let (embedded, pending) =
            embed_chunks_inline(&store, &disabled, 64, &ids, &doc_chunks(&["one", "two"])).await;
        assert_eq!(embedded, 0);
        assert_eq!(pending, 2);
        assert_eq!(store.count_pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_inline_writes_vectors() {
        let (_dir, store, ids) = seeded_store(&["one", "two", "three"]).await;
        let embedder = FixedEmbedder { dims: 3 };

        let (embedded, pending) = embed_chunks_inline(
            &store,
            &embedder,
            2,
            &ids,
            &doc_chunks(&["one", "two", "three"]),
        )
        .await;
        assert_eq!(embedded, 3);
        assert_eq!(pending, 0);
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inline_provider_failure_leaves_chunks_pending() {
        let (_dir, store, ids) = seeded_store(&["one", "two"]).await;

        let (embedded, pending) =
            embed_chunks_inline(&store, &BrokenEmbedder, 64, &ids, &doc_chunks(&["one", "two"]))
                .await;
        assert_eq!(embedded, 0);
        assert_eq!(pending, 2);
        assert_eq!(store.count_pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_backfill_embeds_only_missing() {
        let (_dir, store, ids) = seeded_store(&["one", "two", "three"]).await;
        store.set_embedding(&ids[0], &[9.0, 0.0, 0.0]).await.unwrap();

        let config = test_config();
        run_embed_pending(&config, &store, &FixedEmbedder { dims: 3 })
            .await
            .unwrap();

        assert_eq!(store.count_pending().await.unwrap(), 0);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.embedded, 3);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_all_vectors() {
        let (_dir, store, ids) = seeded_store(&["one", "two"]).await;
        store.set_embedding(&ids[0], &[9.0, 9.0, 9.0]).await.unwrap();

        let config = test_config();
        run_embed_rebuild(&config, &store, &FixedEmbedder { dims: 3 })
            .await
            .unwrap();

        assert_eq!(store.count_pending().await.unwrap(), 0);
        // The old hand-written vector is gone: search against the
        // regenerated space ranks by text length, not by the stale 9s.
        let hits = store.search(&[5.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_an_error_for_backfill() {
        let (_dir, store, _ids) = seeded_store(&["one"]).await;
        let disabled = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();

        let config = test_config();
        let err = run_embed_pending(&config, &store, &disabled)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    fn test_config() -> Config {
        use crate::config::*;
        Config {
            db: DbConfig {
                path: "unused.db".into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            indexing: IndexingConfig::default(),
            server: ServerConfig::default(),
            tools: Vec::new(),
        }
    }
}
