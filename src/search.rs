//! `search` subcommand: retrieval without the agent loop.

use anyhow::{bail, Result};

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::models::SearchResult;
use crate::rerank::rerank;
use crate::store::VectorStore;

/// Stage-1 cosine retrieval plus the stage-2 filter. `k` overrides
/// `retrieval.final_top_k`; `no_rerank` skips stage 2 and returns raw
/// similarity order. Used by both the CLI and `POST /search`.
pub async fn query_hits(
    retrieval: &RetrievalConfig,
    store: &VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    k: Option<usize>,
    no_rerank: bool,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if !embedder.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let final_k = k.unwrap_or(retrieval.final_top_k);
    let fetch_k = retrieval.initial_top_k.max(final_k);

    let query_vec = embedder.embed_query(query).await?;
    let mut candidates = store.search(&query_vec, fetch_k as i64).await?;

    if no_rerank {
        candidates.truncate(final_k);
        return Ok(candidates);
    }

    Ok(rerank(
        candidates,
        final_k,
        retrieval.rerank_threshold,
        retrieval.score_gap_threshold,
    )
    .kept)
}

/// Run a query and print the hits with scores.
pub async fn run_search(
    retrieval: &RetrievalConfig,
    store: &VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    k: Option<usize>,
    no_rerank: bool,
) -> Result<()> {
    let hits = query_hits(retrieval, store, embedder, query, k, no_rerank).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {}/{})",
            i + 1,
            hit.similarity,
            hit.file_name,
            hit.chunk_index + 1,
            hit.total_chunks
        );
        println!("    origin: {}", hit.origin);
        println!("    \"{}\"", excerpt(&hit.text, 160));
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
