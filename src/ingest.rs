//! Indexing pipeline: targets in, chunked documents out.
//!
//! `index` accepts file paths, directories (walked recursively, honoring
//! the configured include/exclude globs), and URLs (fetched and converted
//! from HTML to plain text). Each document is chunked and upserted into
//! the store keyed by origin; the checksum decides whether anything is
//! rewritten. Embedding happens inline but never aborts a run — chunks
//! that cannot be embedded stay NULL until `embed pending`.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{Config, IndexingConfig};
use crate::embed_cmd;
use crate::embedding::Embedder;
use crate::extract;
use crate::store::{UpsertOutcome, VectorStore};

/// Directories that never belong in a retrieval corpus.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Counters for one `index` run.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexSummary {
    pub inserted: u64,
    pub replaced: u64,
    pub unchanged: u64,
    /// Targets with no extractable text.
    pub skipped: u64,
    /// Targets that could not be read or fetched.
    pub failed: u64,
    pub chunks: u64,
    pub embedded: u64,
    pub pending: u64,
}

/// Index every target, print a summary, and return the counters.
/// Per-target failures are warnings, not errors; only setup problems
/// (bad glob config, no usable HTTP client) abort the run.
pub async fn run_index(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
    paths: &[PathBuf],
    urls: &[String],
) -> Result<IndexSummary> {
    let mut summary = IndexSummary::default();

    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(collect_files(path, &config.indexing)?);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            eprintln!("Warning: {} does not exist, skipping", path.display());
            summary.failed += 1;
        }
    }

    for path in &files {
        if let Err(e) = index_file(config, store, embedder, path, &mut summary).await {
            eprintln!("Warning: failed to index {}: {:#}", path.display(), e);
            summary.failed += 1;
        }
    }

    if !urls.is_empty() {
        let client = reqwest::Client::builder()
            .timeout(URL_FETCH_TIMEOUT)
            .build()?;
        for url in urls {
            if let Err(e) = index_url(config, store, embedder, &client, url, &mut summary).await {
                eprintln!("Warning: failed to index {}: {:#}", url, e);
                summary.failed += 1;
            }
        }
    }

    println!("index");
    println!(
        "  indexed: {} new, {} replaced, {} unchanged",
        summary.inserted, summary.replaced, summary.unchanged
    );
    println!("  chunks written: {}", summary.chunks);
    if embedder.is_enabled() {
        println!("  embeddings written: {}", summary.embedded);
        println!("  embeddings pending: {}", summary.pending);
    }
    if summary.skipped > 0 {
        println!("  skipped (no text): {}", summary.skipped);
    }
    if summary.failed > 0 {
        println!("  failed: {}", summary.failed);
    }
    println!("ok");

    Ok(summary)
}

async fn index_file(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
    path: &Path,
    summary: &mut IndexSummary,
) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    // Origin is the canonical path so re-indexing through a different
    // relative spelling dedupes onto the same row.
    let origin = std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| origin.clone());

    index_document(config, store, embedder, &name, &origin, &content, summary).await
}

async fn index_url(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
    client: &reqwest::Client,
    url: &str,
    summary: &mut IndexSummary,
) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("unsupported URL scheme: {}", url);
    }

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {} from {}", status, url);
    }

    let is_plain_text = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/plain"))
        .unwrap_or(false);

    let body = response.text().await?;
    let content = if is_plain_text {
        body
    } else {
        extract::html_to_text(&body)
    };
    let name = extract::title_from_url(url);

    index_document(config, store, embedder, &name, url, &content, summary).await
}

async fn index_document(
    config: &Config,
    store: &VectorStore,
    embedder: &dyn Embedder,
    name: &str,
    origin: &str,
    content: &str,
    summary: &mut IndexSummary,
) -> Result<()> {
    let chunks = chunk_text(content, &config.chunking);
    if chunks.is_empty() {
        eprintln!("Warning: no text extracted from {}, skipping", origin);
        summary.skipped += 1;
        return Ok(());
    }

    let (_file_id, chunk_ids, outcome) = store.upsert_file(name, origin, content, &chunks).await?;

    match outcome {
        UpsertOutcome::Inserted => summary.inserted += 1,
        UpsertOutcome::Replaced => summary.replaced += 1,
        UpsertOutcome::Unchanged => {
            // Existing chunk rows and vectors were kept; nothing to embed.
            summary.unchanged += 1;
            return Ok(());
        }
    }

    summary.chunks += chunks.len() as u64;

    let (embedded, pending) = embed_cmd::embed_chunks_inline(
        store,
        embedder,
        config.embedding.batch_size,
        &chunk_ids,
        &chunks,
    )
    .await;
    summary.embedded += embedded;
    summary.pending += pending;

    Ok(())
}

/// Walk a directory, keeping files matched by the include globs and not
/// matched by the exclude globs (both applied to the path relative to
/// the walk root). Output is sorted for deterministic runs.
fn collect_files(root: &Path, indexing: &IndexingConfig) -> Result<Vec<PathBuf>> {
    let include = build_globset(&indexing.include_globs)?;

    let mut exclude_patterns: Vec<String> =
        DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    exclude_patterns.extend(indexing.exclude_globs.iter().cloned());
    let exclude = build_globset(&exclude_patterns)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(indexing.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                eprintln!("Warning: skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if exclude.is_match(relative) {
            continue;
        }
        if !include.is_match(relative) {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("Invalid glob pattern: '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
