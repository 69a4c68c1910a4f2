//! `files` and `forget` subcommands: what's indexed, and removing it.

use anyhow::{bail, Result};

use crate::store::VectorStore;

/// List every indexed file with its chunk count, size, and last update.
pub async fn run_files(store: &VectorStore) -> Result<()> {
    let files = store.list_files().await?;

    if files.is_empty() {
        println!("No files indexed.");
        return Ok(());
    }

    println!(
        "{:<10} {:<40} {:>7} {:>9}   {:<16} {}",
        "ID", "NAME", "CHUNKS", "SIZE", "UPDATED", "ORIGIN"
    );
    for file in &files {
        println!(
            "{:<10} {:<40} {:>7} {:>9}   {:<16} {}",
            short_id(&file.id),
            file.name,
            file.chunk_count,
            format_size(file.size_bytes),
            format_ts(file.updated_at),
            file.origin
        );
    }
    println!();
    println!("{} file(s) indexed", files.len());

    Ok(())
}

/// Delete one indexed file (and its chunks) by origin, name, or id.
pub async fn run_forget(store: &VectorStore, key: &str) -> Result<()> {
    match store.delete_file(key).await? {
        Some(file) => {
            println!(
                "forgot {} ({} chunk{})",
                file.name,
                file.chunk_count,
                if file.chunk_count == 1 { "" } else { "s" }
            );
            Ok(())
        }
        None => bail!("No indexed file matches '{}'", key),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_size(bytes: i64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
