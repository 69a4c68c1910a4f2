//! Sliding-window text chunker.
//!
//! Splits source text into fixed-size windows with a configurable overlap
//! so that sentences straddling a window boundary stay retrievable from
//! either side. Windowing is done over characters, not bytes, so
//! multi-byte text never splits inside a code point.
//!
//! A trailing window shorter than `min_chunk_size` is folded into its
//! predecessor instead of being stored as a near-empty fragment.

use crate::config::ChunkingConfig;
use crate::models::DocumentChunk;

/// Split text into overlapping windows. Returns chunks with contiguous
/// indices starting at 0 and `total_chunks` set on every chunk. Blank
/// input yields no chunks.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<DocumentChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size.saturating_sub(config.overlap).max(1);

    let mut pieces: Vec<String> = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + config.chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        // A window falling entirely inside a whitespace run is dropped
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    // Fold a short trailing window into its predecessor
    if pieces.len() >= 2 {
        let tail_is_short = pieces
            .last()
            .map(|p| p.chars().count() < config.min_chunk_size)
            .unwrap_or(false);
        if tail_is_short {
            if let (Some(last), Some(prev)) = (pieces.pop(), pieces.pop()) {
                pieces.push(format!("{} {}", prev, last));
            }
        }
    }

    let total = pieces.len() as i64;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| DocumentChunk {
            text: piece,
            chunk_index: i as i64,
            total_chunks: total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, overlap: usize, min_chunk_size: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            overlap,
            min_chunk_size,
        }
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", &cfg(1000, 200, 100));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_blank_text_yields_no_chunks() {
        assert!(chunk_text("", &cfg(1000, 200, 100)).is_empty());
        assert!(chunk_text("   \n\t  ", &cfg(1000, 200, 100)).is_empty());
    }

    #[test]
    fn test_windows_advance_by_chunk_size_minus_overlap() {
        // 24 chars, chunk_size=10, overlap=3 => starts at 0, 7, 14
        let text = "abcdefghijklmnopqrstuvwx";
        let chunks = chunk_text(text, &cfg(10, 3, 1));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "abcdefghij");
        assert_eq!(chunks[1].text, "hijklmnopq");
        assert_eq!(chunks[2].text, "opqrstuvwx");
    }

    #[test]
    fn test_overlap_repeats_tail_of_previous_chunk() {
        let text = "abcdefghijklmnopqrstuvwx";
        let chunks = chunk_text(text, &cfg(10, 3, 1));
        assert!(chunks[1].text.starts_with("hij"));
        assert!(chunks[0].text.ends_with("hij"));
    }

    #[test]
    fn test_short_tail_merges_into_previous() {
        // Windows of 10/10/3; the 3-char tail is under min_chunk_size=5
        let text = "aaaaaaaaaabbbbbbbbbbccc";
        let chunks = chunk_text(text, &cfg(10, 0, 5));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aaaaaaaaaa");
        assert_eq!(chunks[1].text, "bbbbbbbbbb ccc");
        assert!(chunks.iter().all(|c| c.total_chunks == 2));
    }

    #[test]
    fn test_single_short_chunk_is_not_merged_away() {
        let chunks = chunk_text("ccc", &cfg(10, 0, 5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "ccc");
    }

    #[test]
    fn test_whitespace_only_window_is_dropped() {
        // Middle window falls entirely inside the whitespace run
        let text = format!("{}{}{}", "a".repeat(5), " ".repeat(5), "b".repeat(5));
        let chunks = chunk_text(&text, &cfg(5, 0, 1));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "aaaaa");
        assert_eq!(chunks[1].text, "bbbbb");
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_indices_contiguous_and_total_consistent() {
        let text = "word ".repeat(400);
        let chunks = chunk_text(&text, &cfg(100, 20, 10));
        assert!(chunks.len() > 1);
        let total = chunks.len() as i64;
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.total_chunks, total);
        }
    }

    #[test]
    fn test_zero_overlap_reconstructs_text() {
        let text = "abcdefghijklmnop";
        let chunks = chunk_text(text, &cfg(8, 0, 1));
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "привет мир это тест кириллицы";
        let chunks = chunk_text(text, &cfg(5, 2, 1));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.text.chars().count() <= 5);
        }
    }
}
