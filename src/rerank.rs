//! Second-stage filtering of retrieval results.
//!
//! A pure function over the similarity-descending candidate list — no
//! network, no model. Three passes:
//!
//! 1. drop everything below `rerank_threshold`;
//! 2. cut at the first score gap wider than `score_gap_threshold` (a steep
//!    drop usually separates the genuinely relevant chunks from the noise
//!    floor);
//! 3. truncate to `final_top_k`.

use crate::models::SearchResult;

/// What the rerank pass kept and why the rest went away.
#[derive(Debug)]
pub struct RerankOutcome {
    pub kept: Vec<SearchResult>,
    pub dropped_below_threshold: usize,
    pub dropped_by_gap: usize,
    pub dropped_by_limit: usize,
}

/// Filter a similarity-descending result list down to the chunks worth
/// putting in front of the model.
pub fn rerank(
    results: Vec<SearchResult>,
    final_k: usize,
    threshold: f32,
    score_gap: f32,
) -> RerankOutcome {
    let before = results.len();

    let mut kept: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| r.similarity >= threshold)
        .collect();
    let dropped_below_threshold = before - kept.len();

    // Cut at the first gap wider than score_gap. The list is already
    // similarity-descending, so everything past the gap is noise.
    let mut cut = kept.len();
    for i in 0..kept.len().saturating_sub(1) {
        if kept[i].similarity - kept[i + 1].similarity > score_gap {
            cut = i + 1;
            break;
        }
    }
    let dropped_by_gap = kept.len() - cut;
    kept.truncate(cut);

    let dropped_by_limit = kept.len().saturating_sub(final_k);
    kept.truncate(final_k);

    RerankOutcome {
        kept,
        dropped_below_threshold,
        dropped_by_gap,
        dropped_by_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_result(text: &str, similarity: f32) -> SearchResult {
        SearchResult {
            file_id: "f1".to_string(),
            file_name: "a.md".to_string(),
            origin: "/a.md".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            text: text.to_string(),
            similarity,
        }
    }

    #[test]
    fn test_threshold_drops_weak_results() {
        let results = vec![
            make_result("strong", 0.9),
            make_result("ok", 0.6),
            make_result("weak", 0.3),
        ];
        let outcome = rerank(results, 10, 0.5, 1.0);
        assert_eq!(outcome.kept.len(), 2);
        assert_eq!(outcome.dropped_below_threshold, 1);
        assert_eq!(outcome.dropped_by_gap, 0);
    }

    #[test]
    fn test_gap_cut_keeps_head_of_list() {
        let results = vec![
            make_result("a", 0.95),
            make_result("b", 0.90),
            make_result("c", 0.60), // 0.30 gap to b
            make_result("d", 0.55),
        ];
        let outcome = rerank(results, 10, 0.5, 0.15);
        assert_eq!(outcome.kept.len(), 2);
        assert_eq!(outcome.kept[1].text, "b");
        assert_eq!(outcome.dropped_by_gap, 2);
    }

    #[test]
    fn test_gap_right_after_first_result() {
        let results = vec![make_result("a", 0.95), make_result("b", 0.55)];
        let outcome = rerank(results, 10, 0.5, 0.15);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].text, "a");
    }

    #[test]
    fn test_final_k_truncates() {
        let results = vec![
            make_result("a", 0.9),
            make_result("b", 0.89),
            make_result("c", 0.88),
            make_result("d", 0.87),
        ];
        let outcome = rerank(results, 2, 0.5, 0.5);
        assert_eq!(outcome.kept.len(), 2);
        assert_eq!(outcome.dropped_by_limit, 2);
    }

    #[test]
    fn test_everything_below_threshold() {
        let results = vec![make_result("a", 0.2), make_result("b", 0.1)];
        let outcome = rerank(results, 3, 0.5, 0.15);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped_below_threshold, 2);
    }

    #[test]
    fn test_empty_input() {
        let outcome = rerank(Vec::new(), 3, 0.5, 0.15);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped_below_threshold, 0);
    }

    #[test]
    fn test_tight_scores_pass_untouched() {
        let results = vec![
            make_result("a", 0.80),
            make_result("b", 0.78),
            make_result("c", 0.76),
        ];
        let outcome = rerank(results, 3, 0.5, 0.15);
        assert_eq!(outcome.kept.len(), 3);
        assert_eq!(outcome.dropped_by_gap, 0);
        assert_eq!(outcome.dropped_by_limit, 0);
    }
}
