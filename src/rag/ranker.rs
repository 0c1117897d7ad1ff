//! Re-scoring, de-duplication and ordering of raw similarity hits

use super::analyzer::extract_key_terms;
use super::models::{normalize_text, RankedResult, RankingFactors, SearchHit};
use crate::config::RankingConfig;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Per-call ranking parameters
#[derive(Debug, Clone, Copy)]
pub struct RankOptions {
    pub score_threshold: f32,
    pub limit: usize,
}

/// Ranker applying keyword, length and recency heuristics on top of similarity
pub struct SearchResultRanker {
    config: RankingConfig,
    highlight_length: usize,
}

impl SearchResultRanker {
    pub fn new(config: RankingConfig, highlight_length: usize) -> Self {
        Self {
            config,
            highlight_length,
        }
    }

    /// Rank hits against the current time
    pub fn rank(&self, hits: Vec<SearchHit>, raw_query: &str, options: RankOptions) -> Vec<RankedResult> {
        self.rank_at(hits, raw_query, options, Utc::now())
    }

    /// Rank hits as if evaluated at `now`
    pub fn rank_at(&self, hits: Vec<SearchHit>, raw_query: &str, options: RankOptions, now: DateTime<Utc>) -> Vec<RankedResult> {
        let terms = extract_key_terms(raw_query);

        let kept = dedupe(
            hits.into_iter()
                .filter(|hit| hit.score >= options.score_threshold)
                .collect(),
        );

        let mut ranked: Vec<RankedResult> = kept
            .into_iter()
            .map(|hit| {
                let factors = self.factors(&hit, &terms, now);
                let adjusted = (factors.base + factors.keyword + factors.length + factors.recency).clamp(0.0, 1.0);
                let highlight = highlight(&hit.content, &terms, self.highlight_length);
                RankedResult {
                    hit,
                    adjusted_score: adjusted,
                    rank: 0,
                    factors,
                    highlight,
                }
            })
            .collect();

        ranked.sort_by(compare_ranked);
        ranked.truncate(options.limit);
        for (index, result) in ranked.iter_mut().enumerate() {
            result.rank = index + 1;
        }

        ranked
    }

    /// Individual score contributions for a hit
    pub fn factors(&self, hit: &SearchHit, terms: &[String], now: DateTime<Utc>) -> RankingFactors {
        RankingFactors {
            base: hit.score,
            keyword: self.keyword_bonus(&hit.content, terms),
            length: self.length_bonus(hit.content.chars().count()),
            recency: self.recency_bonus(hit.metadata.document_created_at, now),
        }
    }

    fn keyword_bonus(&self, content: &str, terms: &[String]) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }
        let content = content.to_lowercase();
        let matched = terms.iter().filter(|t| content.contains(t.as_str())).count();
        matched as f32 / terms.len() as f32 * self.config.max_keyword_bonus
    }

    fn length_bonus(&self, length: usize) -> f32 {
        if length < self.config.min_length {
            self.config.short_penalty
        } else if length > self.config.max_length {
            self.config.long_penalty
        } else {
            self.config.length_bonus
        }
    }

    fn recency_bonus(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
        match created_at {
            Some(created) if now - created < Duration::days(self.config.recency_window_days) => self.config.recency_bonus,
            _ => 0.0,
        }
    }
}

/// Stable hash of normalized fragment content
pub fn content_hash(content: &str) -> String {
    let normalized = normalize_text(&content.to_lowercase());
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Keep the highest-scoring hit per fragment id and per content hash
fn dedupe(mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.fragment_id.cmp(&b.fragment_id))
    });

    let mut ids = HashSet::new();
    let mut hashes = HashMap::new();
    hits.into_iter()
        .filter(|hit| ids.insert(hit.fragment_id.clone()))
        .filter(|hit| hashes.insert(content_hash(&hit.content), ()).is_none())
        .collect()
}

fn compare_ranked(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.adjusted_score
        .partial_cmp(&a.adjusted_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.hit.score.partial_cmp(&a.hit.score).unwrap_or(Ordering::Equal))
        .then_with(|| a.hit.fragment_id.cmp(&b.hit.fragment_id))
}

/// Window of `length` characters containing the most query-term matches
///
/// Windows start at word boundaries; `...` marks text cut at either end.
pub fn highlight(content: &str, terms: &[String], length: usize) -> Option<String> {
    if content.is_empty() || length == 0 {
        return None;
    }

    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= length {
        return Some(content.to_string());
    }

    let lowered: Vec<char> = content.to_lowercase().chars().collect();
    // Lower-casing can change the length of some scripts; fall back to the prefix
    let searchable = lowered.len() == chars.len();

    let mut best_start = 0;
    let mut best_hits = 0;
    if searchable && !terms.is_empty() {
        let word_starts = (0..chars.len()).filter(|&i| i == 0 || (!chars[i - 1].is_alphanumeric() && chars[i].is_alphanumeric()));
        for start in word_starts {
            let end = (start + length).min(chars.len());
            let window: String = lowered[start..end].iter().collect();
            let hits: usize = terms.iter().map(|t| window.matches(t.as_str()).count()).sum();
            if hits > best_hits {
                best_hits = hits;
                best_start = start;
            }
        }
    }

    let end = (best_start + length).min(chars.len());
    let mut snippet: String = chars[best_start..end].iter().collect();
    if best_start > 0 {
        snippet.insert_str(0, "...");
    }
    if end < chars.len() {
        snippet.push_str("...");
    }
    Some(snippet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::SourceMetadata;

    fn hit(id: &str, content: &str, score: f32) -> SearchHit {
        SearchHit {
            fragment_id: id.to_string(),
            document_id: format!("doc-{}", id),
            content: content.to_string(),
            score,
            metadata: SourceMetadata {
                document_name: format!("{}.pdf", id),
                position: 0,
                owner_id: "owner".to_string(),
                mime_type: Some("application/pdf".to_string()),
                file_size: Some(1024),
                document_created_at: None,
            },
        }
    }

    fn ranker() -> SearchResultRanker {
        SearchResultRanker::new(RankingConfig::default(), 200)
    }

    fn options(limit: usize) -> RankOptions {
        RankOptions {
            score_threshold: 0.7,
            limit,
        }
    }

    fn medium(text: &str) -> String {
        format!("{} {}", text, "filler ".repeat(20))
    }

    #[test]
    fn test_threshold_filters_hits() {
        let hits = vec![hit("a", &medium("alpha"), 0.9), hit("b", &medium("beta"), 0.5)];
        let ranked = ranker().rank(hits, "anything", options(10));

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].hit.fragment_id, "a");
    }

    #[test]
    fn test_dedupes_by_id_and_content() {
        let hits = vec![
            hit("a", &medium("same text"), 0.8),
            hit("b", &medium("Same   TEXT"), 0.9),
            hit("c", &medium("other"), 0.75),
            hit("c", &medium("other again"), 0.85),
        ];
        let ranked = ranker().rank(hits, "text", options(10));

        let ids: Vec<&str> = ranked.iter().map(|r| r.hit.fragment_id.as_str()).collect();
        assert_eq!(ranked.len(), 2);
        assert!(ids.contains(&"b"));
        assert!(!ids.contains(&"a"));
        let c = ranked.iter().find(|r| r.hit.fragment_id == "c").unwrap();
        assert_eq!(c.hit.score, 0.85);
    }

    #[test]
    fn test_keyword_bonus_and_ordering() {
        let hits = vec![
            hit("plain", &medium("nothing relevant here"), 0.80),
            hit("match", &medium("refund policy details"), 0.78),
        ];
        let ranked = ranker().rank(hits, "refund policy", options(10));

        assert_eq!(ranked[0].hit.fragment_id, "match");
        assert!((ranked[0].factors.keyword - 0.3).abs() < 1e-6);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert!(ranked[0].adjusted_score >= ranked[1].adjusted_score);
    }

    #[test]
    fn test_length_factors() {
        let r = ranker();
        assert_eq!(r.length_bonus(50), -0.1);
        assert_eq!(r.length_bonus(500), 0.05);
        assert_eq!(r.length_bonus(5000), -0.05);
    }

    #[test]
    fn test_recency_bonus() {
        let now = Utc::now();
        let mut fresh = hit("fresh", &medium("x"), 0.8);
        fresh.metadata.document_created_at = Some(now - Duration::days(3));
        let mut stale = hit("stale", &medium("y"), 0.8);
        stale.metadata.document_created_at = Some(now - Duration::days(90));

        let ranked = ranker().rank_at(vec![stale, fresh], "", options(10), now);
        assert_eq!(ranked[0].hit.fragment_id, "fresh");
        assert_eq!(ranked[0].factors.recency, 0.05);
        assert_eq!(ranked[1].factors.recency, 0.0);
    }

    #[test]
    fn test_score_clamped_and_ties_broken_by_id() {
        let hits = vec![
            hit("b", &medium("refund"), 0.99),
            hit("a", &medium("refund again"), 0.99),
        ];
        let ranked = ranker().rank(hits, "refund", options(10));

        assert!(ranked.iter().all(|r| r.adjusted_score <= 1.0));
        assert_eq!(ranked[0].hit.fragment_id, "a");
    }

    #[test]
    fn test_truncates_to_limit_and_ranks_from_one() {
        let hits: Vec<SearchHit> = (0..8)
            .map(|i| hit(&format!("f{}", i), &medium(&format!("content {}", i)), 0.7 + i as f32 * 0.03))
            .collect();
        let ranked = ranker().rank(hits, "content", options(3));

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(ranked.windows(2).all(|w| w[0].adjusted_score >= w[1].adjusted_score));
    }

    #[test]
    fn test_highlight_picks_densest_window() {
        let content = format!("{} refund policy applies to refund requests {}", "intro ".repeat(60), "outro ".repeat(60));
        let snippet = highlight(&content, &["refund".to_string()], 60).unwrap();

        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.matches("refund").count(), 2);
        assert_eq!(snippet.chars().count(), 66);
    }

    #[test]
    fn test_highlight_short_content_unchanged() {
        assert_eq!(highlight("short", &[], 200).as_deref(), Some("short"));
        assert_eq!(highlight("", &[], 200), None);
    }
}
