//! Data models for retrieval: queries, hits, ranked results and responses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

/// Inclusive document creation range
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Inclusive file size range in bytes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SizeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

/// Optional restrictions applied to a search
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    /// Mime types or file extensions to include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<SizeRange>,

    /// Restrict to specific documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
}

impl SearchFilters {
    /// Canonical form: lower-cased, sorted and de-duplicated lists
    pub fn normalized(&self) -> Self {
        let mut document_types: Vec<String> = self
            .document_types
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        document_types.sort();
        document_types.dedup();

        let mut document_ids = self.document_ids.clone();
        document_ids.sort();
        document_ids.dedup();

        Self {
            document_types,
            date_range: self.date_range.clone().filter(|r| r.start.is_some() || r.end.is_some()),
            file_size: self.file_size.clone().filter(|r| r.min.is_some() || r.max.is_some()),
            document_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.normalized() == Self::default()
    }
}

/// Metadata describing where a fragment came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceMetadata {
    pub document_name: String,
    /// Position of the fragment within its document
    pub position: u32,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_created_at: Option<DateTime<Utc>>,
}

/// Raw similarity hit returned by a vector store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub fragment_id: String,
    pub document_id: String,
    pub content: String,
    /// Raw similarity score
    pub score: f32,
    pub metadata: SourceMetadata,
}

/// Contribution of each heuristic to the adjusted score
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RankingFactors {
    pub base: f32,
    pub keyword: f32,
    pub length: f32,
    pub recency: f32,
}

/// A hit after re-scoring and ranking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    #[serde(flatten)]
    pub hit: SearchHit,
    pub adjusted_score: f32,
    /// 1-based rank position
    pub rank: usize,
    pub factors: RankingFactors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

/// Caller-supplied search options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub filters: SearchFilters,
}

fn default_true() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            score_threshold: None,
            use_cache: true,
            filters: SearchFilters::default(),
        }
    }
}

/// Timing and score statistics for one search
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchStats {
    pub total: usize,
    pub cached: bool,
    pub took_ms: u64,
    pub vectorize_ms: u64,
    pub store_ms: u64,
    pub rank_ms: u64,
    /// Hits the store returned before ranking
    pub candidates: usize,
    pub avg_score: f32,
    pub max_score: f32,
    pub min_score: f32,
}

impl SearchStats {
    /// Fill in the score aggregates from a result set
    pub fn with_scores(mut self, results: &[RankedResult]) -> Self {
        self.total = results.len();
        if results.is_empty() {
            return self;
        }

        let scores = results.iter().map(|r| r.adjusted_score);
        self.max_score = scores.clone().fold(f32::MIN, f32::max);
        self.min_score = scores.clone().fold(f32::MAX, f32::min);
        self.avg_score = scores.sum::<f32>() / results.len() as f32;
        self
    }
}

/// Ranked results for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<RankedResult>,
    pub stats: SearchStats,
}

/// A single search request bound to its caller
///
/// The embedding is computed at most once per query instance.
#[derive(Debug)]
pub struct Query {
    pub raw: String,
    pub normalized: String,
    pub owner_id: String,
    pub filters: SearchFilters,
    embedding: OnceCell<Vec<f32>>,
}

impl Query {
    pub fn new(owner_id: impl Into<String>, raw: impl Into<String>, filters: SearchFilters) -> Self {
        let raw = raw.into();
        Self {
            normalized: normalize_text(&raw),
            raw,
            owner_id: owner_id.into(),
            filters: filters.normalized(),
            embedding: OnceCell::new(),
        }
    }

    pub(crate) fn embedding_cell(&self) -> &OnceCell<Vec<f32>> {
        &self.embedding
    }

    /// Embedding, if it has been computed
    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }
}

/// Collapse runs of whitespace into single spaces and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  what   is\n\tthe  policy "), "what is the policy");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_filters_normalized() {
        let filters = SearchFilters {
            document_types: vec!["PDF".to_string(), " docx".to_string(), "pdf".to_string()],
            date_range: Some(DateRange::default()),
            ..Default::default()
        };

        let normalized = filters.normalized();
        assert_eq!(normalized.document_types, vec!["docx".to_string(), "pdf".to_string()]);
        assert!(normalized.date_range.is_none());
        assert!(!filters.is_empty());
        assert!(SearchFilters::default().is_empty());
    }

    #[test]
    fn test_stats_with_scores() {
        let hit = SearchHit {
            fragment_id: "f".to_string(),
            document_id: "d".to_string(),
            content: String::new(),
            score: 0.9,
            metadata: SourceMetadata {
                document_name: "doc".to_string(),
                position: 0,
                owner_id: "o".to_string(),
                mime_type: None,
                file_size: None,
                document_created_at: None,
            },
        };
        let results: Vec<RankedResult> = [0.9, 0.7]
            .iter()
            .enumerate()
            .map(|(i, s)| RankedResult {
                hit: hit.clone(),
                adjusted_score: *s,
                rank: i + 1,
                factors: RankingFactors::default(),
                highlight: None,
            })
            .collect();

        let stats = SearchStats::default().with_scores(&results);
        assert_eq!(stats.total, 2);
        assert!((stats.avg_score - 0.8).abs() < 1e-6);
        assert_eq!(stats.max_score, 0.9);
        assert_eq!(stats.min_score, 0.7);
    }
}
