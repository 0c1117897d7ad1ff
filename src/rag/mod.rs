//! Retrieval: query vectorization, similarity ranking and result caching

pub mod analyzer;
pub mod cache;
pub mod models;
pub mod ranker;
pub mod service;
pub mod vectorizer;

pub use analyzer::{extract_key_terms, QueryAnalysis, QueryAnalyzer, QueryIntent, QueryType};
pub use cache::{CacheBackend, CacheStats, CachedResults, MokaCacheBackend, SearchCache, CACHE_KEY_PREFIX};
pub use models::{
    normalize_text, DateRange, Query, RankedResult, RankingFactors, SearchFilters, SearchHit, SearchOptions,
    SearchResponse, SearchStats, SizeRange, SourceMetadata,
};
pub use ranker::{RankOptions, SearchResultRanker};
pub use service::RagQueryService;
pub use vectorizer::QueryVectorizer;
