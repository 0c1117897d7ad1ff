//! Retrieval pipeline: cache, vectorize, vector store, rank

use super::analyzer::{QueryAnalysis, QueryAnalyzer};
use super::cache::SearchCache;
use super::models::{Query, SearchOptions, SearchResponse, SearchStats};
use super::ranker::{RankOptions, SearchResultRanker};
use super::vectorizer::QueryVectorizer;
use crate::config::SearchConfig;
use crate::error::Result;
use crate::observability::MetricsCollector;
use crate::vector_store::{StoreFilter, VectorStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Owner-scoped semantic search over document fragments
pub struct RagQueryService {
    vectorizer: QueryVectorizer,
    store: Arc<dyn VectorStore>,
    ranker: SearchResultRanker,
    cache: Arc<SearchCache>,
    analyzer: QueryAnalyzer,
    config: SearchConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RagQueryService {
    pub fn new(vectorizer: QueryVectorizer, store: Arc<dyn VectorStore>, cache: Arc<SearchCache>, config: SearchConfig) -> Self {
        info!(
            store = store.name(),
            cache_enabled = cache.is_enabled(),
            "Initializing query service"
        );

        Self {
            vectorizer,
            store,
            ranker: SearchResultRanker::new(config.ranking.clone(), config.highlight_length),
            cache,
            analyzer: QueryAnalyzer::new(),
            config,
            metrics: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Run a search for `owner_id`
    ///
    /// `use_cache = false` skips the cache read; fresh results are still written.
    #[instrument(skip(self, raw_query, options), fields(owner_id = %owner_id))]
    pub async fn search(&self, owner_id: &str, raw_query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let started = Instant::now();
        let query = Query::new(owner_id, raw_query, options.filters.clone());
        let limit = options
            .limit
            .unwrap_or(self.config.default_limit)
            .clamp(1, self.config.max_limit.max(1));
        let score_threshold = options.score_threshold.unwrap_or(self.config.score_threshold);

        let cache_key = SearchCache::cache_key(owner_id, &query.normalized, &query.filters, limit, score_threshold);
        if options.use_cache {
            if let Some(results) = self.cache.get(&cache_key).await {
                debug!(results = results.len(), "Serving search from cache");
                let stats = SearchStats {
                    cached: true,
                    took_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                }
                .with_scores(&results);
                return Ok(SearchResponse {
                    query: query.raw,
                    results,
                    stats,
                });
            }
        }

        let vectorize_start = Instant::now();
        let embedding = self.vectorizer.embed_query(&query).await?;
        let vectorize_ms = vectorize_start.elapsed().as_millis() as u64;

        let filter = StoreFilter::for_owner(owner_id, &query.filters);
        let candidate_limit = limit.saturating_mul(self.config.candidate_multiplier.max(1));

        let store_start = Instant::now();
        let store_result = self.store.query(embedding, &filter, candidate_limit).await;
        let store_elapsed = store_start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_vector_store_latency(store_elapsed);
        }
        let hits = store_result?;
        let candidates = hits.len();

        let hits: Vec<_> = hits
            .into_iter()
            .filter(|hit| {
                let own = hit.metadata.owner_id == owner_id;
                if !own {
                    warn!(
                        fragment_id = %hit.fragment_id,
                        hit_owner = %hit.metadata.owner_id,
                        "Dropping search hit owned by another user"
                    );
                }
                own
            })
            .collect();

        let rank_start = Instant::now();
        let results = self.ranker.rank(
            hits,
            &query.raw,
            RankOptions {
                score_threshold,
                limit,
            },
        );
        let rank_ms = rank_start.elapsed().as_millis() as u64;

        self.cache.put(cache_key, owner_id, &results, None).await;

        let stats = SearchStats {
            cached: false,
            took_ms: started.elapsed().as_millis() as u64,
            vectorize_ms,
            store_ms: store_elapsed.as_millis() as u64,
            rank_ms,
            candidates,
            ..Default::default()
        }
        .with_scores(&results);

        debug!(
            candidates,
            results = results.len(),
            took_ms = stats.took_ms,
            "Search completed"
        );

        Ok(SearchResponse {
            query: query.raw,
            results,
            stats,
        })
    }

    /// Related queries for a partial question
    pub fn suggestions(&self, owner_id: &str, partial: &str) -> Vec<String> {
        debug!(owner_id, "Generating query suggestions");
        self.analyzer.suggestions(partial)
    }

    /// Structural analysis of a question
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        self.analyzer.analyze(query)
    }

    /// Drop every cached search of an owner
    pub async fn invalidate_owner_cache(&self, owner_id: &str) {
        self.cache.invalidate_for_owner(owner_id).await;
    }
}
