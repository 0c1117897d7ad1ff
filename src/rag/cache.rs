//! Search result cache keyed by owner, query and filters

use super::models::{RankedResult, SearchFilters};
use crate::error::CacheError;
use crate::observability::MetricsCollector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix shared by every search cache key
pub const CACHE_KEY_PREFIX: &str = "rag_search:";

/// Value stored per cache key
#[derive(Debug, Clone)]
pub struct CachedResults {
    pub owner_id: String,
    pub results: Arc<Vec<RankedResult>>,
    pub expires_at: DateTime<Utc>,
}

/// Storage behind [`SearchCache`]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedResults>, CacheError>;

    async fn put(&self, key: String, value: CachedResults) -> Result<(), CacheError>;

    /// Drop every entry belonging to an owner
    async fn invalidate_owner(&self, owner_id: &str) -> Result<(), CacheError>;

    async fn entry_count(&self) -> Result<u64, CacheError>;
}

/// In-process backend using moka
pub struct MokaCacheBackend {
    cache: Cache<String, CachedResults>,
}

impl MokaCacheBackend {
    /// Create a new cache with specified capacity and TTL
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        info!("Initializing search cache with max_entries={}, ttl={:?}", max_entries, ttl);

        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();

        Self { cache }
    }
}

#[async_trait]
impl CacheBackend for MokaCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<CachedResults>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: String, value: CachedResults) -> Result<(), CacheError> {
        self.cache.insert(key, value).await;
        Ok(())
    }

    async fn invalidate_owner(&self, owner_id: &str) -> Result<(), CacheError> {
        let owner = owner_id.to_string();
        self.cache
            .invalidate_entries_if(move |_, value| value.owner_id == owner)
            .map_err(|e| CacheError::Operation(e.to_string()))?;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn entry_count(&self) -> Result<u64, CacheError> {
        self.cache.run_pending_tasks().await;
        Ok(self.cache.entry_count())
    }
}

/// Statistics about cache performance
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    owner: &'a str,
    query: String,
    filters: SearchFilters,
    limit: usize,
    /// Bit pattern so every threshold, NaN included, serializes
    score_threshold: u32,
}

/// Memoizes ranked results per (owner, query, filters, limit, threshold)
///
/// Backend failures never reach callers: reads degrade to a miss and writes
/// to a no-op, each logged at warn.
pub struct SearchCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SearchCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            metrics: None,
        }
    }

    /// Cache that never stores anything
    pub fn disabled() -> Self {
        let mut cache = Self::new(Arc::new(MokaCacheBackend::new(1, Duration::from_secs(1))), Duration::from_secs(1));
        cache.enabled = false;
        cache
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic key: sha256 over owner, lower-cased query, filters with
    /// sorted keys, and the effective limit and score threshold
    ///
    /// Cached values are already cut to `limit` and `score_threshold`, so both
    /// take part in the key.
    pub fn cache_key(
        owner_id: &str,
        normalized_query: &str,
        filters: &SearchFilters,
        limit: usize,
        score_threshold: f32,
    ) -> String {
        let material = KeyMaterial {
            owner: owner_id,
            query: normalized_query.to_lowercase(),
            filters: filters.normalized(),
            limit,
            score_threshold: score_threshold.to_bits(),
        };
        // serde_json::Value maps keep their keys sorted
        let canonical = serde_json::to_value(&material)
            .map(|value| value.to_string())
            .unwrap_or_else(|_| format!("{}|{}", owner_id, material.query));

        format!("{}{}", CACHE_KEY_PREFIX, hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_hit();
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_miss();
        }
    }

    /// Look up results; expired entries and backend errors count as misses
    pub async fn get(&self, key: &str) -> Option<Vec<RankedResult>> {
        if !self.enabled {
            return None;
        }

        match self.backend.get(key).await {
            Ok(Some(entry)) if entry.expires_at > Utc::now() => {
                debug!("Cache hit for key: {}", key);
                self.record_hit();
                Some(entry.results.as_ref().clone())
            }
            Ok(_) => {
                debug!("Cache miss for key: {}", key);
                self.record_miss();
                None
            }
            Err(e) => {
                warn!(error = %e, "Search cache read failed, treating as miss");
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.record_miss();
                None
            }
        }
    }

    /// Store results for an owner; `ttl` falls back to the configured default
    pub async fn put(&self, key: String, owner_id: &str, results: &[RankedResult], ttl: Option<Duration>) {
        if !self.enabled {
            return;
        }

        let ttl = ttl.unwrap_or(self.ttl);
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let entry = CachedResults {
            owner_id: owner_id.to_string(),
            results: Arc::new(results.to_vec()),
            expires_at,
        };

        if let Err(e) = self.backend.put(key, entry).await {
            warn!(error = %e, "Search cache write failed");
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove every cached search for an owner
    pub async fn invalidate_for_owner(&self, owner_id: &str) {
        match self.backend.invalidate_owner(owner_id).await {
            Ok(()) => info!(owner_id, "Invalidated search cache"),
            Err(e) => {
                warn!(owner_id, error = %e, "Search cache invalidation failed");
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let entries = match self.backend.entry_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Search cache stats unavailable");
                0
            }
        };

        let total = hits + misses;
        CacheStats {
            enabled: self.enabled,
            entries,
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}
