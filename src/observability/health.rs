//! Health checks and readiness

use crate::ai::{AiServiceManager, CircuitState, ProviderHealth};
use crate::rag::SearchCache;
use crate::vector_store::VectorStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Component health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,

    /// Health status
    pub status: HealthStatus,

    /// Optional message
    pub message: Option<String>,

    /// Response time in milliseconds
    pub response_time_ms: Option<u64>,
}

/// Overall system health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Overall status
    pub status: HealthStatus,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Component health checks
    pub components: Vec<ComponentHealth>,

    /// Timestamp
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
struct CachedHealth {
    result: SystemHealth,
    cached_at: Instant,
}

/// Aggregates component health, caching the result for a short TTL
pub struct HealthChecker {
    start_time: Instant,
    store: Arc<dyn VectorStore>,
    ai: Arc<AiServiceManager>,
    cache: Arc<SearchCache>,
    cached_result: RwLock<Option<CachedHealth>>,
    cache_ttl: Duration,
}

impl HealthChecker {
    /// Health checker with the default 30-second result TTL
    pub fn new(store: Arc<dyn VectorStore>, ai: Arc<AiServiceManager>, cache: Arc<SearchCache>) -> Self {
        Self {
            start_time: Instant::now(),
            store,
            ai,
            cache,
            cached_result: RwLock::new(None),
            cache_ttl: Duration::from_secs(30),
        }
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    /// Check overall system health with caching
    pub async fn check_health(&self) -> SystemHealth {
        {
            let cached = self.cached_result.read().await;
            if let Some(cached_health) = &*cached {
                if cached_health.cached_at.elapsed() < self.cache_ttl {
                    debug!("Returning cached health check result");
                    return cached_health.result.clone();
                }
            }
        }

        self.check_health_fresh().await
    }

    /// Force a fresh check, replacing the cached result
    pub async fn check_health_fresh(&self) -> SystemHealth {
        debug!("Performing fresh health check");
        let health = self.perform_health_check().await;

        let mut cached = self.cached_result.write().await;
        *cached = Some(CachedHealth {
            result: health.clone(),
            cached_at: Instant::now(),
        });

        health
    }

    async fn perform_health_check(&self) -> SystemHealth {
        let components = vec![
            self.check_vector_store().await,
            providers_health(&self.ai.health_summary()),
            self.check_cache().await,
        ];

        SystemHealth {
            status: overall_status(&components),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    async fn check_vector_store(&self) -> ComponentHealth {
        let start = Instant::now();
        let name = format!("vector_store:{}", self.store.name());

        match tokio::time::timeout(CHECK_TIMEOUT, self.store.health_check()).await {
            Ok(Ok(())) => ComponentHealth {
                name,
                status: HealthStatus::Healthy,
                message: Some("Store operational".to_string()),
                response_time_ms: Some(start.elapsed().as_millis() as u64),
            },
            Ok(Err(e)) => ComponentHealth {
                name,
                status: HealthStatus::Unhealthy,
                message: Some(format!("Store error: {}", e)),
                response_time_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => ComponentHealth {
                name,
                status: HealthStatus::Unhealthy,
                message: Some("Health check timeout".to_string()),
                response_time_ms: Some(CHECK_TIMEOUT.as_millis() as u64),
            },
        }
    }

    async fn check_cache(&self) -> ComponentHealth {
        let start = Instant::now();
        let stats = self.cache.stats().await;

        let (status, message) = if !stats.enabled {
            (HealthStatus::Degraded, "Cache disabled".to_string())
        } else {
            (
                HealthStatus::Healthy,
                format!(
                    "Cache operational (hit rate: {:.1}%, entries: {}, errors: {})",
                    stats.hit_rate * 100.0,
                    stats.entries,
                    stats.errors
                ),
            )
        };

        ComponentHealth {
            name: "search_cache".to_string(),
            status,
            message: Some(message),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    /// Simple liveness check
    pub fn liveness(&self) -> bool {
        true
    }

    /// Ready unless some component is unhealthy
    pub async fn readiness(&self) -> bool {
        self.check_health().await.status != HealthStatus::Unhealthy
    }
}

/// Healthy when every circuit is closed, unhealthy when none admits calls
fn providers_health(summary: &[ProviderHealth]) -> ComponentHealth {
    let open: Vec<&str> = summary
        .iter()
        .filter(|p| p.state == CircuitState::Open)
        .map(|p| p.provider.as_str())
        .collect();
    let half_open = summary.iter().filter(|p| p.state == CircuitState::HalfOpen).count();

    let (status, message) = if summary.is_empty() {
        (HealthStatus::Unhealthy, "No providers configured".to_string())
    } else if open.len() == summary.len() {
        (HealthStatus::Unhealthy, format!("All circuits open: {}", open.join(", ")))
    } else if !open.is_empty() || half_open > 0 {
        (
            HealthStatus::Degraded,
            format!("{} of {} providers impaired", open.len() + half_open, summary.len()),
        )
    } else {
        (HealthStatus::Healthy, format!("{} providers available", summary.len()))
    };

    ComponentHealth {
        name: "ai_providers".to_string(),
        status,
        message: Some(message),
        response_time_ms: Some(0),
    }
}

fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
    if components.iter().all(|c| c.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}
