//! Metrics collection and Prometheus export

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point-in-time view of the collected counters
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub total_requests: u64,
    pub total_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub provider_failures: u64,
    pub failovers: u64,
    /// Average request latency in milliseconds
    pub avg_response_time_ms: f64,
    pub uptime_secs: u64,
}

/// Latency histogram buckets (in milliseconds)
const LATENCY_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
];

/// Histogram for tracking latency distribution
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(f64, Arc<AtomicU64>)>,
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets.iter().map(|&b| (b, Arc::new(AtomicU64::new(0)))).collect(),
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn observe(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative: every bucket at or above the value counts it
        for (bucket, counter) in &self.buckets {
            if ms as f64 <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} histogram", name);

        for (bucket, counter) in &self.buckets {
            let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", name, bucket, counter.load(Ordering::Relaxed));
        }

        let total = self.count();
        let _ = writeln!(output, "{}_bucket{{le=\"+Inf\"}} {}", name, total);
        let _ = writeln!(output, "{}_sum {}", name, self.sum.load(Ordering::Relaxed));
        let _ = writeln!(output, "{}_count {}", name, total);
        output
    }
}

/// Lock-free metrics shared across the service
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_response_time_ms: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_failures: AtomicU64,
    failovers: AtomicU64,

    request_latency: Histogram,
    embedding_latency: Histogram,
    generation_latency: Histogram,
    vector_store_latency: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            request_latency: Histogram::new(LATENCY_BUCKETS),
            embedding_latency: Histogram::new(LATENCY_BUCKETS),
            generation_latency: Histogram::new(LATENCY_BUCKETS),
            vector_store_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a completed HTTP request
    pub fn record_request(&self, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_ms
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);
        self.request_latency.observe(response_time);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_embedding_latency(&self, duration: Duration) {
        self.embedding_latency.observe(duration);
    }

    pub fn record_generation_latency(&self, duration: Duration) {
        self.generation_latency.observe(duration);
    }

    pub fn record_vector_store_latency(&self, duration: Duration) {
        self.vector_store_latency.observe(duration);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A provider failed a logical call after retries
    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A call moved on to the next provider
    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> SystemMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.total_response_time_ms.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);

        let cache_total = cache_hits + cache_misses;
        SystemMetrics {
            total_requests,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate: if cache_total > 0 {
                cache_hits as f64 / cache_total as f64
            } else {
                0.0
            },
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            avg_response_time_ms: if total_requests > 0 {
                total_response_time as f64 / total_requests as f64
            } else {
                0.0
            },
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        let mut output = format!(
            "# HELP knowledge_rag_requests_total Total number of requests\n\
             # TYPE knowledge_rag_requests_total counter\n\
             knowledge_rag_requests_total {}\n\
             \n\
             # HELP knowledge_rag_errors_total Total number of failed requests\n\
             # TYPE knowledge_rag_errors_total counter\n\
             knowledge_rag_errors_total {}\n\
             \n\
             # HELP knowledge_rag_cache_hits_total Search cache hits\n\
             # TYPE knowledge_rag_cache_hits_total counter\n\
             knowledge_rag_cache_hits_total {}\n\
             \n\
             # HELP knowledge_rag_cache_misses_total Search cache misses\n\
             # TYPE knowledge_rag_cache_misses_total counter\n\
             knowledge_rag_cache_misses_total {}\n\
             \n\
             # HELP knowledge_rag_cache_hit_rate Search cache hit rate\n\
             # TYPE knowledge_rag_cache_hit_rate gauge\n\
             knowledge_rag_cache_hit_rate {:.4}\n\
             \n\
             # HELP knowledge_rag_provider_failures_total Provider calls that failed after retries\n\
             # TYPE knowledge_rag_provider_failures_total counter\n\
             knowledge_rag_provider_failures_total {}\n\
             \n\
             # HELP knowledge_rag_failovers_total Calls that failed over to another provider\n\
             # TYPE knowledge_rag_failovers_total counter\n\
             knowledge_rag_failovers_total {}\n\
             \n\
             # HELP knowledge_rag_avg_response_time_ms Average response time in milliseconds\n\
             # TYPE knowledge_rag_avg_response_time_ms gauge\n\
             knowledge_rag_avg_response_time_ms {:.2}\n\
             \n\
             # HELP knowledge_rag_uptime_seconds Uptime in seconds\n\
             # TYPE knowledge_rag_uptime_seconds counter\n\
             knowledge_rag_uptime_seconds {}\n\
             \n",
            metrics.total_requests,
            metrics.total_errors,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.cache_hit_rate,
            metrics.provider_failures,
            metrics.failovers,
            metrics.avg_response_time_ms,
            metrics.uptime_secs,
        );

        let histograms = [
            (&self.request_latency, "knowledge_rag_request_duration_ms", "Request duration in milliseconds"),
            (&self.embedding_latency, "knowledge_rag_embedding_duration_ms", "Embedding call duration in milliseconds"),
            (&self.generation_latency, "knowledge_rag_generation_duration_ms", "Generation call duration in milliseconds"),
            (&self.vector_store_latency, "knowledge_rag_vector_store_duration_ms", "Vector store query duration in milliseconds"),
        ];
        for (histogram, name, help) in histograms {
            output.push_str(&histogram.export_prometheus(name, help));
            output.push('\n');
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();

        collector.record_request(Duration::from_millis(100));
        collector.record_request(Duration::from_millis(200));
        collector.record_error();
        collector.record_cache_hit();
        collector.record_cache_miss();
        collector.record_provider_failure();
        collector.record_failover();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.avg_response_time_ms, 150.0);
        assert_eq!(metrics.cache_hit_rate, 0.5);
        assert_eq!(metrics.provider_failures, 1);
        assert_eq!(metrics.failovers, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let collector = MetricsCollector::new();
        collector.record_request(Duration::from_millis(100));
        collector.record_generation_latency(Duration::from_millis(700));

        let prometheus = collector.export_prometheus();
        assert!(prometheus.contains("knowledge_rag_requests_total 1"));
        assert!(prometheus.contains("knowledge_rag_avg_response_time_ms 100.00"));
        assert!(prometheus.contains("knowledge_rag_generation_duration_ms_bucket{le=\"1000\"} 1"));
        assert!(prometheus.contains("knowledge_rag_generation_duration_ms_bucket{le=\"500\"} 0"));
        assert!(prometheus.contains("knowledge_rag_generation_duration_ms_count 1"));
    }
}
