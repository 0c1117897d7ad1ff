//! Observability module for logging, metrics, and health

pub mod health;
pub mod metrics;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use health::{ComponentHealth, HealthChecker, HealthStatus, SystemHealth};
pub use metrics::{MetricsCollector, SystemMetrics};

/// Initialize logging and tracing
///
/// `RUST_LOG` overrides `log_level`. `format` is one of json, compact or pretty.
pub fn init_observability(log_level: &str, format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        "pretty" => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
    }
}
