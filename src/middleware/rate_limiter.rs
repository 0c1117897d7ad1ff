//! Per-owner fixed-window rate limiting

use crate::config::RateLimitSettings;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Window {
    count: usize,
    started: Instant,
}

/// Fixed-window request limiter keyed by owner id
pub struct RateLimiter {
    enabled: bool,
    max_requests: usize,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_requests: settings.max_requests,
            window: Duration::from_secs(settings.window_secs),
            windows: DashMap::new(),
        }
    }

    /// Count a request for `owner_id`, rejecting it once the window is full
    pub fn check(&self, owner_id: &str) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }

        let now = Instant::now();
        let mut entry = self.windows.entry(owner_id.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        let window = entry.value_mut();

        if now.duration_since(window.started) >= self.window {
            window.count = 0;
            window.started = now;
        }

        if window.count >= self.max_requests {
            let retry_after = self.window.saturating_sub(now.duration_since(window.started));
            warn!(owner_id, requests = window.count, "Rate limit exceeded");
            return Err(RateLimitError::LimitExceeded {
                retry_after,
                limit: self.max_requests,
            });
        }

        window.count += 1;
        debug!(owner_id, "Request allowed ({}/{})", window.count, self.max_requests);
        Ok(())
    }

    /// Forget an owner's window
    pub fn reset(&self, owner_id: &str) {
        self.windows.remove(owner_id);
    }

    /// Drop windows that have already expired
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.windows
            .retain(|_, window| now.duration_since(window.started) < self.window);
    }

    /// Periodically drop expired windows until shutdown
    pub fn spawn_cleanup_task(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.window.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => self.cleanup_expired(),
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Rate limiter cleanup task stopped");
        })
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            tracked_owners: self.windows.len(),
            total_requests: self.windows.iter().map(|w| w.count).sum(),
            max_requests: self.max_requests,
            window_secs: self.window.as_secs(),
        }
    }
}

/// Rate limit error
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Retry after {retry_after:?}. Limit: {limit} requests per window")]
    LimitExceeded { retry_after: Duration, limit: usize },
}

/// Rate limit statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub tracked_owners: usize,
    pub total_requests: usize,
    pub max_requests: usize,
    pub window_secs: u64,
}
