//! Error types for the retrieval and answer pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum RagError {
    #[error("AI service error from provider '{provider}': {cause}")]
    AiService {
        provider: String,
        cause: ProviderError,
    },

    #[error("Circuit breaker open for provider '{provider}', retry in {remaining:?}")]
    CircuitOpen {
        provider: String,
        remaining: Duration,
    },

    #[error("All AI providers are unavailable (attempted: {})", .attempted.join(", "))]
    ServiceDegradation { attempted: Vec<String> },

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Rate limit exceeded (provider: {provider:?}, retry after: {retry_after:?})")]
    RateLimit {
        provider: Option<String>,
        retry_after: Option<Duration>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] crate::middleware::ValidationError),

    #[error("Authentication error: {0}")]
    Auth(#[from] crate::middleware::AuthError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Shorthand for a missing resource
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        RagError::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether the error means no AI provider could serve the call
    pub fn is_degradation(&self) -> bool {
        matches!(self, RagError::ServiceDegradation { .. } | RagError::CircuitOpen { .. })
    }
}

/// Failures reported by a single AI provider call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Rate limited by provider (retry after: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether another attempt against the same provider may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout
            | ProviderError::Stream(_) => true,
            ProviderError::Status { status, .. } => *status >= 500 || *status == 408,
            ProviderError::Unauthorized | ProviderError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Errors related to vector store lookups
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    #[error("Vector store query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid payload in search hit: {0}")]
    InvalidPayload(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Errors raised by a cache backend; never surfaced to callers
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache operation failed: {0}")]
    Operation(String),
}

impl From<config::ConfigError> for RagError {
    fn from(err: config::ConfigError) -> Self {
        RagError::Config(err.to_string())
    }
}

impl From<crate::middleware::RateLimitError> for RagError {
    fn from(err: crate::middleware::RateLimitError) -> Self {
        match err {
            crate::middleware::RateLimitError::LimitExceeded { retry_after, .. } => RagError::RateLimit {
                provider: None,
                retry_after: Some(retry_after),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradation_message_lists_providers() {
        let err = RagError::ServiceDegradation {
            attempted: vec!["openai".to_string(), "ollama".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "All AI providers are unavailable (attempted: openai, ollama)"
        );
        assert!(err.is_degradation());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(!ProviderError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!ProviderError::Unauthorized.is_retryable());
    }
}
