//! AI provider integration: provider implementations, resilience primitives
//! and the service manager that routes calls between them

pub mod circuit_breaker;
pub mod manager;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod retry;
pub mod stream;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, ProviderHealth};
pub use manager::{AiServiceManager, GenerationStream, ProbeOutcome};
pub use models::{ChatMessage, ChatRole, GenerationOptions, GenerationRequest, Invocation, ModelInfo};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use retry::RetryPolicy;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

/// Result type for a single provider call
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Incremental text produced by a streaming generation
pub type ChunkStream = BoxStream<'static, ProviderResult<String>>;

/// Uniform contract every AI provider implements
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Identifier used for selection, logging and health reporting
    fn id(&self) -> &str;

    /// Embed a single text
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    /// Generate a complete response
    async fn generate(&self, request: &GenerationRequest) -> ProviderResult<String>;

    /// Generate a response as a stream of text chunks
    async fn generate_stream(&self, request: &GenerationRequest) -> ProviderResult<ChunkStream>;

    /// List models available from this provider
    async fn list_models(&self) -> ProviderResult<Vec<ModelInfo>>;

    /// Lightweight liveness probe
    async fn health_check(&self) -> ProviderResult<()>;
}

/// Build a provider from its configuration
pub fn build_provider(config: &ProviderConfig) -> ProviderResult<Arc<dyn AiProvider>> {
    let provider: Arc<dyn AiProvider> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)?),
    };
    Ok(provider)
}

/// Map a non-success HTTP response to a provider error
pub(crate) async fn check_response(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        429 => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(ProviderError::RateLimited { retry_after })
        }
        401 | 403 => Err(ProviderError::Unauthorized),
        code => {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > 512 {
                let mut cut = 512;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            Err(ProviderError::Status { status: code, body })
        }
    }
}

/// Shared HTTP client settings for providers
pub(crate) fn http_client() -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(ProviderError::from)
}
