//! Configuration validation

use super::*;
use crate::error::{RagError, Result};
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_providers(&config.providers)?;
    validate_resilience_config(&config.resilience)?;
    validate_search_config(&config.search)?;
    validate_cache_config(&config.cache)?;
    validate_vector_store_config(&config.vector_store)?;
    validate_answer_config(&config.answer)?;
    validate_auth_config(&config.auth)?;
    validate_rate_limit_config(&config.rate_limit)?;
    Ok(())
}

fn config_error(message: impl Into<String>) -> RagError {
    RagError::Config(message.into())
}

fn validate_url(label: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(config_error(format!("{} URL cannot be empty", label)));
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(config_error(format!("{} URL must start with http:// or https://", label)));
    }

    Ok(())
}

/// Validate provider list
fn validate_providers(providers: &[ProviderConfig]) -> Result<()> {
    if !providers.iter().any(|p| p.enabled) {
        return Err(config_error("At least one AI provider must be enabled"));
    }

    let mut seen = HashSet::new();
    for provider in providers {
        if provider.id.trim().is_empty() {
            return Err(config_error("Provider id cannot be empty"));
        }

        if !seen.insert(provider.id.as_str()) {
            return Err(config_error(format!("Duplicate provider id: {}", provider.id)));
        }

        validate_url(&format!("Provider '{}'", provider.id), &provider.base_url)?;

        if provider.timeout_secs == 0 || provider.timeout_secs > 600 {
            return Err(config_error(format!(
                "Provider '{}' timeout must be between 1 and 600 seconds",
                provider.id
            )));
        }

        if provider.embedding_model.is_empty() || provider.chat_model.is_empty() {
            return Err(config_error(format!("Provider '{}' must name its models", provider.id)));
        }
    }

    Ok(())
}

/// Validate circuit breaker and retry settings
fn validate_resilience_config(config: &ResilienceConfig) -> Result<()> {
    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        return Err(config_error("Circuit breaker failure threshold must be greater than 0"));
    }

    if cb.success_threshold == 0 {
        return Err(config_error("Circuit breaker success threshold must be greater than 0"));
    }

    if cb.half_open_max_calls == 0 {
        return Err(config_error("Half-open trial calls must be greater than 0"));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 || retry.max_attempts > 10 {
        return Err(config_error("Retry attempts must be between 1 and 10"));
    }

    if retry.multiplier < 1.0 {
        return Err(config_error("Retry multiplier must be at least 1.0"));
    }

    if retry.rate_limit_multiplier < 1.0 {
        return Err(config_error("Rate limit multiplier must be at least 1.0"));
    }

    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(config_error("Retry max delay must not be below the base delay"));
    }

    if retry.attempt_timeout_secs == 0 {
        return Err(config_error("Attempt timeout must be greater than 0"));
    }

    if config.health_monitor_enabled && config.health_check_interval_secs == 0 {
        return Err(config_error("Health check interval must be greater than 0"));
    }

    Ok(())
}

/// Validate search configuration
fn validate_search_config(config: &SearchConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.score_threshold) {
        return Err(config_error("Score threshold must be between 0.0 and 1.0"));
    }

    if config.default_limit == 0 || config.max_limit == 0 {
        return Err(config_error("Search limits must be greater than 0"));
    }

    if config.default_limit > config.max_limit {
        return Err(config_error("Default search limit cannot exceed the maximum limit"));
    }

    if config.candidate_multiplier == 0 {
        return Err(config_error("Candidate multiplier must be greater than 0"));
    }

    if config.max_query_chars == 0 {
        return Err(config_error("Maximum query length must be greater than 0"));
    }

    let ranking = &config.ranking;
    if ranking.min_length > ranking.max_length {
        return Err(config_error("Ranking min_length cannot exceed max_length"));
    }

    if !(0.0..=1.0).contains(&ranking.max_keyword_bonus) {
        return Err(config_error("Keyword bonus must be between 0.0 and 1.0"));
    }

    Ok(())
}

/// Validate cache configuration
fn validate_cache_config(config: &CacheConfig) -> Result<()> {
    if config.enabled {
        if config.max_entries == 0 {
            return Err(config_error("Cache size must be greater than 0 when cache is enabled"));
        }

        if config.ttl_secs == 0 {
            return Err(config_error("Cache TTL must be greater than 0 when cache is enabled"));
        }
    }

    Ok(())
}

/// Validate vector store configuration
fn validate_vector_store_config(config: &VectorStoreConfig) -> Result<()> {
    if config.kind == VectorStoreKind::Qdrant {
        validate_url("Vector store", &config.url)?;

        if config.collection.is_empty() {
            return Err(config_error("Vector store collection cannot be empty"));
        }
    }

    if config.timeout_secs == 0 {
        return Err(config_error("Vector store timeout must be greater than 0"));
    }

    Ok(())
}

/// Validate answer configuration
fn validate_answer_config(config: &AnswerConfig) -> Result<()> {
    if config.max_context_fragments == 0 {
        return Err(config_error("At least one context fragment must be allowed"));
    }

    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(config_error("Temperature must be between 0.0 and 2.0"));
    }

    if config.max_tokens == 0 {
        return Err(config_error("Max tokens must be greater than 0"));
    }

    if config.min_answer_chars >= config.max_answer_chars {
        return Err(config_error("Minimum answer length must be below the maximum"));
    }

    if config.stream_buffer == 0 {
        return Err(config_error("Stream buffer must be greater than 0"));
    }

    Ok(())
}

/// Validate authentication configuration
fn validate_auth_config(config: &AuthSettings) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let has_secret = config
        .signing_secret
        .as_ref()
        .map(|s| !s.expose_secret().is_empty())
        .unwrap_or(false);

    if config.tokens.is_empty() && !has_secret {
        return Err(config_error(
            "Authentication is enabled but neither tokens nor a signing secret are configured",
        ));
    }

    for binding in &config.tokens {
        if binding.token.expose_secret().is_empty() || binding.owner_id.is_empty() {
            return Err(config_error("Token bindings need a token and an owner id"));
        }
    }

    Ok(())
}

/// Validate rate limit configuration
fn validate_rate_limit_config(config: &RateLimitSettings) -> Result<()> {
    if config.enabled && (config.max_requests == 0 || config.window_secs == 0) {
        return Err(config_error("Rate limit requests and window must be greater than 0"));
    }

    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    // Validate port range
    if config.port == 0 {
        return Err(config_error("Server port cannot be 0"));
    }

    // Validate host
    if config.host.is_empty() {
        return Err(config_error("Server host cannot be empty"));
    }

    if config.request_timeout_secs == 0 {
        return Err(config_error("Request timeout must be greater than 0"));
    }

    Ok(())
}
