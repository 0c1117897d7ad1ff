//! Configuration management for the retrieval and answer pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use secrecy::{Secret, ExposeSecret};

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub providers: Vec<ProviderConfig>,
    pub resilience: ResilienceConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub vector_store: VectorStoreConfig,
    pub answer: AnswerConfig,
    pub auth: AuthSettings,
    pub rate_limit: RateLimitSettings,
}

/// Supported AI provider backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Any OpenAI-compatible HTTP API
    OpenAi,
    /// A local Ollama server
    Ollama,
}

/// Configuration for a single AI provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider identifier used in logs, health output and errors
    pub id: String,

    /// Provider backend
    pub kind: ProviderKind,

    /// Base URL of the provider API
    pub base_url: String,

    /// API key (optional, secured)
    #[serde(default, serialize_with = "serialize_optional_secret", deserialize_with = "deserialize_optional_secret")]
    pub api_key: Option<Secret<String>>,

    /// Model used for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Model used for chat generation
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Selection priority (lower is tried first)
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Whether the provider takes part in selection
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Resilience settings shared by all providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Interval between background provider health probes
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Whether the background health probe runs at all
    #[serde(default = "default_true")]
    pub health_monitor_enabled: bool,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds the circuit stays open before allowing a trial call
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,

    /// Concurrent trial calls admitted while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

/// Retry and backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Timeout applied to every single attempt
    #[serde(default = "default_timeout")]
    pub attempt_timeout_secs: u64,

    /// Extra backoff factor when a provider signals throttling
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: f64,
}

/// Search and ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum raw similarity score kept by the ranker
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Candidates fetched from the store per requested result
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Queries are truncated to this many characters before embedding
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Length of highlight snippets attached to results
    #[serde(default = "default_highlight_length")]
    pub highlight_length: usize,

    #[serde(default)]
    pub ranking: RankingConfig,
}

/// Heuristic bonuses applied on top of vector similarity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Bonus when every query term appears in the fragment
    #[serde(default = "default_max_keyword_bonus")]
    pub max_keyword_bonus: f32,

    #[serde(default = "default_length_bonus")]
    pub length_bonus: f32,

    #[serde(default = "default_short_penalty")]
    pub short_penalty: f32,

    #[serde(default = "default_long_penalty")]
    pub long_penalty: f32,

    /// Fragments shorter than this are penalized
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Fragments longer than this are penalized
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_recency_bonus")]
    pub recency_bonus: f32,

    /// Documents younger than this receive the recency bonus
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: i64,
}

/// Search result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
}

/// Vector store backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    #[default]
    Memory,
    Qdrant,
}

/// Configuration for the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub kind: VectorStoreKind,

    /// Qdrant server URL
    #[serde(default = "default_vector_store_url")]
    pub url: String,

    /// API key (optional, secured)
    #[serde(default, serialize_with = "serialize_optional_secret", deserialize_with = "deserialize_optional_secret")]
    pub api_key: Option<Secret<String>>,

    /// Collection holding document fragments
    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Answer generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Ranked fragments placed in the prompt
    #[serde(default = "default_max_context_fragments")]
    pub max_context_fragments: usize,

    /// Conversation turns spliced into the prompt
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_min_answer_chars")]
    pub min_answer_chars: usize,

    #[serde(default = "default_max_answer_chars")]
    pub max_answer_chars: usize,

    /// Capacity of the channel between generation and the streaming client
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Return search-only answers when generation is unavailable
    #[serde(default = "default_true")]
    pub degraded_mode: bool,
}

/// Static token to owner binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBinding {
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub token: Secret<String>,
    pub owner_id: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub tokens: Vec<TokenBinding>,

    /// Owners allowed to manage other owners' search caches
    #[serde(default)]
    pub admin_owners: Vec<String>,

    /// Secret for HMAC-signed `owner.signature` tokens
    #[serde(default, serialize_with = "serialize_optional_secret", deserialize_with = "deserialize_optional_secret")]
    pub signing_secret: Option<Secret<String>>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Server host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Maximum request body size in MB (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: usize,

    /// Upper bound for a whole API request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_timeout() -> u64 { 30 }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_priority() -> u32 { 100 }
fn default_health_check_interval() -> u64 { 300 } // 5 minutes
fn default_failure_threshold() -> u32 { 5 }
fn default_success_threshold() -> u32 { 3 }
fn default_recovery_timeout() -> u64 { 60 }
fn default_half_open_max_calls() -> u32 { 1 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_delay_ms() -> u64 { 60_000 }
fn default_rate_limit_multiplier() -> f64 { 2.0 }
fn default_score_threshold() -> f32 { 0.7 }
fn default_limit() -> usize { 10 }
fn default_max_limit() -> usize { 50 }
fn default_candidate_multiplier() -> usize { 2 }
fn default_max_query_chars() -> usize { 1000 }
fn default_highlight_length() -> usize { 200 }
fn default_max_keyword_bonus() -> f32 { 0.3 }
fn default_length_bonus() -> f32 { 0.05 }
fn default_short_penalty() -> f32 { -0.1 }
fn default_long_penalty() -> f32 { -0.05 }
fn default_min_length() -> usize { 100 }
fn default_max_length() -> usize { 1000 }
fn default_recency_bonus() -> f32 { 0.05 }
fn default_recency_window_days() -> i64 { 30 }
fn default_cache_ttl() -> u64 { 3600 }
fn default_cache_entries() -> u64 { 10_000 }
fn default_vector_store_url() -> String { "http://localhost:6334".to_string() }
fn default_collection() -> String { "document_fragments".to_string() }
fn default_max_context_fragments() -> usize { 5 }
fn default_history_turns() -> usize { 10 }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> u32 { 2000 }
fn default_min_answer_chars() -> usize { 10 }
fn default_max_answer_chars() -> usize { 5000 }
fn default_stream_buffer() -> usize { 32 }
fn default_max_requests() -> usize { 100 }
fn default_window_secs() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_server_port() -> u16 { 8080 }
fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_max_body_size() -> usize { 10 } // 10 MB default
fn default_request_timeout() -> u64 { 120 }

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            health_check_interval_secs: default_health_check_interval(),
            health_monitor_enabled: true,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
            attempt_timeout_secs: default_timeout(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            candidate_multiplier: default_candidate_multiplier(),
            max_query_chars: default_max_query_chars(),
            highlight_length: default_highlight_length(),
            ranking: RankingConfig::default(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            max_keyword_bonus: default_max_keyword_bonus(),
            length_bonus: default_length_bonus(),
            short_penalty: default_short_penalty(),
            long_penalty: default_long_penalty(),
            min_length: default_min_length(),
            max_length: default_max_length(),
            recency_bonus: default_recency_bonus(),
            recency_window_days: default_recency_window_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_entries(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            kind: VectorStoreKind::default(),
            url: default_vector_store_url(),
            api_key: None,
            collection: default_collection(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            max_context_fragments: default_max_context_fragments(),
            history_turns: default_history_turns(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            min_answer_chars: default_min_answer_chars(),
            max_answer_chars: default_max_answer_chars(),
            stream_buffer: default_stream_buffer(),
            degraded_mode: true,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tokens: Vec::new(),
            admin_owners: Vec::new(),
            signing_secret: None,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            host: default_server_host(),
            max_body_size_mb: default_max_body_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl ProviderConfig {
    /// Whether an API key is configured and non-empty
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .map(|k| !k.expose_secret().is_empty())
            .unwrap_or(false)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config_with_env(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Providers taking part in selection, in configuration order
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            providers: vec![
                ProviderConfig {
                    id: "openai".to_string(),
                    kind: ProviderKind::OpenAi,
                    base_url: "https://api.openai.com/v1".to_string(),
                    api_key: std::env::var("OPENAI_API_KEY").ok().map(Secret::new),
                    embedding_model: default_embedding_model(),
                    chat_model: default_chat_model(),
                    priority: 1,
                    timeout_secs: default_timeout(),
                    enabled: true,
                },
                ProviderConfig {
                    id: "ollama".to_string(),
                    kind: ProviderKind::Ollama,
                    base_url: "http://localhost:11434".to_string(),
                    api_key: None,
                    embedding_model: "nomic-embed-text".to_string(),
                    chat_model: "llama3".to_string(),
                    priority: 2,
                    timeout_secs: 60,
                    enabled: true,
                },
            ],
            resilience: ResilienceConfig::default(),
            search: SearchConfig::default(),
            cache: CacheConfig::default(),
            vector_store: VectorStoreConfig::default(),
            answer: AnswerConfig::default(),
            auth: AuthSettings {
                enabled: false,
                ..Default::default()
            },
            rate_limit: RateLimitSettings::default(),
        }
    }
}

/// Custom serializer for Secret<String>
fn serialize_secret<S>(secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

/// Custom deserializer for Secret<String>
fn deserialize_secret<'de, D>(deserializer: D) -> Result<Secret<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Secret::new(s))
}

/// Custom serializer for Option<Secret<String>>
fn serialize_optional_secret<S>(secret: &Option<Secret<String>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Custom deserializer for Option<Secret<String>>
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.map(Secret::new))
}
