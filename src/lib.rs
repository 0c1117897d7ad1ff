//! Knowledge RAG - question answering over private document collections
//!
//! This library implements a retrieval-augmented generation pipeline: a
//! question is embedded, matched against the caller's document fragments in a
//! vector store, the results are re-ranked, and an answer citing its sources
//! is generated by one of several AI providers.
//!
//! ## Features
//!
//! - **Resilient AI access**: per-provider circuit breakers, retry with
//!   exponential backoff, priority failover and degraded answers
//! - **Owner isolation**: every search, cache entry and conversation is scoped
//!   to the authenticated owner
//! - **Search caching**: ranked results memoized per (owner, query, filters)
//! - **Conversations**: multi-turn history fed back into prompts
//! - **Streaming**: answers delivered as server-sent events
//! - **Observability**: structured tracing, Prometheus metrics and health checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use knowledge_rag::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_file("config.toml")?;
//!
//!     let ai = Arc::new(AiServiceManager::from_config(&config)?);
//!     let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
//!     let ttl = Duration::from_secs(config.cache.ttl_secs);
//!     let cache = Arc::new(SearchCache::new(
//!         Arc::new(MokaCacheBackend::new(config.cache.max_entries, ttl)),
//!         ttl,
//!     ));
//!     let rag = Arc::new(RagQueryService::new(
//!         QueryVectorizer::new(ai.clone(), config.search.max_query_chars),
//!         store,
//!         cache,
//!         config.search.clone(),
//!     ));
//!     let answers = AnswerService::new(
//!         rag,
//!         ai,
//!         Arc::new(InMemoryConversationStore::new()),
//!         config.answer.clone(),
//!     );
//!
//!     let result = answers
//!         .answer("alice", "What is the refund policy?", None, &AnswerOptions::default())
//!         .await?;
//!     println!("{} ({} citations)", result.answer, result.citations.len());
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod answer;
pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod rag;
pub mod shutdown;
pub mod vector_store;

pub use config::Config;
pub use error::{RagError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ai::{AiProvider, AiServiceManager, CircuitBreakerConfig, RetryPolicy};
    pub use crate::answer::{AnswerOptions, AnswerResult, AnswerService};
    pub use crate::config::Config;
    pub use crate::conversation::{ConversationStore, InMemoryConversationStore};
    pub use crate::error::{RagError, Result};
    pub use crate::middleware::{AuthMiddleware, InputValidator, RateLimiter};
    pub use crate::observability::{HealthChecker, MetricsCollector};
    pub use crate::rag::{MokaCacheBackend, QueryVectorizer, RagQueryService, SearchCache, SearchOptions};
    pub use crate::vector_store::{InMemoryVectorStore, VectorStore};
}
