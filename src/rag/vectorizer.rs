//! Query normalization and embedding

use super::models::{normalize_text, Query};
use crate::ai::AiServiceManager;
use crate::error::Result;
use crate::middleware::ValidationError;
use std::sync::Arc;
use tracing::debug;

/// Turns questions into embeddings through the AI service manager
pub struct QueryVectorizer {
    ai: Arc<AiServiceManager>,
    max_chars: usize,
}

impl QueryVectorizer {
    pub fn new(ai: Arc<AiServiceManager>, max_chars: usize) -> Self {
        Self {
            ai,
            max_chars: max_chars.max(1),
        }
    }

    /// Normalized text that would be sent for embedding
    pub fn prepare(&self, raw: &str) -> String {
        truncate_chars(&normalize_text(raw), self.max_chars)
    }

    /// Normalize, truncate and embed a question
    pub async fn vectorize(&self, raw: &str) -> Result<Vec<f32>> {
        let text = self.prepare(raw);
        if text.is_empty() {
            return Err(ValidationError::EmptyInput { field: "question" }.into());
        }

        let invocation = self.ai.embed(&text).await?;
        debug!(
            provider = %invocation.provider,
            dimension = invocation.value.len(),
            "Vectorized query"
        );
        Ok(invocation.value)
    }

    /// Embed a query, reusing its embedding if it was already computed
    pub async fn embed_query<'q>(&self, query: &'q Query) -> Result<&'q [f32]> {
        let embedding = query
            .embedding_cell()
            .get_or_try_init(|| self.vectorize(&query.normalized))
            .await?;
        Ok(embedding.as_slice())
    }
}

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
