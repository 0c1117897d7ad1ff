//! In-memory vector store using cosine similarity

use super::{StoreFilter, VectorStore};
use crate::error::{Result, SearchError};
use crate::rag::SearchHit;
use async_trait::async_trait;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredFragment {
    embedding: Vec<f32>,
    hit: SearchHit,
}

/// Fragment store held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    fragments: RwLock<Vec<StoredFragment>>,
    queries: AtomicUsize,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a fragment; `hit.score` is ignored
    pub fn upsert(&self, embedding: Vec<f32>, hit: SearchHit) -> Result<()> {
        let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());

        if let Some(expected) = fragments.first().map(|f| f.embedding.len()) {
            if expected != embedding.len() {
                return Err(SearchError::InvalidDimension {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }
        }

        fragments.retain(|f| f.hit.fragment_id != hit.fragment_id);
        fragments.push(StoredFragment { embedding, hit });
        Ok(())
    }

    /// Remove every fragment of a document
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut fragments = self.fragments.write().unwrap_or_else(|e| e.into_inner());
        let before = fragments.len();
        fragments.retain(|f| f.hit.document_id != document_id);
        before - fragments.len()
    }

    pub fn len(&self) -> usize {
        self.fragments.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of similarity queries served
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

/// Cosine similarity; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn query(&self, embedding: &[f32], filter: &StoreFilter, limit: usize) -> Result<Vec<SearchHit>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let fragments = self.fragments.read().unwrap_or_else(|e| e.into_inner());

        if let Some(expected) = fragments.first().map(|f| f.embedding.len()) {
            if expected != embedding.len() {
                return Err(SearchError::InvalidDimension {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }
        }

        let mut hits: Vec<SearchHit> = fragments
            .iter()
            .filter(|f| filter.matches(&f.hit))
            .map(|f| SearchHit {
                score: cosine_similarity(embedding, &f.embedding),
                ..f.hit.clone()
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(CmpOrdering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
