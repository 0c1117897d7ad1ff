//! Vector store abstraction for fragment similarity search

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantVectorStore;

use crate::config::{VectorStoreConfig, VectorStoreKind};
use crate::error::Result;
use crate::rag::{SearchFilters, SearchHit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Filter every store query carries; the owner restriction is mandatory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreFilter {
    pub owner_id: String,
    pub document_types: Vec<String>,
    pub document_ids: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

impl StoreFilter {
    /// Build the store filter for an owner and optional search filters
    pub fn for_owner(owner_id: impl Into<String>, filters: &SearchFilters) -> Self {
        let filters = filters.normalized();
        let (created_after, created_before) = filters
            .date_range
            .as_ref()
            .map(|r| (r.start, r.end))
            .unwrap_or_default();
        let (min_size, max_size) = filters
            .file_size
            .as_ref()
            .map(|r| (r.min, r.max))
            .unwrap_or_default();

        Self {
            owner_id: owner_id.into(),
            document_types: filters.document_types,
            document_ids: filters.document_ids,
            created_after,
            created_before,
            min_size,
            max_size,
        }
    }

    /// Whether a hit satisfies this filter
    pub fn matches(&self, hit: &SearchHit) -> bool {
        let meta = &hit.metadata;
        if meta.owner_id != self.owner_id {
            return false;
        }

        if !self.document_types.is_empty() {
            let mime = meta.mime_type.as_deref().unwrap_or_default().to_lowercase();
            let name = meta.document_name.to_lowercase();
            let matched = self
                .document_types
                .iter()
                .any(|t| mime == *t || name.ends_with(&format!(".{}", t.trim_start_matches('.'))));
            if !matched {
                return false;
            }
        }

        if !self.document_ids.is_empty() && !self.document_ids.contains(&hit.document_id) {
            return false;
        }

        if self.created_after.is_some() || self.created_before.is_some() {
            let Some(created) = meta.document_created_at else {
                return false;
            };
            if self.created_after.is_some_and(|after| created < after) {
                return false;
            }
            if self.created_before.is_some_and(|before| created > before) {
                return false;
            }
        }

        if self.min_size.is_some() || self.max_size.is_some() {
            let Some(size) = meta.file_size else {
                return false;
            };
            if self.min_size.is_some_and(|min| size < min) || self.max_size.is_some_and(|max| size > max) {
                return false;
            }
        }

        true
    }
}

/// Similarity search over document fragments
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nearest fragments to `embedding` that satisfy `filter`, best first
    async fn query(&self, embedding: &[f32], filter: &StoreFilter, limit: usize) -> Result<Vec<SearchHit>>;

    /// Check store connectivity
    async fn health_check(&self) -> Result<()>;

    /// Backend name for health reporting
    fn name(&self) -> &'static str;
}

/// Build the configured vector store
pub fn build_vector_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.kind {
        VectorStoreKind::Memory => Arc::new(InMemoryVectorStore::new()),
        VectorStoreKind::Qdrant => Arc::new(QdrantVectorStore::new(config)?),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{DateRange, SizeRange, SourceMetadata};
    use chrono::Duration;

    fn hit(owner: &str) -> SearchHit {
        SearchHit {
            fragment_id: "f".to_string(),
            document_id: "d1".to_string(),
            content: "text".to_string(),
            score: 0.9,
            metadata: SourceMetadata {
                document_name: "handbook.PDF".to_string(),
                position: 0,
                owner_id: owner.to_string(),
                mime_type: Some("application/pdf".to_string()),
                file_size: Some(2048),
                document_created_at: Some(Utc::now() - Duration::days(2)),
            },
        }
    }

    #[test]
    fn test_owner_is_mandatory() {
        let filter = StoreFilter::for_owner("alice", &SearchFilters::default());
        assert!(filter.matches(&hit("alice")));
        assert!(!filter.matches(&hit("mallory")));
    }

    #[test]
    fn test_document_type_matches_mime_or_extension() {
        let by_ext = StoreFilter::for_owner(
            "alice",
            &SearchFilters {
                document_types: vec!["pdf".to_string()],
                ..Default::default()
            },
        );
        assert!(by_ext.matches(&hit("alice")));

        let by_mime = StoreFilter::for_owner(
            "alice",
            &SearchFilters {
                document_types: vec!["application/pdf".to_string()],
                ..Default::default()
            },
        );
        assert!(by_mime.matches(&hit("alice")));

        let other = StoreFilter::for_owner(
            "alice",
            &SearchFilters {
                document_types: vec!["docx".to_string()],
                ..Default::default()
            },
        );
        assert!(!other.matches(&hit("alice")));
    }

    #[test]
    fn test_ranges() {
        let filter = StoreFilter::for_owner(
            "alice",
            &SearchFilters {
                date_range: Some(DateRange {
                    start: Some(Utc::now() - Duration::days(7)),
                    end: None,
                }),
                file_size: Some(SizeRange {
                    min: Some(1024),
                    max: Some(4096),
                }),
                ..Default::default()
            },
        );
        assert!(filter.matches(&hit("alice")));

        let too_small = StoreFilter {
            min_size: Some(4096),
            ..filter.clone()
        };
        assert!(!too_small.matches(&hit("alice")));
    }
}
