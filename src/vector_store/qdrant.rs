//! Qdrant-backed vector store

use super::{StoreFilter, VectorStore};
use crate::config::VectorStoreConfig;
use crate::error::{Result, SearchError};
use crate::rag::{SearchHit, SourceMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::with_payload_selector::SelectorOptions;
use qdrant_client::qdrant::{Condition, Filter, Range, SearchPoints, Value, WithPayloadSelector};
use qdrant_client::Qdrant;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Vector store backed by a Qdrant collection
///
/// Each point payload carries the fragment and document metadata:
/// `fragment_id`, `document_id`, `content`, `document_name`, `position`,
/// `owner_id`, `mime_type`, `extension` (lower-cased, without the dot),
/// `file_size` and `created_at` (unix seconds).
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorStore {
    /// Create a new Qdrant-backed store
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        info!("Connecting to Qdrant at {}", config.url);

        let mut builder = Qdrant::from_url(&config.url).timeout(Duration::from_secs(config.timeout_secs));
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.expose_secret().to_string());
        }

        let client = builder
            .build()
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            collection: config.collection.clone(),
        })
    }

    fn to_qdrant_filter(filter: &StoreFilter) -> Filter {
        let mut must = vec![Condition::matches("owner_id", filter.owner_id.clone())];

        if !filter.document_types.is_empty() {
            // a type matches either the mime type or the file extension
            let extensions: Vec<String> = filter
                .document_types
                .iter()
                .map(|t| t.trim_start_matches('.').to_string())
                .collect();
            must.push(
                Filter::should([
                    Condition::matches("mime_type", filter.document_types.clone()),
                    Condition::matches("extension", extensions),
                ])
                .into(),
            );
        }

        if !filter.document_ids.is_empty() {
            must.push(Condition::matches("document_id", filter.document_ids.clone()));
        }

        if filter.created_after.is_some() || filter.created_before.is_some() {
            must.push(Condition::range(
                "created_at",
                Range {
                    gte: filter.created_after.map(|t| t.timestamp() as f64),
                    lte: filter.created_before.map(|t| t.timestamp() as f64),
                    ..Default::default()
                },
            ));
        }

        if filter.min_size.is_some() || filter.max_size.is_some() {
            must.push(Condition::range(
                "file_size",
                Range {
                    gte: filter.min_size.map(|v| v as f64),
                    lte: filter.max_size.map(|v| v as f64),
                    ..Default::default()
                },
            ));
        }

        Filter::must(must)
    }
}

fn string_field(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.kind.as_ref()).and_then(|kind| match kind {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    })
}

fn integer_field(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| v.kind.as_ref()).and_then(|kind| match kind {
        Kind::IntegerValue(i) => Some(*i),
        Kind::DoubleValue(d) => Some(*d as i64),
        _ => None,
    })
}

/// Convert a Qdrant payload into a search hit
fn parse_hit(payload: &HashMap<String, Value>, score: f32) -> Result<SearchHit> {
    let required = |key: &str| {
        string_field(payload, key).ok_or_else(|| SearchError::InvalidPayload(format!("missing field '{}'", key)))
    };

    Ok(SearchHit {
        fragment_id: required("fragment_id")?,
        document_id: required("document_id")?,
        content: required("content")?,
        score,
        metadata: SourceMetadata {
            document_name: required("document_name")?,
            position: integer_field(payload, "position").unwrap_or_default().max(0) as u32,
            owner_id: required("owner_id")?,
            mime_type: string_field(payload, "mime_type"),
            file_size: integer_field(payload, "file_size").map(|v| v.max(0) as u64),
            document_created_at: integer_field(payload, "created_at").and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        },
    })
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    #[instrument(skip(self, embedding, filter), fields(collection = %self.collection))]
    async fn query(&self, embedding: &[f32], filter: &StoreFilter, limit: usize) -> Result<Vec<SearchHit>> {
        debug!("Searching with limit: {}", limit);

        let request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: embedding.to_vec(),
            limit: limit as u64,
            filter: Some(Self::to_qdrant_filter(filter)),
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| SearchError::QueryFailed(e.to_string()))?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            match parse_hit(&point.payload, point.score) {
                Ok(hit) => hits.push(hit),
                Err(e) => warn!(error = %e, "Skipping point with malformed payload"),
            }
        }

        debug!("Found {} results", hits.len());
        Ok(hits)
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map(|_| ())
            .map_err(|e| SearchError::Unavailable(e.to_string()).into())
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::condition::ConditionOneOf;

    fn payload() -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("fragment_id".to_string(), Value::from("f1".to_string()));
        map.insert("document_id".to_string(), Value::from("d1".to_string()));
        map.insert("content".to_string(), Value::from("Refunds are issued within 30 days.".to_string()));
        map.insert("document_name".to_string(), Value::from("policy.pdf".to_string()));
        map.insert("position".to_string(), Value::from(3_i64));
        map.insert("owner_id".to_string(), Value::from("alice".to_string()));
        map.insert("file_size".to_string(), Value::from(2048_i64));
        map.insert("created_at".to_string(), Value::from(1_700_000_000_i64));
        map
    }

    #[test]
    fn test_parse_hit() {
        let hit = parse_hit(&payload(), 0.87).unwrap();
        assert_eq!(hit.fragment_id, "f1");
        assert_eq!(hit.metadata.position, 3);
        assert_eq!(hit.metadata.file_size, Some(2048));
        assert_eq!(hit.metadata.document_created_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(hit.metadata.mime_type.is_none());
    }

    #[test]
    fn test_parse_hit_missing_field() {
        let mut map = payload();
        map.remove("owner_id");
        assert!(parse_hit(&map, 0.5).is_err());
    }

    fn field_keys(conditions: &[Condition]) -> Vec<&str> {
        conditions
            .iter()
            .filter_map(|c| match &c.condition_one_of {
                Some(ConditionOneOf::Field(field)) => Some(field.key.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_document_types_match_mime_or_extension() {
        let filter = QdrantVectorStore::to_qdrant_filter(&StoreFilter {
            owner_id: "alice".to_string(),
            document_types: vec!["pdf".to_string(), "text/plain".to_string()],
            ..Default::default()
        });

        assert_eq!(filter.must.len(), 2);
        let Some(ConditionOneOf::Filter(types)) = &filter.must[1].condition_one_of else {
            panic!("document types should be a nested filter");
        };
        assert_eq!(field_keys(&types.should), vec!["mime_type", "extension"]);
        assert!(types.must.is_empty());
    }

    #[test]
    fn test_filter_always_scopes_owner() {
        let filter = QdrantVectorStore::to_qdrant_filter(&StoreFilter {
            owner_id: "alice".to_string(),
            min_size: Some(10),
            ..Default::default()
        });
        assert_eq!(filter.must.len(), 2);
    }
}
