//! Qdrant-backed similarity search
//!
//! Expected point payload:
//! - `document_id`: id of the uploaded document the chunk belongs to (scope key)
//! - `tier`: "general" | "specific"
//! - `content`: chunk text
//! - `source_collection`, `operator`, `plan_code`: optional metadata
//!
//! Keyword matches in Qdrant are exact. Entity values are sent as given plus
//! their lower- and upper-case forms; other casings of a stored operator or
//! plan code (e.g. "SulAmerica" vs "Sulamerica") are not matched.

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, Condition, Filter, PointId, ScoredPoint,
    SearchPointsBuilder, Value as QdrantValue,
};
use qdrant_client::Qdrant;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::errors::{Result, SearchError};
use crate::providers::{EntityFilter, SearchScope, SimilaritySearch};
use crate::types::document::{DOCUMENT_ID_KEY, OPERATOR_KEY, PLAN_CODE_KEY};
use crate::types::{Document, HierarchyTier};

/// Payload key holding the hierarchy tier
pub const TIER_KEY: &str = "tier";

/// Payload key holding the chunk text
pub const CONTENT_KEY: &str = "content";

/// Payload key holding the source collection name
pub const SOURCE_COLLECTION_KEY: &str = "source_collection";

/// Similarity search over a single Qdrant collection
pub struct QdrantSearch {
    client: Qdrant,
    collection: String,
}

impl QdrantSearch {
    /// Connect to Qdrant at `url`
    pub fn new(url: &str, collection: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl SimilaritySearch for QdrantSearch {
    async fn search(
        &self,
        query_vector: &[f32],
        scope: &SearchScope,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let request = SearchPointsBuilder::new(
            self.collection.clone(),
            query_vector.to_vec(),
            top_k as u64,
        )
        .filter(build_filter(scope))
        .with_payload(true);

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| SearchError::Search(format!("Qdrant search failed: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| point_to_document(point, scope.tier, &self.collection))
            .collect())
    }
}

/// Translate a logical scope into a Qdrant filter
fn build_filter(scope: &SearchScope) -> Filter {
    let must = vec![
        Condition::matches(DOCUMENT_ID_KEY, scope.document_ids.clone()),
        Condition::matches(TIER_KEY, scope.tier.as_str().to_string()),
    ];

    Filter {
        must,
        should: scope
            .entity_filter
            .as_ref()
            .map(entity_conditions)
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn entity_conditions(filter: &EntityFilter) -> Vec<Condition> {
    let mut should = Vec::new();
    if !filter.operators.is_empty() {
        should.push(Condition::matches(OPERATOR_KEY, case_variants(&filter.operators)));
    }
    if !filter.plan_codes.is_empty() {
        should.push(Condition::matches(PLAN_CODE_KEY, case_variants(&filter.plan_codes)));
    }
    should
}

/// Each value as given, lower-cased and upper-cased, without repeats
fn case_variants(values: &[String]) -> Vec<String> {
    let mut variants: Vec<String> = Vec::with_capacity(values.len() * 3);
    for value in values {
        for variant in [value.clone(), value.to_lowercase(), value.to_uppercase()] {
            if !variants.contains(&variant) {
                variants.push(variant);
            }
        }
    }
    variants
}

fn point_to_document(point: ScoredPoint, tier: HierarchyTier, collection: &str) -> Document {
    let payload: HashMap<String, QdrantValue> = point.payload;

    let content = payload
        .get(CONTENT_KEY)
        .and_then(qdrant_value_to_string)
        .unwrap_or_default();
    let source_collection = payload
        .get(SOURCE_COLLECTION_KEY)
        .and_then(qdrant_value_to_string)
        .unwrap_or_else(|| collection.to_string());

    let metadata = payload
        .into_iter()
        .filter(|(key, _)| key != CONTENT_KEY)
        .filter_map(|(key, value)| qdrant_to_json_value(&value).map(|json| (key, json)))
        .collect();

    Document {
        id: point_id_to_string(&point.id),
        content,
        source_collection,
        tier,
        similarity: point.score,
        metadata,
    }
}

fn qdrant_to_json_value(value: &QdrantValue) -> Option<JsonValue> {
    value.kind.as_ref().and_then(|kind| match kind {
        Kind::StringValue(s) => Some(JsonValue::String(s.clone())),
        Kind::IntegerValue(i) => Some(JsonValue::Number((*i).into())),
        Kind::DoubleValue(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
        Kind::BoolValue(b) => Some(JsonValue::Bool(*b)),
        _ => None,
    })
}

fn qdrant_value_to_string(value: &QdrantValue) -> Option<String> {
    match value.kind.as_ref() {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn point_id_to_string(point_id: &Option<PointId>) -> String {
    match point_id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(u)) => u.clone(),
        None => "unknown".to_string(),
    }
}
