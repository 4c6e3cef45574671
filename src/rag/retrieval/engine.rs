//! Two-phase hierarchical retrieval
//!
//! General tier first, then the specific tier narrowed toward the operators
//! and plan codes the general results mention.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::errors::{Result, SearchError};
use crate::providers::{SearchScope, SimilaritySearch};
use crate::rag::retrieval::entities::{entity_filter, extract_entities, Entity};
use crate::types::{Document, HierarchyTier};

/// How extracted entities shape the specific-tier search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "factor", rename_all = "snake_case")]
pub enum EntityMatch {
    /// Restrict the search to matching documents
    Filter,
    /// Search unrestricted, multiply matching similarities by `1 + factor`
    Boost(f32),
}

/// Retrieval parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    pub general_top_k: usize,
    pub specific_top_k: usize,
    pub general_weight: f32,
    pub specific_weight: f32,
    pub entity_match: EntityMatch,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            general_top_k: 5,
            specific_top_k: 10,
            general_weight: 0.3,
            specific_weight: 0.7,
            entity_match: EntityMatch::Filter,
        }
    }
}

impl RetrievalParams {
    pub fn tier_weight(&self, tier: HierarchyTier) -> f32 {
        match tier {
            HierarchyTier::General => self.general_weight,
            HierarchyTier::Specific => self.specific_weight,
        }
    }

    /// Pre-fusion ordering signal
    pub fn hierarchical_score(&self, doc: &Document) -> f32 {
        doc.similarity * self.tier_weight(doc.tier)
    }
}

/// Output of one hierarchical retrieval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalResult {
    pub general_docs: Vec<Document>,
    pub specific_docs: Vec<Document>,
    pub extracted_entities: Vec<Entity>,
}

impl HierarchicalResult {
    pub fn is_empty(&self) -> bool {
        self.general_docs.is_empty() && self.specific_docs.is_empty()
    }

    /// Both tiers merged into one list ordered by hierarchical score
    pub fn ranked(&self, params: &RetrievalParams) -> Vec<Document> {
        let mut ranked: Vec<(f32, Document)> = self
            .general_docs
            .iter()
            .chain(self.specific_docs.iter())
            .map(|doc| (params.hierarchical_score(doc), doc.clone()))
            .collect();

        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });

        ranked.into_iter().map(|(_, doc)| doc).collect()
    }
}

/// Hierarchical retriever over a similarity search collaborator
pub struct HierarchicalRetriever {
    search: Arc<dyn SimilaritySearch>,
    params: RetrievalParams,
}

impl HierarchicalRetriever {
    pub fn new(search: Arc<dyn SimilaritySearch>) -> Self {
        Self::with_params(search, RetrievalParams::default())
    }

    pub fn with_params(search: Arc<dyn SimilaritySearch>, params: RetrievalParams) -> Self {
        Self { search, params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve with the default parameters
    pub async fn retrieve_hierarchical(
        &self,
        query_embedding: &[f32],
        document_scope: &[String],
    ) -> Result<HierarchicalResult> {
        self.retrieve_with_params(query_embedding, document_scope, &self.params)
            .await
    }

    /// Retrieve with explicit parameters
    pub async fn retrieve_with_params(
        &self,
        query_embedding: &[f32],
        document_scope: &[String],
        params: &RetrievalParams,
    ) -> Result<HierarchicalResult> {
        if document_scope.is_empty() {
            return Ok(HierarchicalResult::default());
        }

        // Phase 1: general tier
        let general_scope = SearchScope {
            document_ids: document_scope.to_vec(),
            tier: HierarchyTier::General,
            entity_filter: None,
        };
        let mut general_docs = self
            .search
            .search(query_embedding, &general_scope, params.general_top_k)
            .await
            .map_err(|e| SearchError::retrieval("general tier search", e))?;
        sort_by_similarity(&mut general_docs);
        general_docs.truncate(params.general_top_k);

        // Phase 2: entities from general metadata
        let extracted_entities = extract_entities(&general_docs);

        // Phase 3: specific tier
        let specific_docs = self
            .retrieve_specific(query_embedding, document_scope, &extracted_entities, params)
            .await?;

        tracing::debug!(
            general = general_docs.len(),
            specific = specific_docs.len(),
            entities = extracted_entities.len(),
            "hierarchical retrieval complete"
        );

        Ok(HierarchicalResult {
            general_docs,
            specific_docs,
            extracted_entities,
        })
    }

    async fn retrieve_specific(
        &self,
        query_embedding: &[f32],
        document_scope: &[String],
        entities: &[Entity],
        params: &RetrievalParams,
    ) -> Result<Vec<Document>> {
        let filter = entity_filter(entities);
        let mut scope = SearchScope {
            document_ids: document_scope.to_vec(),
            tier: HierarchyTier::Specific,
            entity_filter: None,
        };

        let mut docs = match (params.entity_match, filter) {
            (EntityMatch::Filter, Some(filter)) => {
                scope.entity_filter = Some(filter);
                let filtered = self.search_specific(query_embedding, &scope, params).await?;
                if filtered.is_empty() {
                    tracing::debug!("entity-filtered search empty, retrying unfiltered");
                    scope.entity_filter = None;
                    self.search_specific(query_embedding, &scope, params).await?
                } else {
                    filtered
                }
            }
            (EntityMatch::Boost(factor), Some(filter)) => {
                let mut docs = self.search_specific(query_embedding, &scope, params).await?;
                for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
                    doc.similarity *= 1.0 + factor;
                }
                docs
            }
            (_, None) => self.search_specific(query_embedding, &scope, params).await?,
        };

        sort_by_similarity(&mut docs);
        docs.truncate(params.specific_top_k);
        Ok(docs)
    }

    async fn search_specific(
        &self,
        query_embedding: &[f32],
        scope: &SearchScope,
        params: &RetrievalParams,
    ) -> Result<Vec<Document>> {
        self.search
            .search(query_embedding, scope, params.specific_top_k)
            .await
            .map_err(|e| SearchError::retrieval("specific tier search", e))
    }
}

fn sort_by_similarity(docs: &mut [Document]) {
    docs.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
