//! Testing utilities including mock implementations.
//!
//! Deterministic, configurable fakes for every collaborator so the pipeline
//! can be exercised without a model server or vector store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::errors::{Result, SearchError};
use crate::providers::{CompletionRequest, Embedder, LanguageModel, SearchScope, SimilaritySearch};
use crate::types::document::DOCUMENT_ID_KEY;
use crate::types::{Document, FusedDocument, HierarchyTier};

/// Upload id every document built by [`doc`] belongs to
pub const TEST_UPLOAD: &str = "upload-1";

/// Build a document with placeholder content, owned by [`TEST_UPLOAD`]
pub fn doc(id: &str, tier: HierarchyTier, similarity: f32) -> Document {
    let mut metadata = serde_json::Map::new();
    metadata.insert(DOCUMENT_ID_KEY.to_string(), Value::from(TEST_UPLOAD));

    Document {
        id: id.to_string(),
        content: format!("Plan document {}", id),
        source_collection: "plans".to_string(),
        tier,
        similarity,
        metadata,
    }
}

/// Build a fused document with the given content and score
pub fn fused(id: &str, content: &str, rrf_score: f64) -> FusedDocument {
    FusedDocument {
        id: id.to_string(),
        content: content.to_string(),
        source_collection: "plans".to_string(),
        tier: HierarchyTier::Specific,
        metadata: serde_json::Map::new(),
        rrf_score,
        similarity: 0.7,
    }
}

/// Build a fused document with the given similarity
pub fn fused_with_similarity(id: &str, similarity: f32) -> FusedDocument {
    FusedDocument {
        similarity,
        ..fused(id, &format!("Plan document {}", id), 0.01)
    }
}

impl Document {
    /// Merge the fields of a JSON object into metadata
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        if let Value::Object(fields) = metadata {
            self.metadata.extend(fields);
        }
        self
    }

    /// Replace content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
}

/// A mock language model.
///
/// Rules are checked in insertion order against the prompt; the first
/// pattern found in the prompt decides the reply, otherwise the default
/// reply is used.
pub struct MockLanguageModel {
    rules: Vec<(String, Reply)>,
    default: Reply,
    latency: Option<Duration>,
    slow_patterns: Vec<(String, Duration)>,
    requests: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: Reply::Text(String::new()),
            latency: None,
            slow_patterns: Vec::new(),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Reply used when no rule matches
    pub fn with_default_response(mut self, response: &str) -> Self {
        self.default = Reply::Text(response.to_string());
        self
    }

    /// Fail every call that no rule matches
    pub fn failing(mut self) -> Self {
        self.default = Reply::Fail;
        self
    }

    /// Reply with `response` when the prompt contains `pattern`
    pub fn with_response_when(mut self, pattern: &str, response: &str) -> Self {
        self.rules
            .push((pattern.to_string(), Reply::Text(response.to_string())));
        self
    }

    /// Fail when the prompt contains `pattern`
    pub fn failing_when(mut self, pattern: &str) -> Self {
        self.rules.push((pattern.to_string(), Reply::Fail));
        self
    }

    /// Delay every reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay replies to prompts containing `pattern`
    pub fn with_latency_when(mut self, pattern: &str, latency: Duration) -> Self {
        self.slow_patterns.push((pattern.to_string(), latency));
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.read().unwrap().clone()
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.read().unwrap().len()
    }

    /// Calls whose prompt contains `pattern`
    pub fn calls_containing(&self, pattern: &str) -> usize {
        self.requests
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.prompt.contains(pattern))
            .count()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let reply = self
            .rules
            .iter()
            .find(|(pattern, _)| request.prompt.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default.clone());

        let latency = self
            .slow_patterns
            .iter()
            .find(|(pattern, _)| request.prompt.contains(pattern.as_str()))
            .map(|(_, latency)| *latency)
            .or(self.latency);

        self.requests.write().unwrap().push(request);

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail => Err(SearchError::LlmApi("mock language model failure".to_string())),
        }
    }
}

/// A mock embedder producing deterministic vectors from text
pub struct MockEmbedder {
    dimension: usize,
    failures_remaining: AtomicUsize,
    texts: Arc<RwLock<Vec<String>>>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: 8,
            failures_remaining: AtomicUsize::new(0),
            texts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Fail the next `n` calls
    pub fn failing_times(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every call
    pub fn failing(self) -> Self {
        self.failing_times(usize::MAX)
    }

    /// The vector this embedder returns for `text`
    pub fn vector_for(text: &str) -> Vec<f32> {
        Self::embed_with_dimension(text, 8)
    }

    fn embed_with_dimension(text: &str, dimension: usize) -> Vec<f32> {
        (0..dimension)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                (i, text).hash(&mut hasher);
                (hasher.finish() % 2000) as f32 / 1000.0 - 1.0
            })
            .collect()
    }

    /// Texts embedded so far, in call order
    pub fn texts(&self) -> Vec<String> {
        self.texts.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.texts.read().unwrap().len()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts.write().unwrap().push(text.to_string());

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SearchError::Embedding("mock embedder failure".to_string()));
        }

        Ok(Self::embed_with_dimension(text, self.dimension))
    }
}

/// A mock similarity search over fixed per-tier corpora.
///
/// Honors document scope, tier, entity filter and `top_k` like a real store. Routes keyed by
/// query vector override the corpus for that vector.
#[derive(Default)]
pub struct MockSimilaritySearch {
    general: Vec<Document>,
    specific: Vec<Document>,
    routes: Vec<(Vec<f32>, HierarchyTier, Vec<Document>)>,
    failures_remaining: AtomicUsize,
    latency: Option<Duration>,
    scopes: Arc<RwLock<Vec<SearchScope>>>,
}

impl MockSimilaritySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_general(mut self, docs: Vec<Document>) -> Self {
        self.general = docs;
        self
    }

    pub fn with_specific(mut self, docs: Vec<Document>) -> Self {
        self.specific = docs;
        self
    }

    /// Serve `docs` for `tier` when the query vector equals `vector`
    pub fn with_route(mut self, vector: Vec<f32>, tier: HierarchyTier, docs: Vec<Document>) -> Self {
        self.routes.push((vector, tier, docs));
        self
    }

    /// Fail the next `n` calls
    pub fn failing_times(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Scopes searched so far
    pub fn scopes(&self) -> Vec<SearchScope> {
        self.scopes.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.scopes.read().unwrap().len()
    }

    fn corpus(&self, query_vector: &[f32], tier: HierarchyTier) -> &[Document] {
        self.routes
            .iter()
            .find(|(vector, route_tier, _)| vector.as_slice() == query_vector && *route_tier == tier)
            .map(|(_, _, docs)| docs.as_slice())
            .unwrap_or(match tier {
                HierarchyTier::General => self.general.as_slice(),
                HierarchyTier::Specific => self.specific.as_slice(),
            })
    }
}

#[async_trait]
impl SimilaritySearch for MockSimilaritySearch {
    async fn search(
        &self,
        query_vector: &[f32],
        scope: &SearchScope,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        self.scopes.write().unwrap().push(scope.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SearchError::Search("mock search failure".to_string()));
        }

        let mut docs: Vec<Document> = self
            .corpus(query_vector, scope.tier)
            .iter()
            .filter(|d| d.tier == scope.tier)
            .filter(|d| {
                d.document_id()
                    .map(|id| scope.document_ids.iter().any(|s| s == id))
                    .unwrap_or(false)
            })
            .filter(|d| {
                scope
                    .entity_filter
                    .as_ref()
                    .map(|filter| filter.matches(d))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        docs.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        docs.truncate(top_k);
        Ok(docs)
    }
}
