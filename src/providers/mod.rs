//! Collaborator seams
//!
//! The pipeline only talks to embedding, similarity search and language
//! model services through these traits. Concrete adapters live in the
//! submodules; deterministic fakes live in `crate::testing`.

pub mod local;
pub mod ollama;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::types::{Document, HierarchyTier};

pub use local::LocalEmbedder;
pub use ollama::OllamaClient;
pub use qdrant::QdrantSearch;

/// Text embedding service
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Must be deterministic within a session.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Entities a specific-tier search may be restricted to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub operators: Vec<String>,
    pub plan_codes: Vec<String>,
}

impl EntityFilter {
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty() && self.plan_codes.is_empty()
    }

    /// Whether a document matches any operator or plan code
    pub fn matches(&self, doc: &Document) -> bool {
        doc.operator()
            .map(|op| self.operators.iter().any(|o| o.eq_ignore_ascii_case(op)))
            .unwrap_or(false)
            || doc
                .plan_code()
                .map(|code| self.plan_codes.iter().any(|c| c.eq_ignore_ascii_case(code)))
                .unwrap_or(false)
    }
}

/// Logical scope of a similarity search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchScope {
    pub document_ids: Vec<String>,
    pub tier: HierarchyTier,
    pub entity_filter: Option<EntityFilter>,
}

/// Vector similarity search service
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Return up to `top_k` documents ordered by descending similarity
    async fn search(
        &self,
        query_vector: &[f32],
        scope: &SearchScope,
        top_k: usize,
    ) -> Result<Vec<Document>>;
}

/// Single completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    /// JSON schema the output must follow, if structured output is wanted
    pub schema: Option<serde_json::Value>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Large language model used for generation, grading and rewriting
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}
