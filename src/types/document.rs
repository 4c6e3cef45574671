//! Document types flowing through retrieval, fusion and grading

use serde::{Deserialize, Serialize};

/// Metadata key carrying the id of the uploaded document a chunk belongs to
pub const DOCUMENT_ID_KEY: &str = "document_id";

/// Metadata key carrying the insurance operator name
pub const OPERATOR_KEY: &str = "operator";

/// Metadata key carrying the plan code
pub const PLAN_CODE_KEY: &str = "plan_code";

/// Hierarchy tier of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyTier {
    /// Broadly applicable content (rules, comparisons, overviews)
    General,
    /// Content specific to one operator or plan
    Specific,
}

impl HierarchyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            HierarchyTier::General => "general",
            HierarchyTier::Specific => "specific",
        }
    }
}

/// Retrievable content unit, as returned by the similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source_collection: String,
    pub tier: HierarchyTier,
    pub similarity: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    /// Owning upload id from metadata, if present
    pub fn document_id(&self) -> Option<&str> {
        metadata_str(&self.metadata, DOCUMENT_ID_KEY)
    }

    /// Operator name from metadata, if present
    pub fn operator(&self) -> Option<&str> {
        metadata_str(&self.metadata, OPERATOR_KEY)
    }

    /// Plan code from metadata, if present
    pub fn plan_code(&self) -> Option<&str> {
        metadata_str(&self.metadata, PLAN_CODE_KEY)
    }
}

fn metadata_str<'a>(
    metadata: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Document after reciprocal rank fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedDocument {
    pub id: String,
    pub content: String,
    pub source_collection: String,
    pub tier: HierarchyTier,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub rrf_score: f64,
    /// Highest similarity observed for this id across the fused lists
    pub similarity: f32,
}

impl FusedDocument {
    /// Seed a fused entry from its first occurrence
    pub fn from_document(doc: &Document, rrf_score: f64) -> Self {
        Self {
            id: doc.id.clone(),
            content: doc.content.clone(),
            source_collection: doc.source_collection.clone(),
            tier: doc.tier,
            metadata: doc.metadata.clone(),
            rrf_score,
            similarity: doc.similarity,
        }
    }

    pub fn operator(&self) -> Option<&str> {
        metadata_str(&self.metadata, OPERATOR_KEY)
    }

    pub fn plan_code(&self) -> Option<&str> {
        metadata_str(&self.metadata, PLAN_CODE_KEY)
    }
}

/// LLM-assigned relevance label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceLabel {
    Relevant,
    PartiallyRelevant,
    Irrelevant,
}

impl RelevanceLabel {
    /// Relevant and partially relevant documents stay in the working set
    pub fn counts_as_relevant(&self) -> bool {
        !matches!(self, RelevanceLabel::Irrelevant)
    }

    /// Lenient parse used on LLM output
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "relevant" => Some(RelevanceLabel::Relevant),
            "partially_relevant" | "partial" => Some(RelevanceLabel::PartiallyRelevant),
            "irrelevant" | "not_relevant" => Some(RelevanceLabel::Irrelevant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelevanceLabel::Relevant => "relevant",
            RelevanceLabel::PartiallyRelevant => "partially_relevant",
            RelevanceLabel::Irrelevant => "irrelevant",
        }
    }
}

/// Fused document with its grade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedDocument {
    pub document: FusedDocument,
    pub label: RelevanceLabel,
    pub reason: String,
}

impl GradedDocument {
    pub fn id(&self) -> &str {
        &self.document.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_metadata(metadata: serde_json::Value) -> Document {
        Document {
            id: "d1".to_string(),
            content: "content".to_string(),
            source_collection: "plans".to_string(),
            tier: HierarchyTier::General,
            similarity: 0.8,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_entity_accessors() {
        let doc = doc_with_metadata(json!({"operator": "Amil", "plan_code": "S450"}));
        assert_eq!(doc.operator(), Some("Amil"));
        assert_eq!(doc.plan_code(), Some("S450"));
    }

    #[test]
    fn test_entity_accessors_ignore_blank_and_non_string() {
        let doc = doc_with_metadata(json!({"operator": "  ", "plan_code": 450}));
        assert_eq!(doc.operator(), None);
        assert_eq!(doc.plan_code(), None);
    }

    #[test]
    fn test_label_parse() {
        assert_eq!(RelevanceLabel::parse("Relevant"), Some(RelevanceLabel::Relevant));
        assert_eq!(
            RelevanceLabel::parse("partially relevant"),
            Some(RelevanceLabel::PartiallyRelevant)
        );
        assert_eq!(RelevanceLabel::parse("not-relevant"), Some(RelevanceLabel::Irrelevant));
        assert_eq!(RelevanceLabel::parse("maybe"), None);
    }

    #[test]
    fn test_counts_as_relevant() {
        assert!(RelevanceLabel::Relevant.counts_as_relevant());
        assert!(RelevanceLabel::PartiallyRelevant.counts_as_relevant());
        assert!(!RelevanceLabel::Irrelevant.counts_as_relevant());
    }
}
