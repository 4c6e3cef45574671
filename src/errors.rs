//! Error types for covermatch
//!
//! Only retrieval infrastructure failures are fatal to a search. Every other
//! variant is either retried or degraded by the stage that observes it.

use thiserror::Error;

/// Main error type for the retrieval pipeline
#[derive(Error, Debug)]
pub enum SearchError {
    /// Embedding or similarity search failed after the stage retry budget
    #[error("Retrieval failed during {stage}: {message}")]
    TransientRetrieval { stage: String, message: String },

    /// Embedding collaborator errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Similarity search collaborator errors
    #[error("Similarity search error: {0}")]
    Search(String),

    /// Language model API errors
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Query generation output could not be parsed
    #[error("Query generation output malformed: {0}")]
    GenerationParse(String),

    /// A single document could not be graded
    #[error("Grading failed for document {document_id}: {message}")]
    GradingFailure { document_id: String, message: String },

    /// Rewrite or wall-clock budget exhausted
    #[error("{phase} budget of {budget_ms}ms exhausted")]
    BudgetExceeded { phase: String, budget_ms: u64 },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Search error: {0}")]
    Generic(String),
}

impl SearchError {
    /// Whether a collaborator call that produced this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SearchError::Embedding(_)
                | SearchError::Search(_)
                | SearchError::LlmApi(_)
                | SearchError::Http(_)
                | SearchError::Generic(_)
        )
    }

    /// Wrap a collaborator failure as a stage-level retrieval error
    pub fn retrieval(stage: &str, err: impl std::fmt::Display) -> Self {
        SearchError::TransientRetrieval {
            stage: stage.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, SearchError>;

impl From<anyhow::Error> for SearchError {
    fn from(err: anyhow::Error) -> Self {
        SearchError::Generic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SearchError::BudgetExceeded {
            phase: "grading".to_string(),
            budget_ms: 20000,
        };
        assert!(err.to_string().contains("grading"));
        assert!(err.to_string().contains("20000"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(SearchError::Search("connection reset".to_string()).is_transient());
        assert!(SearchError::Embedding("timeout".to_string()).is_transient());
        assert!(!SearchError::Config("bad".to_string()).is_transient());
        assert!(!SearchError::GenerationParse("{".to_string()).is_transient());
        assert!(!SearchError::retrieval("general tier", "down").is_transient());
    }

    #[test]
    fn test_retrieval_constructor() {
        let err = SearchError::retrieval("specific tier", "503 Service Unavailable");
        assert!(err.to_string().contains("specific tier"));
        assert!(err.to_string().contains("503"));
    }
}
