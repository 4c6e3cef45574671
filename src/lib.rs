//! covermatch - Agentic retrieval for insurance plan recommendation
//!
//! Turns a client profile into a small set of relevance-checked plan
//! documents drawn from a hierarchical vector store.
//!
//! # Architecture
//!
//! - **Query generation**: profile to 2-5 focus-tagged queries
//! - **Hierarchical retrieval**: general tier, entity extraction, specific tier
//! - **Rank fusion**: Reciprocal Rank Fusion across queries
//! - **Relevance grading**: bounded-concurrency LLM labels
//! - **Rewrite**: diagnosed, bounded query rewriting
//! - **Orchestrator**: explicit stage machine over all of the above

pub mod errors;
pub mod types;
pub mod retry;

// Collaborator seams and adapters
pub mod providers;

// Pipeline stages
pub mod rag;
pub mod search;

// Configuration and CLI
pub mod cli;
pub mod config;

// Deterministic fakes for tests
pub mod testing;

// Re-export commonly used types
pub use errors::{Result, SearchError};
pub use search::{PipelineConfig, SearchMetadata, SearchOrchestrator, SearchOutcome};
pub use types::{ClientProfile, Document, FusedDocument, GradedDocument};
