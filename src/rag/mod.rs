// Retrieval stages of the search pipeline
//
// Components:
// - Query Generator: profile to ranked, focus-tagged queries
// - Hierarchical Retrieval: general tier, entity extraction, specific tier
// - Fusion: Reciprocal Rank Fusion across per-query lists
// - Grading: per-document relevance labels
// - Rewrite: diagnosis and replacement queries

pub mod fusion;
pub mod grading;
pub mod prompts;
pub mod query_gen;
pub mod retrieval;
pub mod rewrite;

// Re-export key types
pub use fusion::{FusionConfig, RankFuser};
pub use grading::{GradingConfig, GradingReport, RelevanceGrader};
pub use query_gen::{QueryGenConfig, QueryGeneration, QueryGenerator};
pub use retrieval::{EntityMatch, HierarchicalResult, HierarchicalRetriever, RetrievalParams};
pub use rewrite::{
    RewriteConfig, RewriteController, RewritePolicy, RewriteProblem, RewriteStrategy,
    RewrittenQuery,
};
