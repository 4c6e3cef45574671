// Hierarchical retrieval module
pub mod engine;
pub mod entities;

pub use engine::{EntityMatch, HierarchicalResult, HierarchicalRetriever, RetrievalParams};
pub use entities::Entity;
