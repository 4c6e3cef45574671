//! Type definitions module
//!
//! Core data model shared by every pipeline stage.

pub mod document;
pub mod profile;
pub mod query;

// Re-export commonly used types
pub use document::{Document, FusedDocument, GradedDocument, HierarchyTier, RelevanceLabel};
pub use profile::{ClientProfile, Dependent, Location};
pub use query::{Query, QueryFocus};
