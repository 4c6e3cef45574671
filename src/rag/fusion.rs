//! Reciprocal Rank Fusion
//!
//! score(d) = Σ over lists of 1 / (k + rank + 1), rank 0-based.
//! Documents that rank well across several queries beat documents that rank
//! first for only one.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{Document, FusedDocument};

/// Fusion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Smoothing constant; higher values flatten rank differences
    pub k: u32,
    /// Maximum fused documents kept
    pub top_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { k: 60, top_k: 15 }
    }
}

/// Contribution of a document at 0-based `rank`
pub fn rrf_contribution(k: u32, rank: usize) -> f64 {
    1.0 / (k as f64 + rank as f64 + 1.0)
}

/// Fuse ranked lists into one list of at most `top_k` documents
pub fn fuse(result_lists: &[Vec<Document>], k: u32, top_k: usize) -> Vec<FusedDocument> {
    let mut fused: HashMap<String, FusedDocument> = HashMap::new();

    for list in result_lists {
        let mut seen_in_list: Vec<&str> = Vec::with_capacity(list.len());

        for (rank, doc) in list.iter().enumerate() {
            // Repeats within one list count once, at the best rank
            if seen_in_list.contains(&doc.id.as_str()) {
                continue;
            }
            seen_in_list.push(&doc.id);

            let contribution = rrf_contribution(k, rank);
            fused
                .entry(doc.id.clone())
                .and_modify(|entry| {
                    entry.rrf_score += contribution;
                    if doc.similarity > entry.similarity {
                        entry.similarity = doc.similarity;
                    }
                })
                .or_insert_with(|| FusedDocument::from_document(doc, contribution));
        }
    }

    finalize(fused.into_values().collect(), top_k)
}

/// Merge a new fused list into a previous one, summing scores by id
pub fn merge_fused(
    previous: &[FusedDocument],
    new: &[FusedDocument],
    top_k: usize,
) -> Vec<FusedDocument> {
    let mut merged: HashMap<String, FusedDocument> = previous
        .iter()
        .map(|doc| (doc.id.clone(), doc.clone()))
        .collect();

    for doc in new {
        merged
            .entry(doc.id.clone())
            .and_modify(|entry| {
                entry.rrf_score += doc.rrf_score;
                entry.similarity = entry.similarity.max(doc.similarity);
            })
            .or_insert_with(|| doc.clone());
    }

    finalize(merged.into_values().collect(), top_k)
}

/// Score descending, then similarity descending, then id ascending
fn finalize(mut docs: Vec<FusedDocument>, top_k: usize) -> Vec<FusedDocument> {
    docs.sort_by(compare_fused);
    docs.truncate(top_k);
    docs
}

fn compare_fused(a: &FusedDocument, b: &FusedDocument) -> Ordering {
    b.rrf_score
        .partial_cmp(&a.rrf_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Rank fuser bound to a configuration
#[derive(Debug, Clone, Default)]
pub struct RankFuser {
    config: FusionConfig,
}

impl RankFuser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn fuse(&self, result_lists: &[Vec<Document>]) -> Vec<FusedDocument> {
        fuse(result_lists, self.config.k, self.config.top_k)
    }

    /// Merge a rewrite round into the working list.
    ///
    /// Every previous and new id is kept, so new candidates always reach
    /// grading and graded documents are never evicted.
    pub fn merge(&self, previous: &[FusedDocument], new: &[FusedDocument]) -> Vec<FusedDocument> {
        let cap = self.config.top_k.max(previous.len() + new.len());
        merge_fused(previous, new, cap)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}
