//! Search orchestration state machine
//!
//! Deterministic finite state machine:
//! - Every non-terminal stage has exactly one successor for given inputs
//! - The only cycle is Grade → Rewrite → Retrieve, bounded by `max_rewrites`
//! - Finalize and FinalizeLimited are terminal

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    /// Invocation accepted, nothing run yet
    Init,

    /// Multi-query generation from the profile
    GenerateQueries,

    /// Embedding and hierarchical retrieval for the current round
    Retrieve,

    /// Reciprocal Rank Fusion of the round's lists
    Fuse,

    /// Relevance grading of new fused candidates
    Grade,

    /// Diagnosis and replacement query
    Rewrite,

    /// Enough relevant documents (terminal)
    Finalize,

    /// Finished short of the relevance target (terminal)
    FinalizeLimited,
}

/// Why a search finished with limited results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
    RewriteBudget,
    TimeBudget,
    EmptyScope,
}

impl LimitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitReason::RewriteBudget => "rewrite_budget",
            LimitReason::TimeBudget => "time_budget",
            LimitReason::EmptyScope => "empty_scope",
        }
    }
}

impl fmt::Display for LimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the transition function looks at
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransitionInputs {
    pub scope_empty: bool,
    pub relevant_count: usize,
    pub rewrite_count: u32,
    pub min_relevant: usize,
    pub max_rewrites: u32,
    /// A wall-clock budget ran out during the stage just completed
    pub budget_exhausted: bool,
}

impl TransitionInputs {
    pub fn has_enough_relevant(&self) -> bool {
        self.relevant_count >= self.min_relevant
    }

    pub fn can_rewrite(&self) -> bool {
        self.rewrite_count < self.max_rewrites
    }

    /// Reason reported when these inputs lead to `FinalizeLimited`
    pub fn limit_reason(&self) -> LimitReason {
        if self.scope_empty {
            LimitReason::EmptyScope
        } else if self.budget_exhausted {
            LimitReason::TimeBudget
        } else {
            LimitReason::RewriteBudget
        }
    }
}

impl SearchStage {
    /// Check if this is a terminal stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchStage::Finalize | SearchStage::FinalizeLimited)
    }

    /// Transition function
    ///
    /// Edges:
    /// 1.  Init            → GenerateQueries
    /// 2.  Init            → FinalizeLimited  (empty scope)
    /// 3.  GenerateQueries → Retrieve
    /// 4.  Retrieve        → Fuse
    /// 5.  Fuse            → Grade
    /// 6.  Grade           → Finalize         (relevant ≥ min_relevant)
    /// 7.  Grade           → Rewrite          (rewrite_count < max_rewrites)
    /// 8.  Grade           → FinalizeLimited  (rewrites used up)
    /// 9.  Rewrite         → Retrieve
    /// 10. Retrieve | Fuse | Grade | Rewrite → FinalizeLimited (budget exhausted)
    /// 11. Finalize, FinalizeLimited self-loop
    pub fn next(self, inputs: &TransitionInputs) -> SearchStage {
        use SearchStage::*;

        match self {
            Init if inputs.scope_empty => FinalizeLimited,
            Init => GenerateQueries,
            GenerateQueries => Retrieve,

            Grade if inputs.has_enough_relevant() => Finalize,
            Retrieve | Fuse | Grade | Rewrite if inputs.budget_exhausted => FinalizeLimited,

            Retrieve => Fuse,
            Fuse => Grade,
            Grade if inputs.can_rewrite() => Rewrite,
            Grade => FinalizeLimited,
            Rewrite => Retrieve,

            Finalize => Finalize,
            FinalizeLimited => FinalizeLimited,
        }
    }

    /// Every stage reachable in one step
    pub fn successors(&self) -> Vec<SearchStage> {
        use SearchStage::*;

        match self {
            Init => vec![GenerateQueries, FinalizeLimited],
            GenerateQueries => vec![Retrieve],
            Retrieve => vec![Fuse, FinalizeLimited],
            Fuse => vec![Grade, FinalizeLimited],
            Grade => vec![Finalize, Rewrite, FinalizeLimited],
            Rewrite => vec![Retrieve, FinalizeLimited],
            Finalize => vec![Finalize],
            FinalizeLimited => vec![FinalizeLimited],
        }
    }

    /// Human-readable stage name
    pub fn display_name(&self) -> &'static str {
        match self {
            SearchStage::Init => "Initializing",
            SearchStage::GenerateQueries => "Generating Queries",
            SearchStage::Retrieve => "Retrieving",
            SearchStage::Fuse => "Fusing Rankings",
            SearchStage::Grade => "Grading Relevance",
            SearchStage::Rewrite => "Rewriting Query",
            SearchStage::Finalize => "Completed",
            SearchStage::FinalizeLimited => "Completed (limited)",
        }
    }
}

impl fmt::Display for SearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
