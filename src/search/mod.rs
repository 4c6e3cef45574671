//! Search orchestration
//!
//! Stage machine, wall-clock budgets and the orchestrator that drives both.

pub mod budget;
pub mod orchestrator;
pub mod state;

pub use budget::{BudgetConfig, BudgetPhase, SearchBudget};
pub use orchestrator::{
    GradeSummary, PipelineConfig, SearchMetadata, SearchOrchestrator, SearchOutcome, SearchState,
};
pub use state::{LimitReason, SearchStage, TransitionInputs};
