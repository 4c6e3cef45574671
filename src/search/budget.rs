//! Wall-clock budgets for the retrieval and grading phases
//!
//! Each phase has a total allowance shared across all rounds of one search.
//! Work runs under `tokio::time::timeout` for whatever remains.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::{Result, SearchError};

/// Budget configuration in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Retrieval and fusion across all rounds
    pub retrieval_ms: u64,
    /// Grading across all rounds
    pub grading_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            retrieval_ms: 15_000,
            grading_ms: 20_000,
        }
    }
}

/// Budgeted phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPhase {
    Retrieval,
    Grading,
}

impl BudgetPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetPhase::Retrieval => "retrieval",
            BudgetPhase::Grading => "grading",
        }
    }
}

/// Per-search budget tracker
#[derive(Debug, Clone)]
pub struct SearchBudget {
    config: BudgetConfig,
    retrieval_spent: Duration,
    grading_spent: Duration,
}

impl SearchBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            retrieval_spent: Duration::ZERO,
            grading_spent: Duration::ZERO,
        }
    }

    pub fn allowance(&self, phase: BudgetPhase) -> Duration {
        match phase {
            BudgetPhase::Retrieval => Duration::from_millis(self.config.retrieval_ms),
            BudgetPhase::Grading => Duration::from_millis(self.config.grading_ms),
        }
    }

    pub fn spent(&self, phase: BudgetPhase) -> Duration {
        match phase {
            BudgetPhase::Retrieval => self.retrieval_spent,
            BudgetPhase::Grading => self.grading_spent,
        }
    }

    pub fn remaining(&self, phase: BudgetPhase) -> Duration {
        self.allowance(phase).saturating_sub(self.spent(phase))
    }

    pub fn is_exhausted(&self, phase: BudgetPhase) -> bool {
        self.remaining(phase).is_zero()
    }

    /// Deadline for work starting now
    pub fn deadline(&self, phase: BudgetPhase) -> Instant {
        Instant::now() + self.remaining(phase)
    }

    pub fn record(&mut self, phase: BudgetPhase, elapsed: Duration) {
        match phase {
            BudgetPhase::Retrieval => self.retrieval_spent += elapsed,
            BudgetPhase::Grading => self.grading_spent += elapsed,
        }
    }

    /// Run `work` under the phase's remaining budget, charging the time used
    pub async fn run<F, T>(&mut self, phase: BudgetPhase, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let remaining = self.remaining(phase);
        if remaining.is_zero() {
            return Err(self.exceeded(phase));
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(remaining, work).await;
        self.record(phase, started.elapsed());

        match outcome {
            Ok(result) => result,
            Err(_) => {
                // Timed-out work counts as the whole allowance
                self.record(phase, remaining);
                Err(self.exceeded(phase))
            }
        }
    }

    fn exceeded(&self, phase: BudgetPhase) -> SearchError {
        SearchError::BudgetExceeded {
            phase: phase.as_str().to_string(),
            budget_ms: self.allowance(phase).as_millis() as u64,
        }
    }
}
