//! Query rewriting on insufficient relevant yield
//!
//! Diagnosis picks the failure mode, the mode picks a strategy, and one LLM
//! call proposes the replacement. A deterministic template covers every
//! failure path so the replacement always differs from the original.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::errors::{Result, SearchError};
use crate::providers::{CompletionRequest, LanguageModel};
use crate::rag::prompts;
use crate::types::{ClientProfile, FusedDocument};

/// Why the last round did not yield enough relevant documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteProblem {
    ZeroResults,
    LowSimilarity,
    InsufficientCoverage,
}

impl RewriteProblem {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteProblem::ZeroResults => "zero_results",
            RewriteProblem::LowSimilarity => "low_similarity",
            RewriteProblem::InsufficientCoverage => "insufficient_coverage",
        }
    }

    /// Human-readable description used in the rewrite prompt
    pub fn describe(&self) -> &'static str {
        match self {
            RewriteProblem::ZeroResults => "the query returned no documents at all",
            RewriteProblem::LowSimilarity => {
                "the documents found were only weakly similar to the query"
            }
            RewriteProblem::InsufficientCoverage => {
                "too few of the documents found were relevant to this client"
            }
        }
    }
}

impl fmt::Display for RewriteProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the replacement query should differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStrategy {
    Broaden,
    Specialize,
    Diversify,
}

impl RewriteStrategy {
    pub fn for_problem(problem: RewriteProblem) -> Self {
        match problem {
            RewriteProblem::ZeroResults => RewriteStrategy::Broaden,
            RewriteProblem::LowSimilarity => RewriteStrategy::Specialize,
            RewriteProblem::InsufficientCoverage => RewriteStrategy::Diversify,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteStrategy::Broaden => "broaden",
            RewriteStrategy::Specialize => "specialize",
            RewriteStrategy::Diversify => "diversify",
        }
    }

    /// Instruction given to the model for this strategy
    pub fn instruction(&self) -> &'static str {
        match self {
            RewriteStrategy::Broaden => {
                "Broaden the query: remove restrictive details such as specific operators, \
                 plan codes or exact prices, and use more general insurance terms."
            }
            RewriteStrategy::Specialize => {
                "Make the query more specific: use precise insurance terminology for the \
                 client's needs such as coverage type, network, co-payment or waiting period."
            }
            RewriteStrategy::Diversify => {
                "Approach the need from a different angle: ask about alternative plan types, \
                 other operators or a different aspect of coverage than the original query."
            }
        }
    }
}

/// Rewrite limits and diagnosis thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewritePolicy {
    pub max_rewrites: u32,
    pub min_relevant: usize,
    /// Mean fused similarity below this counts as `low_similarity`
    pub low_similarity_threshold: f32,
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self {
            max_rewrites: 2,
            min_relevant: 3,
            low_similarity_threshold: 0.5,
        }
    }
}

/// Classify why a round fell short; `None` when it yielded enough
pub fn diagnose(
    fused: &[FusedDocument],
    relevant_count: usize,
    policy: &RewritePolicy,
) -> Option<RewriteProblem> {
    if relevant_count >= policy.min_relevant {
        return None;
    }
    if fused.is_empty() {
        return Some(RewriteProblem::ZeroResults);
    }

    let mean_similarity =
        fused.iter().map(|d| d.similarity as f64).sum::<f64>() / fused.len() as f64;
    if mean_similarity < policy.low_similarity_threshold as f64 {
        return Some(RewriteProblem::LowSimilarity);
    }

    Some(RewriteProblem::InsufficientCoverage)
}

/// A replacement query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewrittenQuery {
    pub text: String,
    pub strategy: RewriteStrategy,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    pub temperature: f32,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self { temperature: 0.5 }
    }
}

/// Produces one replacement query per call. Does not track the rewrite bound.
pub struct RewriteController {
    llm: Arc<dyn LanguageModel>,
    config: RewriteConfig,
}

impl RewriteController {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self::with_config(llm, RewriteConfig::default())
    }

    pub fn with_config(llm: Arc<dyn LanguageModel>, config: RewriteConfig) -> Self {
        Self { llm, config }
    }

    pub async fn rewrite_query(
        &self,
        original: &str,
        problem: RewriteProblem,
        attempt: u32,
        profile: &ClientProfile,
    ) -> RewrittenQuery {
        let strategy = RewriteStrategy::for_problem(problem);

        match self.try_rewrite(original, problem, strategy, attempt, profile).await {
            Ok(text) => {
                tracing::debug!(%problem, strategy = strategy.as_str(), %text, "query rewritten");
                RewrittenQuery {
                    text,
                    strategy,
                    used_fallback: false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "rewrite failed, using template rewrite");
                RewrittenQuery {
                    text: template_rewrite(original, strategy, attempt, profile),
                    strategy,
                    used_fallback: true,
                }
            }
        }
    }

    async fn try_rewrite(
        &self,
        original: &str,
        problem: RewriteProblem,
        strategy: RewriteStrategy,
        attempt: u32,
        profile: &ClientProfile,
    ) -> Result<String> {
        let request = CompletionRequest::new(prompts::rewrite_prompt(
            original, problem, strategy, attempt, profile,
        ))
        .with_temperature(self.config.temperature);

        let raw = self.llm.complete(request).await?;
        let text = clean_rewrite(&raw);

        if text.is_empty() {
            return Err(SearchError::GenerationParse("empty rewrite".to_string()));
        }
        if text.eq_ignore_ascii_case(original.trim()) {
            return Err(SearchError::GenerationParse(
                "rewrite repeats the original query".to_string(),
            ));
        }
        Ok(text)
    }
}

/// First non-empty line with surrounding quotes and labels stripped
fn clean_rewrite(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .unwrap_or_default();

    let line = line
        .strip_prefix("Query:")
        .or_else(|| line.strip_prefix("query:"))
        .unwrap_or(line);

    line.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// Deterministic replacement that never equals `original`
pub fn template_rewrite(
    original: &str,
    strategy: RewriteStrategy,
    attempt: u32,
    profile: &ClientProfile,
) -> String {
    let original = original.trim();

    let candidate = match strategy {
        RewriteStrategy::Broaden => {
            let location = profile
                .location_display()
                .map(|l| format!(" in {}", l))
                .unwrap_or_default();
            format!("health insurance plan options{}", location)
        }
        RewriteStrategy::Specialize => {
            let needs = if profile.has_conditions() {
                format!(" for {}", profile.pre_existing_conditions.join(", "))
            } else {
                String::new()
            };
            format!(
                "{} coverage details, network and waiting periods{}",
                original, needs
            )
        }
        RewriteStrategy::Diversify => {
            let angle = match attempt % 2 {
                1 => "alternative operators and plan types",
                _ => "hospital network, co-payment and reimbursement rules",
            };
            format!("{} {}", original, angle)
        }
    };

    if candidate.trim().eq_ignore_ascii_case(original) {
        format!("{} comparison", candidate.trim())
    } else {
        candidate.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fused_with_similarity, MockLanguageModel};
    use crate::types::Location;

    fn policy() -> RewritePolicy {
        RewritePolicy::default()
    }

    #[test]
    fn test_diagnose_zero_results() {
        assert_eq!(diagnose(&[], 0, &policy()), Some(RewriteProblem::ZeroResults));
    }

    #[test]
    fn test_diagnose_low_similarity_before_coverage() {
        let fused = vec![
            fused_with_similarity("a", 0.3),
            fused_with_similarity("b", 0.4),
        ];
        assert_eq!(diagnose(&fused, 1, &policy()), Some(RewriteProblem::LowSimilarity));
    }

    #[test]
    fn test_diagnose_insufficient_coverage() {
        let fused = vec![
            fused_with_similarity("a", 0.8),
            fused_with_similarity("b", 0.7),
        ];
        assert_eq!(
            diagnose(&fused, 2, &policy()),
            Some(RewriteProblem::InsufficientCoverage)
        );
    }

    #[test]
    fn test_diagnose_enough_relevant() {
        let fused = vec![fused_with_similarity("a", 0.1)];
        assert_eq!(diagnose(&fused, 3, &policy()), None);
    }

    #[test]
    fn test_strategy_mapping() {
        assert_eq!(
            RewriteStrategy::for_problem(RewriteProblem::ZeroResults),
            RewriteStrategy::Broaden
        );
        assert_eq!(
            RewriteStrategy::for_problem(RewriteProblem::LowSimilarity),
            RewriteStrategy::Specialize
        );
        assert_eq!(
            RewriteStrategy::for_problem(RewriteProblem::InsufficientCoverage),
            RewriteStrategy::Diversify
        );
    }

    #[test]
    fn test_clean_rewrite() {
        assert_eq!(clean_rewrite("\"family plan in Austin\"\n"), "family plan in Austin");
        assert_eq!(clean_rewrite("\n\nQuery: plan with maternity"), "plan with maternity");
        assert_eq!(clean_rewrite("```\nplan\n```"), "plan");
        assert_eq!(clean_rewrite("   "), "");
    }

    #[test]
    fn test_template_rewrite_always_differs() {
        let profile = ClientProfile::default();
        for strategy in [
            RewriteStrategy::Broaden,
            RewriteStrategy::Specialize,
            RewriteStrategy::Diversify,
        ] {
            for original in ["health insurance plan options", "", "plan"] {
                let rewritten = template_rewrite(original, strategy, 1, &profile);
                assert!(!rewritten.eq_ignore_ascii_case(original), "{:?}", strategy);
                assert!(!rewritten.is_empty());
            }
        }
    }

    #[test]
    fn test_broaden_template_keeps_location() {
        let profile = ClientProfile {
            location: Some(Location {
                city: Some("Austin".to_string()),
                state: Some("TX".to_string()),
            }),
            ..Default::default()
        };
        let text = template_rewrite("Amil S380 plan", RewriteStrategy::Broaden, 1, &profile);
        assert!(text.contains("Austin"));
        assert!(!text.contains("S380"));
    }

    #[tokio::test]
    async fn test_rewrite_uses_llm_output() {
        let llm = MockLanguageModel::new().with_default_response("pediatric coverage family plan");
        let controller = RewriteController::new(Arc::new(llm));

        let rewritten = controller
            .rewrite_query(
                "family plan",
                RewriteProblem::InsufficientCoverage,
                1,
                &ClientProfile::default(),
            )
            .await;

        assert_eq!(rewritten.text, "pediatric coverage family plan");
        assert_eq!(rewritten.strategy, RewriteStrategy::Diversify);
        assert!(!rewritten.used_fallback);
    }

    #[tokio::test]
    async fn test_rewrite_repeating_original_falls_back() {
        let llm = MockLanguageModel::new().with_default_response("Family Plan");
        let controller = RewriteController::new(Arc::new(llm));

        let rewritten = controller
            .rewrite_query("family plan", RewriteProblem::LowSimilarity, 1, &ClientProfile::default())
            .await;

        assert!(rewritten.used_fallback);
        assert_ne!(rewritten.text.to_lowercase(), "family plan");
    }

    #[tokio::test]
    async fn test_rewrite_llm_failure_falls_back() {
        let llm = MockLanguageModel::new().failing();
        let controller = RewriteController::new(Arc::new(llm));

        let rewritten = controller
            .rewrite_query("family plan", RewriteProblem::ZeroResults, 2, &ClientProfile::default())
            .await;

        assert!(rewritten.used_fallback);
        assert_eq!(rewritten.strategy, RewriteStrategy::Broaden);
        assert_eq!(rewritten.text, "health insurance plan options");
    }
}
