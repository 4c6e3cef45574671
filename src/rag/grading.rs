//! LLM relevance grading
//!
//! Concurrency model:
//! - Documents are split into batches of `batch_size`
//! - At most `max_concurrent_batches` batches in flight (semaphore-bounded)
//! - Documents inside a batch are graded concurrently, one call each
//! - A failed call degrades to `partially_relevant`, never aborts the batch
//! - A deadline drops only the calls still pending when it passes

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::errors::{Result, SearchError};
use crate::providers::{CompletionRequest, LanguageModel};
use crate::rag::prompts;
use crate::types::{ClientProfile, FusedDocument, GradedDocument, RelevanceLabel};

/// Reason recorded when a grading call fails
pub const GRADING_FAILED_REASON: &str = "grading_failed";

/// Grading configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    /// Low temperature keeps labels stable across runs
    pub temperature: f32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_concurrent_batches: 3,
            temperature: 0.0,
        }
    }
}

/// Result of grading a list of documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradingReport {
    /// One entry per graded document, in input order
    pub graded: Vec<GradedDocument>,
    /// Some documents were left ungraded because the deadline passed
    pub timed_out: bool,
}

impl GradingReport {
    /// Relevant and partially relevant documents
    pub fn relevant(&self) -> impl Iterator<Item = &GradedDocument> {
        self.graded.iter().filter(|g| g.label.counts_as_relevant())
    }

    pub fn relevant_count(&self) -> usize {
        self.relevant().count()
    }

    pub fn irrelevant_count(&self) -> usize {
        self.graded.len() - self.relevant_count()
    }
}

#[derive(Debug, Deserialize)]
struct RawGrade {
    label: String,
    #[serde(default)]
    reason: String,
}

/// Grades fused documents against a client profile
pub struct RelevanceGrader {
    llm: Arc<dyn LanguageModel>,
    config: GradingConfig,
}

impl RelevanceGrader {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self::with_config(llm, GradingConfig::default())
    }

    pub fn with_config(llm: Arc<dyn LanguageModel>, config: GradingConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    /// Grade every document; output has one entry per input document
    pub async fn grade_documents(
        &self,
        docs: &[FusedDocument],
        profile: &ClientProfile,
    ) -> GradingReport {
        self.grade_until(docs, profile, None).await
    }

    /// Grade documents until `deadline`; grades finished before it are kept
    pub async fn grade_until(
        &self,
        docs: &[FusedDocument],
        profile: &ClientProfile,
        deadline: Option<Instant>,
    ) -> GradingReport {
        let batch_size = self.config.batch_size.max(1);
        // Permits are scoped to this call
        let semaphore = Semaphore::new(self.config.max_concurrent_batches.max(1));

        let batches = docs
            .chunks(batch_size)
            .map(|batch| self.grade_batch(&semaphore, batch, profile, deadline));
        let results: Vec<Vec<Option<GradedDocument>>> = join_all(batches).await;

        let mut report = GradingReport::default();
        for graded in results.into_iter().flatten() {
            match graded {
                Some(graded) => report.graded.push(graded),
                None => report.timed_out = true,
            }
        }

        tracing::debug!(
            graded = report.graded.len(),
            relevant = report.relevant_count(),
            timed_out = report.timed_out,
            "grading complete"
        );
        report
    }

    /// One slot per document; `None` where the deadline passed first
    async fn grade_batch(
        &self,
        semaphore: &Semaphore,
        batch: &[FusedDocument],
        profile: &ClientProfile,
        deadline: Option<Instant>,
    ) -> Vec<Option<GradedDocument>> {
        // The semaphore is never closed
        let permit = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, semaphore.acquire())
                .await
                .ok()
                .and_then(|acquired| acquired.ok()),
            None => semaphore.acquire().await.ok(),
        };
        let Some(_permit) = permit else {
            return vec![None; batch.len()];
        };

        join_all(
            batch
                .iter()
                .map(|doc| self.grade_within(doc, profile, deadline)),
        )
        .await
    }

    async fn grade_within(
        &self,
        doc: &FusedDocument,
        profile: &ClientProfile,
        deadline: Option<Instant>,
    ) -> Option<GradedDocument> {
        match deadline {
            Some(deadline) => {
                let graded = tokio::time::timeout_at(deadline, self.grade_one(doc, profile)).await;
                if graded.is_err() {
                    tracing::warn!(document_id = %doc.id, "grading deadline passed");
                }
                graded.ok()
            }
            None => Some(self.grade_one(doc, profile).await),
        }
    }

    async fn grade_one(&self, doc: &FusedDocument, profile: &ClientProfile) -> GradedDocument {
        match self.request_grade(doc, profile).await {
            Ok((label, reason)) => GradedDocument {
                document: doc.clone(),
                label,
                reason,
            },
            Err(e) => {
                tracing::warn!(document_id = %doc.id, error = %e, "grading call failed, defaulting label");
                GradedDocument {
                    document: doc.clone(),
                    label: RelevanceLabel::PartiallyRelevant,
                    reason: GRADING_FAILED_REASON.to_string(),
                }
            }
        }
    }

    async fn request_grade(
        &self,
        doc: &FusedDocument,
        profile: &ClientProfile,
    ) -> Result<(RelevanceLabel, String)> {
        let request = CompletionRequest::new(prompts::grading_prompt(profile, &doc.content))
            .with_schema(prompts::grading_schema())
            .with_temperature(self.config.temperature);

        let raw = self
            .llm
            .complete(request)
            .await
            .map_err(|e| SearchError::GradingFailure {
                document_id: doc.id.clone(),
                message: e.to_string(),
            })?;

        parse_grade(&raw).map_err(|message| SearchError::GradingFailure {
            document_id: doc.id.clone(),
            message,
        })
    }
}

fn parse_grade(raw: &str) -> std::result::Result<(RelevanceLabel, String), String> {
    let json = prompts::extract_json_object(raw).ok_or("no JSON object in output")?;
    let grade: RawGrade = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let label = RelevanceLabel::parse(&grade.label)
        .ok_or_else(|| format!("unknown label: {}", grade.label))?;
    Ok((label, grade.reason.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fused, MockLanguageModel};
    use std::time::Duration;

    const RELEVANT: &str = r#"{"label": "relevant", "reason": "fits budget"}"#;
    const IRRELEVANT: &str = r#"{"label": "irrelevant", "reason": "dental only"}"#;

    #[test]
    fn test_parse_grade() {
        let (label, reason) = parse_grade(RELEVANT).unwrap();
        assert_eq!(label, RelevanceLabel::Relevant);
        assert_eq!(reason, "fits budget");

        assert!(parse_grade(r#"{"label": "sort of"}"#).is_err());
        assert!(parse_grade("relevant").is_err());
    }

    #[tokio::test]
    async fn test_labels_follow_content() {
        let llm = MockLanguageModel::new()
            .with_default_response(RELEVANT)
            .with_response_when("dental", IRRELEVANT);
        let grader = RelevanceGrader::new(Arc::new(llm));

        let docs = vec![
            fused("a", "Family plan with hospital coverage", 0.03),
            fused("b", "Standalone dental plan", 0.02),
        ];
        let report = grader.grade_documents(&docs, &ClientProfile::default()).await;

        assert_eq!(report.graded.len(), 2);
        assert_eq!(report.graded[0].id(), "a");
        assert_eq!(report.graded[0].label, RelevanceLabel::Relevant);
        assert_eq!(report.graded[1].label, RelevanceLabel::Irrelevant);
        assert_eq!(report.relevant_count(), 1);
        assert_eq!(report.irrelevant_count(), 1);
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_batch() {
        let llm = MockLanguageModel::new()
            .with_default_response(RELEVANT)
            .failing_when("document three");
        let grader = RelevanceGrader::new(Arc::new(llm));

        let docs: Vec<FusedDocument> = ["one", "two", "three", "four", "five"]
            .iter()
            .map(|n| fused(n, &format!("document {}", n), 0.01))
            .collect();
        let report = grader.grade_documents(&docs, &ClientProfile::default()).await;

        assert_eq!(report.graded.len(), 5);
        let failed = &report.graded[2];
        assert_eq!(failed.label, RelevanceLabel::PartiallyRelevant);
        assert_eq!(failed.reason, GRADING_FAILED_REASON);
        assert_eq!(report.relevant_count(), 5);
    }

    #[tokio::test]
    async fn test_unparseable_grade_defaults() {
        let llm = MockLanguageModel::new().with_default_response("I think it is fine");
        let grader = RelevanceGrader::new(Arc::new(llm));

        let report = grader
            .grade_documents(&[fused("a", "plan", 0.01)], &ClientProfile::default())
            .await;

        assert_eq!(report.graded[0].reason, GRADING_FAILED_REASON);
    }

    #[tokio::test]
    async fn test_grading_uses_low_temperature() {
        let llm = Arc::new(MockLanguageModel::new().with_default_response(RELEVANT));
        let grader = RelevanceGrader::new(llm.clone());

        grader
            .grade_documents(&[fused("a", "plan", 0.01)], &ClientProfile::default())
            .await;

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.0));
        assert!(requests[0].schema.is_some());
    }

    #[tokio::test]
    async fn test_batches_cover_all_documents() {
        let llm = Arc::new(MockLanguageModel::new().with_default_response(RELEVANT));
        let grader = RelevanceGrader::with_config(
            llm.clone(),
            GradingConfig {
                batch_size: 2,
                max_concurrent_batches: 1,
                temperature: 0.0,
            },
        );

        let docs: Vec<FusedDocument> = (0..7)
            .map(|i| fused(&format!("d{}", i), "plan", 0.01))
            .collect();
        let report = grader.grade_documents(&docs, &ClientProfile::default()).await;

        assert_eq!(report.graded.len(), 7);
        let ids: Vec<&str> = report.graded.iter().map(|g| g.id()).collect();
        assert_eq!(ids, vec!["d0", "d1", "d2", "d3", "d4", "d5", "d6"]);
        assert_eq!(llm.call_count(), 7);
    }

    #[tokio::test]
    async fn test_deadline_skips_slow_batches() {
        let llm = MockLanguageModel::new()
            .with_default_response(RELEVANT)
            .with_latency(Duration::from_millis(200));
        let grader = RelevanceGrader::new(Arc::new(llm));

        let deadline = Instant::now() + Duration::from_millis(20);
        let report = grader
            .grade_until(&[fused("a", "plan", 0.01)], &ClientProfile::default(), Some(deadline))
            .await;

        assert!(report.graded.is_empty());
        assert!(report.timed_out);
    }

    #[tokio::test]
    async fn test_deadline_keeps_finished_grades() {
        let llm = MockLanguageModel::new()
            .with_default_response(RELEVANT)
            .with_latency_when("stalled", Duration::from_secs(5));
        let grader = RelevanceGrader::new(Arc::new(llm));

        let docs: Vec<FusedDocument> = ["one", "two", "stalled", "four", "five"]
            .iter()
            .map(|n| fused(n, &format!("document {}", n), 0.01))
            .collect();
        let deadline = Instant::now() + Duration::from_millis(200);
        let report = grader
            .grade_until(&docs, &ClientProfile::default(), Some(deadline))
            .await;

        assert!(report.timed_out);
        let ids: Vec<&str> = report.graded.iter().map(|g| g.id()).collect();
        assert_eq!(ids, vec!["one", "two", "four", "five"]);
        assert_eq!(report.relevant_count(), 4);
    }
}
