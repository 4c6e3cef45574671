//! Search orchestrator - main coordinator
//!
//! Drives one search through the stage machine:
//! - Query generation from the client profile
//! - Per-query embedding and hierarchical retrieval
//! - Rank fusion, merged across rewrite rounds
//! - Relevance grading, cached by document id
//! - Bounded query rewriting
//!
//! Holds only configuration and shared collaborators, so one orchestrator can
//! serve concurrent searches.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::errors::{Result, SearchError};
use crate::providers::{Embedder, LanguageModel, SimilaritySearch};
use crate::rag::fusion::{FusionConfig, RankFuser};
use crate::rag::grading::{GradingConfig, RelevanceGrader};
use crate::rag::query_gen::{QueryGenConfig, QueryGenerator};
use crate::rag::retrieval::entities::merge_entities;
use crate::rag::retrieval::{Entity, HierarchicalRetriever, RetrievalParams};
use crate::rag::rewrite::{
    diagnose, RewriteConfig, RewriteController, RewritePolicy, RewriteProblem,
};
use crate::retry::RetryPolicy;
use crate::search::budget::{BudgetConfig, BudgetPhase, SearchBudget};
use crate::search::state::{LimitReason, SearchStage, TransitionInputs};
use crate::types::{ClientProfile, Document, FusedDocument, GradedDocument, Query, RelevanceLabel};

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub query_generation: QueryGenConfig,
    pub retrieval: RetrievalParams,
    pub fusion: FusionConfig,
    pub grading: GradingConfig,
    pub rewrite: RewritePolicy,
    pub rewrite_generation: RewriteConfig,
    pub budget: BudgetConfig,

    /// Embedding calls in flight per round
    pub embedding_concurrency: usize,

    /// Backoff around each embedding call
    pub embed_retry: RetryPolicy,

    /// Whole-stage retries after a retrieval failure
    pub retrieval_stage_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            query_generation: QueryGenConfig::default(),
            retrieval: RetrievalParams::default(),
            fusion: FusionConfig::default(),
            grading: GradingConfig::default(),
            rewrite: RewritePolicy::default(),
            rewrite_generation: RewriteConfig::default(),
            budget: BudgetConfig::default(),
            embedding_concurrency: 4,
            embed_retry: RetryPolicy::default(),
            retrieval_stage_retries: 1,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SearchError::Config(msg.to_string()));

        if self.retrieval.general_top_k == 0 || self.retrieval.specific_top_k == 0 {
            return fail("retrieval top_k values must be greater than 0");
        }
        for weight in [self.retrieval.general_weight, self.retrieval.specific_weight] {
            if !(0.0..=1.0).contains(&weight) {
                return fail("tier weights must be between 0.0 and 1.0");
            }
        }
        if self.fusion.top_k == 0 {
            return fail("fusion top_k must be greater than 0");
        }
        if self.grading.batch_size == 0 || self.grading.max_concurrent_batches == 0 {
            return fail("grading batch_size and max_concurrent_batches must be greater than 0");
        }
        if self.rewrite.min_relevant == 0 {
            return fail("min_relevant must be greater than 0");
        }
        if self.embedding_concurrency == 0 {
            return fail("embedding_concurrency must be greater than 0");
        }
        if self.budget.retrieval_ms == 0 || self.budget.grading_ms == 0 {
            return fail("phase budgets must be greater than 0");
        }
        self.embed_retry.validate()
    }
}

/// Per-document grading summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub id: String,
    pub label: RelevanceLabel,
    pub reason: String,
}

/// What happened during one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub search_id: Uuid,
    pub query_count: usize,
    pub used_fallback_queries: bool,
    pub general_candidates: usize,
    pub specific_candidates: usize,
    pub fused_count: usize,
    pub graded_count: usize,
    pub relevant_count: usize,
    pub irrelevant_count: usize,
    pub extracted_entities: Vec<Entity>,
    pub rewrite_count: u32,
    pub rewritten_queries: Vec<String>,
    pub rewrite_problems: Vec<RewriteProblem>,
    pub retrieval_rounds: u32,
    pub limited_results: bool,
    pub limit_reason: Option<LimitReason>,
    pub graded: Vec<GradeSummary>,
    /// Every stage entered, in order
    pub stage_history: Vec<SearchStage>,
    pub final_stage: SearchStage,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Result of one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Relevant and partially relevant documents in fused order
    pub results: Vec<FusedDocument>,
    /// Every graded document still in the fused list, in fused order
    pub graded: Vec<GradedDocument>,
    pub metadata: SearchMetadata,
}

/// Working memory of one `run_search` call
#[derive(Debug, Clone)]
pub struct SearchState {
    pub stage: SearchStage,
    pub queries: Vec<Query>,
    pub used_fallback_queries: bool,
    /// Query the next rewrite starts from
    pub current_query_text: String,
    /// Query texts the next retrieval round runs
    pub pending_queries: Vec<String>,
    /// Ranked lists from the latest retrieval round
    pub round_lists: Vec<Vec<Document>>,
    pub general_candidates: usize,
    pub specific_candidates: usize,
    pub fused: Vec<FusedDocument>,
    /// Grades cached by document id
    pub grades: HashMap<String, GradedDocument>,
    pub extracted_entities: Vec<Entity>,
    pub rewrite_count: u32,
    pub rewritten_queries: Vec<String>,
    pub rewrite_problems: Vec<RewriteProblem>,
    pub retrieval_rounds: u32,
    pub budget_exhausted: bool,
    pub limit_reason: Option<LimitReason>,
    pub stage_history: Vec<SearchStage>,
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            stage: SearchStage::Init,
            queries: Vec::new(),
            used_fallback_queries: false,
            current_query_text: String::new(),
            pending_queries: Vec::new(),
            round_lists: Vec::new(),
            general_candidates: 0,
            specific_candidates: 0,
            fused: Vec::new(),
            grades: HashMap::new(),
            extracted_entities: Vec::new(),
            rewrite_count: 0,
            rewritten_queries: Vec::new(),
            rewrite_problems: Vec::new(),
            retrieval_rounds: 0,
            budget_exhausted: false,
            limit_reason: None,
            stage_history: vec![SearchStage::Init],
        }
    }

    /// Relevant or partially relevant documents in the current fused list
    pub fn relevant_count(&self) -> usize {
        self.fused
            .iter()
            .filter(|doc| {
                self.grades
                    .get(&doc.id)
                    .map(|g| g.label.counts_as_relevant())
                    .unwrap_or(false)
            })
            .count()
    }

    /// Fused documents without a cached grade
    pub fn ungraded(&self) -> Vec<FusedDocument> {
        self.fused
            .iter()
            .filter(|doc| !self.grades.contains_key(&doc.id))
            .cloned()
            .collect()
    }

    /// Graded documents in fused order, carrying current fused scores.
    /// Grades for ids no longer fused follow, ordered by id.
    pub fn graded_in_fused_order(&self) -> Vec<GradedDocument> {
        let mut graded: Vec<GradedDocument> = self
            .fused
            .iter()
            .filter_map(|doc| {
                self.grades.get(&doc.id).map(|g| GradedDocument {
                    document: doc.clone(),
                    label: g.label,
                    reason: g.reason.clone(),
                })
            })
            .collect();

        let mut detached: Vec<&GradedDocument> = self
            .grades
            .values()
            .filter(|g| !self.fused.iter().any(|doc| doc.id == g.document.id))
            .collect();
        detached.sort_by(|a, b| a.id().cmp(b.id()));
        graded.extend(detached.into_iter().cloned());

        graded
    }
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of one retrieval round
struct RoundResult {
    lists: Vec<Vec<Document>>,
    general_candidates: usize,
    specific_candidates: usize,
    entities: Vec<Entity>,
}

/// Main search orchestrator
pub struct SearchOrchestrator {
    embedder: Arc<dyn Embedder>,
    query_generator: QueryGenerator,
    retriever: HierarchicalRetriever,
    fuser: RankFuser,
    grader: RelevanceGrader,
    rewriter: RewriteController,
    config: PipelineConfig,
}

impl SearchOrchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn SimilaritySearch>,
        llm: Arc<dyn LanguageModel>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            query_generator: QueryGenerator::with_config(
                llm.clone(),
                config.query_generation.clone(),
            ),
            retriever: HierarchicalRetriever::with_params(search, config.retrieval.clone()),
            fuser: RankFuser::with_config(config.fusion.clone()),
            grader: RelevanceGrader::with_config(llm.clone(), config.grading.clone()),
            rewriter: RewriteController::with_config(llm, config.rewrite_generation.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one search for `profile` over the documents in `document_scope`
    pub async fn run_search(
        &self,
        profile: &ClientProfile,
        document_scope: &[String],
    ) -> Result<SearchOutcome> {
        let search_id = Uuid::new_v4();
        let span = tracing::info_span!("search", %search_id, scope = document_scope.len());

        self.drive(search_id, profile, document_scope)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        search_id: Uuid,
        profile: &ClientProfile,
        document_scope: &[String],
    ) -> Result<SearchOutcome> {
        let started = Instant::now();
        let mut state = SearchState::new();
        let mut budget = SearchBudget::new(self.config.budget.clone());

        while !state.stage.is_terminal() {
            match state.stage {
                SearchStage::Init | SearchStage::Finalize | SearchStage::FinalizeLimited => {}
                SearchStage::GenerateQueries => self.generate_queries(profile, &mut state).await,
                SearchStage::Retrieve => {
                    self.retrieve(document_scope, &mut state, &mut budget).await?
                }
                SearchStage::Fuse => self.fuse(&mut state, &mut budget),
                SearchStage::Grade => self.grade(profile, &mut state, &mut budget).await,
                SearchStage::Rewrite => self.rewrite(profile, &mut state).await,
            }

            let inputs = TransitionInputs {
                scope_empty: document_scope.is_empty(),
                relevant_count: state.relevant_count(),
                rewrite_count: state.rewrite_count,
                min_relevant: self.config.rewrite.min_relevant,
                max_rewrites: self.config.rewrite.max_rewrites,
                budget_exhausted: state.budget_exhausted,
            };
            let next = state.stage.next(&inputs);
            if next == SearchStage::FinalizeLimited {
                state.limit_reason = Some(inputs.limit_reason());
            }

            tracing::debug!(from = ?state.stage, to = ?next, relevant = inputs.relevant_count, "stage transition");
            state.stage = next;
            state.stage_history.push(next);
        }

        let outcome = self.finalize(search_id, state, started);
        tracing::info!(
            results = outcome.results.len(),
            rewrites = outcome.metadata.rewrite_count,
            limited = outcome.metadata.limited_results,
            elapsed_ms = outcome.metadata.elapsed_ms,
            "search complete"
        );
        Ok(outcome)
    }

    async fn generate_queries(&self, profile: &ClientProfile, state: &mut SearchState) {
        let generation = self.query_generator.generate_queries(profile).await;

        state.current_query_text = generation
            .queries
            .first()
            .map(|q| q.text.clone())
            .unwrap_or_default();
        state.pending_queries = generation.queries.iter().map(|q| q.text.clone()).collect();
        state.used_fallback_queries = generation.used_fallback;
        state.queries = generation.queries;

        tracing::info!(
            queries = state.queries.len(),
            fallback = state.used_fallback_queries,
            "queries generated"
        );
    }

    /// One retrieval round under the retrieval budget, retried as a whole
    /// on transient failure
    async fn retrieve(
        &self,
        document_scope: &[String],
        state: &mut SearchState,
        budget: &mut SearchBudget,
    ) -> Result<()> {
        let queries = distinct(&state.pending_queries);
        let mut attempt = 0;

        loop {
            let round = budget
                .run(
                    BudgetPhase::Retrieval,
                    self.retrieve_round(&queries, document_scope),
                )
                .await;

            match round {
                Ok(round) => {
                    state.retrieval_rounds += 1;
                    state.general_candidates += round.general_candidates;
                    state.specific_candidates += round.specific_candidates;
                    merge_entities(&mut state.extracted_entities, &round.entities);
                    state.round_lists = round.lists;
                    tracing::info!(
                        round = state.retrieval_rounds,
                        queries = queries.len(),
                        general = round.general_candidates,
                        specific = round.specific_candidates,
                        "retrieval round complete"
                    );
                    return Ok(());
                }
                Err(SearchError::BudgetExceeded { phase, budget_ms }) => {
                    tracing::warn!(%phase, budget_ms, "retrieval budget exhausted");
                    state.budget_exhausted = true;
                    state.round_lists.clear();
                    return Ok(());
                }
                Err(e)
                    if is_stage_retryable(&e) && attempt < self.config.retrieval_stage_retries =>
                {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "retrieval failed, retrying stage");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn retrieve_round(
        &self,
        queries: &[String],
        document_scope: &[String],
    ) -> Result<RoundResult> {
        let concurrency = self.config.embedding_concurrency.max(1);

        let embeddings: Vec<Vec<f32>> = stream::iter(queries.iter())
            .map(|query| self.embed(query))
            .buffered(concurrency)
            .try_collect()
            .await?;

        let results = stream::iter(embeddings.iter())
            .map(|embedding| self.retriever.retrieve_hierarchical(embedding, document_scope))
            .buffered(concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        let mut round = RoundResult {
            lists: Vec::with_capacity(results.len()),
            general_candidates: 0,
            specific_candidates: 0,
            entities: Vec::new(),
        };
        for result in results {
            round.general_candidates += result.general_docs.len();
            round.specific_candidates += result.specific_docs.len();
            merge_entities(&mut round.entities, &result.extracted_entities);
            round.lists.push(result.ranked(self.retriever.params()));
        }
        Ok(round)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.config
            .embed_retry
            .execute("embed", || self.embedder.embed(text))
            .await
            .map_err(|e| SearchError::retrieval("embedding", e))
    }

    fn fuse(&self, state: &mut SearchState, budget: &mut SearchBudget) {
        let started = Instant::now();
        let lists = std::mem::take(&mut state.round_lists);
        let fused = self.fuser.fuse(&lists);

        state.fused = if state.retrieval_rounds > 1 {
            self.fuser.merge(&state.fused, &fused)
        } else {
            fused
        };

        budget.record(BudgetPhase::Retrieval, started.elapsed());
        if budget.is_exhausted(BudgetPhase::Retrieval) {
            state.budget_exhausted = true;
        }
        tracing::debug!(fused = state.fused.len(), "fusion complete");
    }

    async fn grade(&self, profile: &ClientProfile, state: &mut SearchState, budget: &mut SearchBudget) {
        let pending = state.ungraded();
        if pending.is_empty() {
            return;
        }
        if budget.is_exhausted(BudgetPhase::Grading) {
            state.budget_exhausted = true;
            return;
        }

        let started = Instant::now();
        let deadline = budget.deadline(BudgetPhase::Grading);
        let report = self.grader.grade_until(&pending, profile, Some(deadline)).await;
        budget.record(BudgetPhase::Grading, started.elapsed());

        if report.timed_out {
            tracing::warn!(
                graded = report.graded.len(),
                pending = pending.len(),
                "grading budget exhausted"
            );
            state.budget_exhausted = true;
        }
        for graded in report.graded {
            state.grades.insert(graded.id().to_string(), graded);
        }

        tracing::info!(
            graded = state.grades.len(),
            relevant = state.relevant_count(),
            "grading complete"
        );
    }

    async fn rewrite(&self, profile: &ClientProfile, state: &mut SearchState) {
        let problem = diagnose(&state.fused, state.relevant_count(), &self.config.rewrite)
            .unwrap_or(RewriteProblem::InsufficientCoverage);
        let attempt = state.rewrite_count + 1;

        let rewritten = self
            .rewriter
            .rewrite_query(&state.current_query_text, problem, attempt, profile)
            .await;

        tracing::info!(
            attempt,
            %problem,
            strategy = rewritten.strategy.as_str(),
            fallback = rewritten.used_fallback,
            query = %rewritten.text,
            "query rewritten"
        );

        state.rewrite_count = attempt;
        state.rewrite_problems.push(problem);
        state.rewritten_queries.push(rewritten.text.clone());
        state.current_query_text = rewritten.text.clone();
        state.pending_queries = vec![rewritten.text];
    }

    fn finalize(&self, search_id: Uuid, state: SearchState, started: Instant) -> SearchOutcome {
        let graded = state.graded_in_fused_order();
        let results: Vec<FusedDocument> = graded
            .iter()
            .filter(|g| g.label.counts_as_relevant())
            .map(|g| g.document.clone())
            .collect();

        let metadata = SearchMetadata {
            search_id,
            query_count: state.queries.len(),
            used_fallback_queries: state.used_fallback_queries,
            general_candidates: state.general_candidates,
            specific_candidates: state.specific_candidates,
            fused_count: state.fused.len(),
            graded_count: graded.len(),
            relevant_count: results.len(),
            irrelevant_count: graded.len() - results.len(),
            extracted_entities: state.extracted_entities,
            rewrite_count: state.rewrite_count,
            rewritten_queries: state.rewritten_queries,
            rewrite_problems: state.rewrite_problems,
            retrieval_rounds: state.retrieval_rounds,
            limited_results: state.stage == SearchStage::FinalizeLimited,
            limit_reason: state.limit_reason,
            graded: graded
                .iter()
                .map(|g| GradeSummary {
                    id: g.id().to_string(),
                    label: g.label,
                    reason: g.reason.clone(),
                })
                .collect(),
            stage_history: state.stage_history,
            final_stage: state.stage,
            elapsed_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        SearchOutcome {
            results,
            graded,
            metadata,
        }
    }
}

/// Only transient retrieval failures rerun the stage
fn is_stage_retryable(err: &SearchError) -> bool {
    matches!(err, SearchError::TransientRetrieval { .. })
}

/// Drop repeated query texts, keeping first occurrence
fn distinct(queries: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(queries.len());
    for query in queries {
        if !seen.iter().any(|q| q.eq_ignore_ascii_case(query)) {
            seen.push(query.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{doc, MockEmbedder, MockLanguageModel, MockSimilaritySearch};
    use crate::types::HierarchyTier;

    const QUERIES: &str = r#"{"queries": [
        {"text": "plan overview", "focus": "general", "priority": 5},
        {"text": "plan prices", "focus": "price", "priority": 3}
    ]}"#;
    const RELEVANT: &str = r#"{"label": "relevant", "reason": "fits"}"#;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            embed_retry: RetryPolicy {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                jitter: false,
            },
            ..Default::default()
        }
    }

    fn search_with_docs(n: usize) -> MockSimilaritySearch {
        MockSimilaritySearch::new()
            .with_general(vec![doc("g1", HierarchyTier::General, 0.8)])
            .with_specific(
                (0..n)
                    .map(|i| doc(&format!("s{}", i), HierarchyTier::Specific, 0.9 - i as f32 * 0.05))
                    .collect(),
            )
    }

    fn orchestrator(search: Arc<MockSimilaritySearch>, llm: MockLanguageModel) -> SearchOrchestrator {
        SearchOrchestrator::new(
            Arc::new(MockEmbedder::new()),
            search,
            Arc::new(llm),
            fast_config(),
        )
    }

    #[test]
    fn test_pipeline_config_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding_concurrency, 4);
        assert_eq!(config.retrieval_stage_retries, 1);
        assert_eq!(config.rewrite.max_rewrites, 2);
    }

    #[test]
    fn test_pipeline_config_rejects_invalid() {
        let mut config = PipelineConfig::default();
        config.grading.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.retrieval.general_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_distinct_queries() {
        let queries = vec!["A plan".to_string(), "a plan".to_string(), "b".to_string()];
        assert_eq!(distinct(&queries), vec!["A plan".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_only_transient_retrieval_retries_stage() {
        assert!(is_stage_retryable(&SearchError::retrieval("specific tier search", "reset")));
        assert!(!is_stage_retryable(&SearchError::Config("bad collection".to_string())));
        assert!(!is_stage_retryable(&SearchError::Search("unavailable".to_string())));
    }

    #[test]
    fn test_state_relevant_count_uses_current_fused_list() {
        let mut state = SearchState::new();
        let a = crate::testing::fused("a", "plan a", 0.02);
        let b = crate::testing::fused("b", "plan b", 0.01);
        state.fused = vec![a.clone()];
        state.grades.insert(
            "b".to_string(),
            GradedDocument {
                document: b,
                label: RelevanceLabel::Relevant,
                reason: String::new(),
            },
        );
        assert_eq!(state.relevant_count(), 0);
        assert_eq!(state.ungraded().len(), 1);

        state.grades.insert(
            "a".to_string(),
            GradedDocument {
                document: a,
                label: RelevanceLabel::PartiallyRelevant,
                reason: String::new(),
            },
        );
        assert_eq!(state.relevant_count(), 1);
        assert!(state.ungraded().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_on_enough_relevant() {
        let search = Arc::new(search_with_docs(4));
        let llm = MockLanguageModel::new()
            .with_response_when("search queries", QUERIES)
            .with_default_response(RELEVANT);
        let orchestrator = orchestrator(search, llm);

        let outcome = orchestrator
            .run_search(&ClientProfile::default(), &["upload-1".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.metadata.final_stage, SearchStage::Finalize);
        assert!(!outcome.metadata.limited_results);
        assert_eq!(outcome.metadata.rewrite_count, 0);
        assert_eq!(outcome.metadata.retrieval_rounds, 1);
        assert_eq!(outcome.metadata.query_count, 2);
        assert_eq!(outcome.results.len(), 5);
        assert_eq!(
            outcome.metadata.stage_history,
            vec![
                SearchStage::Init,
                SearchStage::GenerateQueries,
                SearchStage::Retrieve,
                SearchStage::Fuse,
                SearchStage::Grade,
                SearchStage::Finalize,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_scope_makes_no_calls() {
        let search = Arc::new(MockSimilaritySearch::new());
        let llm = Arc::new(MockLanguageModel::new().with_default_response(QUERIES));
        let orchestrator = SearchOrchestrator::new(
            Arc::new(MockEmbedder::new()),
            search.clone(),
            llm.clone(),
            fast_config(),
        );

        let outcome = orchestrator
            .run_search(&ClientProfile::default(), &[])
            .await
            .unwrap();

        assert_eq!(outcome.metadata.final_stage, SearchStage::FinalizeLimited);
        assert_eq!(outcome.metadata.limit_reason, Some(LimitReason::EmptyScope));
        assert!(outcome.results.is_empty());
        assert_eq!(search.call_count(), 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_round_reaches_grading_when_fused_list_is_full() {
        let rewritten = "maternity coverage plans";
        let search = Arc::new(
            MockSimilaritySearch::new()
                .with_general(
                    (0..5)
                        .map(|i| doc(&format!("g{}", i), HierarchyTier::General, 0.8))
                        .collect(),
                )
                .with_specific(
                    (0..10)
                        .map(|i| doc(&format!("x{}", i), HierarchyTier::Specific, 0.8))
                        .collect(),
                )
                .with_route(
                    MockEmbedder::vector_for(rewritten),
                    HierarchyTier::Specific,
                    (0..3)
                        .map(|i| {
                            doc(&format!("m{}", i), HierarchyTier::Specific, 0.7)
                                .with_content(format!("[match] maternity plan {}", i))
                        })
                        .collect(),
                ),
        );
        let llm = MockLanguageModel::new()
            .with_response_when("search queries", QUERIES)
            .with_response_when("did not find enough", rewritten)
            .with_response_when("[match]", RELEVANT)
            .with_default_response(r#"{"label": "irrelevant", "reason": "no"}"#);
        let orchestrator = orchestrator(search, llm);

        let outcome = orchestrator
            .run_search(&ClientProfile::default(), &["upload-1".to_string()])
            .await
            .unwrap();

        let meta = &outcome.metadata;
        assert_eq!(meta.final_stage, SearchStage::Finalize);
        assert_eq!(meta.rewrite_count, 1);
        assert_eq!(meta.fused_count, 18);
        assert_eq!(meta.graded.len(), 18);
        assert_eq!(meta.irrelevant_count, 15);

        let mut ids: Vec<&str> = outcome.results.iter().map(|d| d.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_detached_grades_stay_in_outcome() {
        let mut state = SearchState::new();
        let kept = crate::testing::fused("kept", "plan kept", 0.02);
        let dropped = crate::testing::fused("dropped", "plan dropped", 0.01);
        state.fused = vec![kept.clone()];
        for (doc, label) in [(kept, RelevanceLabel::Relevant), (dropped, RelevanceLabel::Irrelevant)] {
            state.grades.insert(
                doc.id.clone(),
                GradedDocument {
                    document: doc,
                    label,
                    reason: String::new(),
                },
            );
        }

        let ids: Vec<String> = state
            .graded_in_fused_order()
            .iter()
            .map(|g| g.id().to_string())
            .collect();
        assert_eq!(ids, vec!["kept".to_string(), "dropped".to_string()]);
    }
}
