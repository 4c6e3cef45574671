//! Multi-query generation from a client profile
//!
//! One LLM call proposes a query per focus; the output is reconciled against
//! the focus set the profile warrants and gaps are filled from templates.
//! Any failure falls back to a single template `general` query.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{Result, SearchError};
use crate::providers::{CompletionRequest, LanguageModel};
use crate::rag::prompts;
use crate::types::query::sort_by_priority;
use crate::types::{ClientProfile, Query, QueryFocus};

/// Query generation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryGenConfig {
    /// Sampling temperature for the generation call
    pub temperature: f32,
}

impl Default for QueryGenConfig {
    fn default() -> Self {
        Self { temperature: 0.3 }
    }
}

/// Generated queries plus whether the template fallback was used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryGeneration {
    pub queries: Vec<Query>,
    pub used_fallback: bool,
}

#[derive(Debug, Deserialize)]
struct RawQueries {
    queries: Vec<RawQuery>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    #[serde(default)]
    text: String,
    #[serde(default)]
    focus: String,
    #[serde(default)]
    priority: Option<i64>,
}

/// Generates the ranked query set for a profile
pub struct QueryGenerator {
    llm: Arc<dyn LanguageModel>,
    config: QueryGenConfig,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self::with_config(llm, QueryGenConfig::default())
    }

    pub fn with_config(llm: Arc<dyn LanguageModel>, config: QueryGenConfig) -> Self {
        Self { llm, config }
    }

    /// Generate 2 to 5 queries sorted by priority. Never fails.
    pub async fn generate_queries(&self, profile: &ClientProfile) -> QueryGeneration {
        let foci = expected_foci(profile);

        match self.try_generate(profile, &foci).await {
            Ok(queries) => {
                tracing::debug!(count = queries.len(), "generated queries");
                QueryGeneration {
                    queries,
                    used_fallback: false,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "query generation failed, using template query");
                QueryGeneration {
                    queries: vec![template_query(QueryFocus::General, profile)],
                    used_fallback: true,
                }
            }
        }
    }

    async fn try_generate(&self, profile: &ClientProfile, foci: &[QueryFocus]) -> Result<Vec<Query>> {
        let request = CompletionRequest::new(prompts::query_generation_prompt(profile, foci))
            .with_schema(prompts::query_generation_schema())
            .with_temperature(self.config.temperature);

        let raw = self.llm.complete(request).await?;
        let parsed = parse_queries(&raw)?;
        reconcile(parsed, foci, profile)
    }
}

/// Focus categories warranted by the profile, in canonical order
pub fn expected_foci(profile: &ClientProfile) -> Vec<QueryFocus> {
    let mut foci = vec![QueryFocus::General];
    if profile.has_dependents() {
        foci.push(QueryFocus::Dependents);
    }
    if profile.has_conditions() {
        foci.push(QueryFocus::Conditions);
    }
    if profile.has_preferences() {
        foci.push(QueryFocus::Coverage);
    }
    foci.push(QueryFocus::Price);
    foci
}

fn parse_queries(raw: &str) -> Result<Vec<RawQuery>> {
    let json = prompts::extract_json_object(raw)
        .ok_or_else(|| SearchError::GenerationParse("no JSON object in output".to_string()))?;

    let parsed: RawQueries = serde_json::from_str(json)
        .map_err(|e| SearchError::GenerationParse(e.to_string()))?;

    Ok(parsed.queries)
}

/// Keep one usable query per expected focus, fill gaps from templates
fn reconcile(raw: Vec<RawQuery>, foci: &[QueryFocus], profile: &ClientProfile) -> Result<Vec<Query>> {
    let mut accepted: Vec<Query> = Vec::new();

    for candidate in raw {
        let text = candidate.text.trim();
        if text.is_empty() {
            continue;
        }
        let Some(focus) = QueryFocus::parse(&candidate.focus) else {
            continue;
        };
        if !foci.contains(&focus) || accepted.iter().any(|q| q.focus == focus) {
            continue;
        }
        let priority = candidate
            .priority
            .unwrap_or_else(|| default_priority(focus) as i64)
            .clamp(1, 5) as u8;
        accepted.push(Query::new(text, focus, priority));
    }

    if accepted.is_empty() {
        return Err(SearchError::GenerationParse(
            "no usable queries in output".to_string(),
        ));
    }

    for focus in foci {
        if !accepted.iter().any(|q| q.focus == *focus) {
            accepted.push(template_query(*focus, profile));
        }
    }

    sort_by_priority(&mut accepted);
    Ok(accepted)
}

fn default_priority(focus: QueryFocus) -> u8 {
    match focus {
        QueryFocus::General => 5,
        QueryFocus::Dependents | QueryFocus::Conditions => 4,
        QueryFocus::Coverage | QueryFocus::Price => 3,
    }
}

/// Deterministic query for a focus built from the profile
pub fn template_query(focus: QueryFocus, profile: &ClientProfile) -> Query {
    let age = profile
        .age
        .map(|a| format!(" for a {} year old", a))
        .unwrap_or_default();
    let location = profile
        .location_display()
        .map(|l| format!(" in {}", l))
        .unwrap_or_default();
    let budget = profile
        .monthly_budget
        .map(|b| format!(" up to {:.0} per month", b))
        .unwrap_or_default();

    let text = match focus {
        QueryFocus::General => format!("health insurance plan{}{}{}", age, location, budget),
        QueryFocus::Dependents => {
            let deps: Vec<String> = profile
                .dependents
                .iter()
                .map(|d| format!("{} aged {}", d.relationship, d.age))
                .collect();
            format!("family health plan covering {}", deps.join(" and "))
        }
        QueryFocus::Conditions => format!(
            "health plan coverage and waiting period for {}",
            profile.pre_existing_conditions.join(", ")
        ),
        QueryFocus::Coverage => format!(
            "health plan with {}",
            profile.preferences.as_deref().unwrap_or_default().trim()
        ),
        QueryFocus::Price => format!("affordable health plan monthly price{}{}", budget, location),
    };

    Query::new(text, focus, default_priority(focus))
}
