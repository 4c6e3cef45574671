//! Prompt templates and structured-output schemas

use serde_json::{json, Value};

use crate::rag::rewrite::{RewriteProblem, RewriteStrategy};
use crate::types::{ClientProfile, QueryFocus};

/// Build the multi-query generation prompt
pub fn query_generation_prompt(profile: &ClientProfile, foci: &[QueryFocus]) -> String {
    let focus_list: Vec<&str> = foci.iter().map(QueryFocus::as_str).collect();

    format!(
        "You write search queries for a health insurance plan knowledge base.\n\
         Client profile: {profile}\n\n\
         Write exactly one query for each of these focus categories: {foci}.\n\
         - general: overall plan fit for the client's age, location and budget\n\
         - dependents: coverage for the listed dependents\n\
         - conditions: coverage and waiting periods for the listed conditions\n\
         - coverage: the client's stated preferences\n\
         - price: monthly cost, co-payment and value for the budget\n\
         Give each query a priority from 1 (low) to 5 (high).\n\
         Respond only with JSON: {{\"queries\": [{{\"text\": \"...\", \"focus\": \"...\", \"priority\": 3}}]}}",
        profile = profile.summary(),
        foci = focus_list.join(", "),
    )
}

/// Schema for query generation output
pub fn query_generation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "focus": {
                            "type": "string",
                            "enum": ["general", "dependents", "conditions", "coverage", "price"]
                        },
                        "priority": { "type": "integer", "minimum": 1, "maximum": 5 }
                    },
                    "required": ["text", "focus", "priority"]
                }
            }
        },
        "required": ["queries"]
    })
}

/// Build the single-document grading prompt
pub fn grading_prompt(profile: &ClientProfile, content: &str) -> String {
    format!(
        "You judge whether an insurance plan document helps recommend a plan to a client.\n\
         Client profile: {profile}\n\n\
         Document:\n\"\"\"\n{content}\n\"\"\"\n\n\
         Label the document:\n\
         - relevant: directly answers what this client needs\n\
         - partially_relevant: useful context but incomplete for this client\n\
         - irrelevant: does not help for this client\n\
         Respond only with JSON: {{\"label\": \"relevant|partially_relevant|irrelevant\", \"reason\": \"one short sentence\"}}",
        profile = profile.summary(),
        content = content.trim(),
    )
}

/// Schema for grading output
pub fn grading_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "label": {
                "type": "string",
                "enum": ["relevant", "partially_relevant", "irrelevant"]
            },
            "reason": { "type": "string" }
        },
        "required": ["label", "reason"]
    })
}

/// Build the query rewrite prompt
pub fn rewrite_prompt(
    original: &str,
    problem: RewriteProblem,
    strategy: RewriteStrategy,
    attempt: u32,
    profile: &ClientProfile,
) -> String {
    format!(
        "A search over health insurance plan documents did not find enough useful results.\n\
         Original query: \"{original}\"\n\
         Problem: {problem}\n\
         Client profile: {profile}\n\
         This is rewrite attempt {attempt}.\n\n\
         {instruction}\n\
         Respond with the new query text only, on a single line, without quotes.",
        original = original,
        problem = problem.describe(),
        profile = profile.summary(),
        attempt = attempt,
        instruction = strategy.instruction(),
    )
}

/// Extract the outermost JSON object from model output that may carry
/// code fences or prose around it
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}
