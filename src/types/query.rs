//! Search queries produced by the query generator and the rewrite controller

use serde::{Deserialize, Serialize};

/// Lowest query priority
pub const MIN_PRIORITY: u8 = 1;

/// Highest query priority
pub const MAX_PRIORITY: u8 = 5;

/// Facet of the profile a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFocus {
    General,
    Dependents,
    Conditions,
    Coverage,
    Price,
}

impl QueryFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryFocus::General => "general",
            QueryFocus::Dependents => "dependents",
            QueryFocus::Conditions => "conditions",
            QueryFocus::Coverage => "coverage",
            QueryFocus::Price => "price",
        }
    }

    /// Lenient parse used on LLM output
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Some(QueryFocus::General),
            "dependents" | "dependent" => Some(QueryFocus::Dependents),
            "conditions" | "condition" => Some(QueryFocus::Conditions),
            "coverage" => Some(QueryFocus::Coverage),
            "price" | "pricing" => Some(QueryFocus::Price),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryFocus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single search query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub focus: QueryFocus,
    /// 1 (lowest) to 5 (highest)
    pub priority: u8,
}

impl Query {
    /// Create a query, clamping priority into the valid range
    pub fn new(text: impl Into<String>, focus: QueryFocus, priority: u8) -> Self {
        Self {
            text: text.into(),
            focus,
            priority: priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
        }
    }
}

/// Order queries by priority descending; equal priorities keep focus order
pub fn sort_by_priority(queries: &mut [Query]) {
    queries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.focus.cmp(&b.focus)));
}
