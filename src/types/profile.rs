//! Client profile snapshot
//!
//! The profile is supplied once per search and never mutated inside the
//! pipeline. Every field is optional so partially filled intake forms still
//! deserialize.

use serde::{Deserialize, Serialize};

/// Location of the requester
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl Location {
    /// "City, ST" style rendering, skipping absent parts
    pub fn display(&self) -> Option<String> {
        match (self.city.as_deref(), self.state.as_deref()) {
            (Some(city), Some(state)) => Some(format!("{}, {}", city, state)),
            (Some(city), None) => Some(city.to_string()),
            (None, Some(state)) => Some(state.to_string()),
            (None, None) => None,
        }
    }
}

/// A dependent covered alongside the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependent {
    pub age: u32,
    pub relationship: String,
}

/// Immutable snapshot of the attributes relevant to plan matching
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub location: Option<Location>,
    /// Monthly budget in the local currency
    #[serde(default)]
    pub monthly_budget: Option<f64>,
    #[serde(default)]
    pub dependents: Vec<Dependent>,
    #[serde(default)]
    pub pre_existing_conditions: Vec<String>,
    /// Free-text preferences
    #[serde(default)]
    pub preferences: Option<String>,
}

impl ClientProfile {
    pub fn has_dependents(&self) -> bool {
        !self.dependents.is_empty()
    }

    pub fn has_conditions(&self) -> bool {
        self.pre_existing_conditions
            .iter()
            .any(|c| !c.trim().is_empty())
    }

    pub fn has_preferences(&self) -> bool {
        self.preferences
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }

    /// Location rendered for prompts, if known
    pub fn location_display(&self) -> Option<String> {
        self.location.as_ref().and_then(Location::display)
    }

    /// One-line summary used in prompts and log lines
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(age) = self.age {
            parts.push(format!("age {}", age));
        }
        if let Some(location) = self.location_display() {
            parts.push(format!("lives in {}", location));
        }
        if let Some(budget) = self.monthly_budget {
            parts.push(format!("budget {:.0}/month", budget));
        }
        if self.has_dependents() {
            let deps: Vec<String> = self
                .dependents
                .iter()
                .map(|d| format!("{} ({})", d.relationship, d.age))
                .collect();
            parts.push(format!("dependents: {}", deps.join(", ")));
        }
        if self.has_conditions() {
            parts.push(format!(
                "conditions: {}",
                self.pre_existing_conditions.join(", ")
            ));
        }
        if let Some(prefs) = self.preferences.as_deref().filter(|p| !p.trim().is_empty()) {
            parts.push(format!("preferences: {}", prefs.trim()));
        }

        if parts.is_empty() {
            "no profile details provided".to_string()
        } else {
            parts.join("; ")
        }
    }
}
