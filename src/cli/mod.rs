//! CLI module for covermatch
//!
//! Argument parsing plus the input helpers the binary needs.

pub mod args;

pub use args::{Args, Commands, ConfigAction, Verbosity};

use anyhow::{Context, Result};
use std::path::Path;

use crate::types::ClientProfile;

/// Read a client profile from a JSON file
pub fn load_profile(path: &Path) -> Result<ClientProfile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;

    let profile: ClientProfile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse profile {}", path.display()))?;

    Ok(profile)
}

/// Trim scope ids and drop blanks and repeats
pub fn normalize_scope(scope: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(scope.len());
    for id in scope.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_profile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(
            &path,
            r#"{"age": 41, "dependents": [{"age": 9, "relationship": "son"}]}"#,
        )
        .unwrap();

        let profile = load_profile(&path).unwrap();
        assert_eq!(profile.age, Some(41));
        assert!(profile.has_dependents());
        assert!(!profile.has_conditions());
    }

    #[test]
    fn test_load_profile_errors() {
        let dir = TempDir::new().unwrap();
        assert!(load_profile(&dir.path().join("missing.json")).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{age:").unwrap();
        assert!(load_profile(&path).is_err());
    }

    #[test]
    fn test_normalize_scope() {
        let scope = vec![
            " up-1".to_string(),
            "".to_string(),
            "up-2".to_string(),
            "up-1".to_string(),
        ];
        assert_eq!(normalize_scope(&scope), vec!["up-1".to_string(), "up-2".to_string()]);
    }
}
