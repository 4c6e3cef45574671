//! Entity extraction from general-tier results
//!
//! Data-driven: operators and plan codes are read from document metadata,
//! no model call is involved.

use serde::{Deserialize, Serialize};

use crate::providers::EntityFilter;
use crate::types::Document;

/// An entity identifier found in general-tier metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Entity {
    Operator(String),
    PlanCode(String),
}

impl Entity {
    pub fn value(&self) -> &str {
        match self {
            Entity::Operator(v) | Entity::PlanCode(v) => v,
        }
    }
}

/// Collect distinct operators and plan codes in first-seen order
pub fn extract_entities(docs: &[Document]) -> Vec<Entity> {
    let mut entities: Vec<Entity> = Vec::new();

    for doc in docs {
        let found = [
            doc.operator().map(|op| Entity::Operator(op.to_string())),
            doc.plan_code().map(|code| Entity::PlanCode(code.to_string())),
        ];
        for entity in found.into_iter().flatten() {
            if !entities.iter().any(|e| same_entity(e, &entity)) {
                entities.push(entity);
            }
        }
    }

    entities
}

fn same_entity(a: &Entity, b: &Entity) -> bool {
    match (a, b) {
        (Entity::Operator(x), Entity::Operator(y)) | (Entity::PlanCode(x), Entity::PlanCode(y)) => {
            x.eq_ignore_ascii_case(y)
        }
        _ => false,
    }
}

/// Build the specific-tier filter; `None` when nothing was extracted
pub fn entity_filter(entities: &[Entity]) -> Option<EntityFilter> {
    let mut filter = EntityFilter::default();
    for entity in entities {
        match entity {
            Entity::Operator(op) => filter.operators.push(op.clone()),
            Entity::PlanCode(code) => filter.plan_codes.push(code.clone()),
        }
    }

    if filter.is_empty() {
        None
    } else {
        Some(filter)
    }
}

/// Union `incoming` into `existing`, keeping order and dropping duplicates
pub fn merge_entities(existing: &mut Vec<Entity>, incoming: &[Entity]) {
    for entity in incoming {
        if !existing.iter().any(|e| same_entity(e, entity)) {
            existing.push(entity.clone());
        }
    }
}
