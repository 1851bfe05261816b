//! Entity - a normalized surface string referring to a real-world thing

use serde::{Deserialize, Serialize};

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Coarse entity type from the extraction layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A person
    Person,
    /// An organization
    Org,
    /// A place
    Place,
    /// An abstract concept or topic
    Concept,
    /// Anything else
    #[default]
    Other,
}

impl EntityKind {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Org => "org",
            EntityKind::Place => "place",
            EntityKind::Concept => "concept",
            EntityKind::Other => "other",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "person" => EntityKind::Person,
            "org" | "organization" => EntityKind::Org,
            "place" | "location" => EntityKind::Place,
            "concept" => EntityKind::Concept,
            _ => EntityKind::Other,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ENTITY
// ============================================================================

/// A normalized entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Normalized id (lowercased, punctuation and whitespace folded)
    pub id: String,
    /// Original display text
    pub display: String,
    /// Coarse type
    pub kind: EntityKind,
    /// How many mentions have been indexed for this entity
    pub frequency: u32,
}

impl Entity {
    /// Create an entity from a surface form
    pub fn from_surface(surface: &str, kind: EntityKind) -> Self {
        Self {
            id: normalize_entity_id(surface),
            display: surface.trim().to_string(),
            kind,
            frequency: 0,
        }
    }
}

/// Normalize a surface string to its entity id: lowercase, with runs of
/// punctuation and whitespace folded into single underscores.
pub fn normalize_entity_id(surface: &str) -> String {
    let mut id = String::with_capacity(surface.len());
    let mut pending_separator = false;
    for ch in surface.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !id.is_empty() {
                id.push('_');
            }
            pending_separator = false;
            id.push(ch);
        } else {
            pending_separator = true;
        }
    }
    id
}

// ============================================================================
// TESTS
// ============================================================================
