//! Entities and relationships
//!
//! An entity is a typed node in the property graph. The set of entity types
//! is configurable (see [`crate::schema::EntityContext`]); the core only
//! assumes that every entity carries a uuid, a type tag, a display name and
//! a bag of typed fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A typed node in the property graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Unique identifier (deterministic for ingested entities)
    pub uuid: String,
    /// Entity type name from the catalog (e.g. "Scope", "File")
    pub entity_type: String,
    /// Display name
    pub name: String,
    /// All other fields as returned by the store
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

impl Entity {
    pub fn new(
        uuid: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            entity_type: entity_type.into(),
            name: name.into(),
            fields: HashMap::new(),
        }
    }

    /// Attach a field value
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Get a field as a string slice, if present and a string
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    /// Get a field as an integer, if present and numeric
    pub fn field_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(|v| v.as_i64())
    }
}

/// Direction of a relationship traversal relative to the current entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
            Direction::Both => "both",
        }
    }
}

/// A typed directed edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Relationship {
    /// Source entity uuid
    pub from: String,
    /// Target entity uuid
    pub to: String,
    /// Relationship type tag (e.g. "CONTAINS", "CALLS")
    pub rel_type: String,
}

impl Relationship {
    pub fn new(from: impl Into<String>, to: impl Into<String>, rel_type: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rel_type: rel_type.into(),
        }
    }

    /// Dedup key: edges are identical when source, target and type match.
    pub fn key(&self) -> (String, String, String) {
        (self.from.clone(), self.to.clone(), self.rel_type.clone())
    }
}

/// An entity reached through a relationship, as produced by graph
/// exploration. Discovered nodes carry no score and are flagged so callers
/// can tell seeds from neighbours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEdge {
    pub relationship: Relationship,
    pub entity: Entity,
    pub direction: Direction,
}
