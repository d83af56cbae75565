//! Parsed-source model
//!
//! What an adapter emits: typed entities identified by their unique field
//! value, and relationships between them. Identity and change detection
//! are both deterministic: uuid-v5 for ids, sha256 for content.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::IngestError;

/// Fixed namespace for entity uuids. Changing this would re-key every
/// knowledge base, so it never changes.
const ENTITY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x8a, 0x6f, 0x2c, 0x11, 0x4d, 0x3e, 0x45, 0x9b, 0x8f, 0x07, 0x5a, 0xd1, 0x90, 0x42, 0x6e,
    0x21,
]);

/// Deterministic entity uuid from the type and the unique-field value.
pub fn deterministic_uuid(entity_type: &str, unique_value: &str) -> String {
    let seed = format!("{}:{}", entity_type, unique_value);
    Uuid::new_v5(&ENTITY_NAMESPACE, seed.as_bytes()).to_string()
}

/// sha256 hex digest of entity content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Reference to an entity by type and unique value, resolved to a uuid at
/// sync time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub unique_value: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, unique_value: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            unique_value: unique_value.into(),
        }
    }

    pub fn uuid(&self) -> String {
        deterministic_uuid(&self.entity_type, &self.unique_value)
    }
}

/// One parsed entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedEntity {
    pub entity_type: String,
    /// Value of the type's unique field (e.g. a file path, a qualified name)
    pub unique_value: String,
    pub name: String,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
    /// Content used for change detection; the whole field map when absent
    #[serde(default)]
    pub content: Option<String>,
}

impl ParsedEntity {
    pub fn uuid(&self) -> String {
        deterministic_uuid(&self.entity_type, &self.unique_value)
    }

    /// Hash of the content, or of the canonicalised fields when no
    /// dedicated content was given.
    pub fn hash(&self) -> String {
        match &self.content {
            Some(content) => content_hash(content),
            None => {
                let mut keys: Vec<&String> = self.fields.keys().collect();
                keys.sort();
                let canonical: String = keys
                    .iter()
                    .map(|k| format!("{}={};", k, self.fields[*k]))
                    .collect();
                content_hash(&format!("{}|{}", self.name, canonical))
            }
        }
    }
}

/// One parsed relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRelationship {
    pub from: EntityRef,
    pub to: EntityRef,
    pub rel_type: String,
}

/// Everything one parse pass produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedBatch {
    pub entities: Vec<ParsedEntity>,
    pub relationships: Vec<ParsedRelationship>,
}

/// A code/document parser. Implementations live outside the core; the
/// core only consumes their output.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Parse the configured source tree into entities and relationships.
    async fn parse(&self) -> Result<ParsedBatch, IngestError>;

    /// Adapter name, for logs.
    fn name(&self) -> &str;
}
