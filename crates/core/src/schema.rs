//! Entity type catalog
//!
//! The entity catalog describes every entity type the graph knows about:
//! which field is unique, which is the display name, which fields are
//! searchable and which carry vector indexes. The catalog is loaded from
//! the declarative config (see `ragforge-config`); unknown keys there are
//! ignored so old configs keep parsing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field type for searchable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Boolean,
    Date,
}

/// A field eligible for filtering and full-text comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchableField {
    pub name: String,
    #[serde(default)]
    pub field_type: FieldType,
    /// Whether a store-side property index exists for this field
    #[serde(default)]
    pub indexed: bool,
}

/// A named vector index over one (entity type, source field) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexContext {
    /// Index name as known to the store (e.g. "scopeEmbeddings")
    pub name: String,
    /// Entity field whose text is embedded
    pub source_field: String,
    /// Fixed embedding dimension; all inserted vectors must match
    pub dimension: usize,
    /// Similarity function; cosine is the only one the pipeline assumes
    #[serde(default = "default_similarity")]
    pub similarity: String,
    /// Embedding provider name
    #[serde(default)]
    pub provider: Option<String>,
    /// Embedding model id
    #[serde(default)]
    pub model: Option<String>,
}

fn default_similarity() -> String {
    "cosine".to_string()
}

/// A relationship an entity type participates in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipContext {
    /// Relationship type tag
    pub rel_type: String,
    /// Direction relative to this entity type
    pub direction: crate::entity::Direction,
    /// Target entity type
    pub target: String,
    /// Whether related entities are fetched alongside this one
    #[serde(default)]
    pub enrich: bool,
}

/// Schema for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityContext {
    /// Entity type name, used as the store label
    pub name: String,
    /// Field whose value is unique within the type
    pub unique_field: String,
    /// Field shown as the display name
    pub display_name_field: String,
    /// Default field queried when none is given
    pub query_field: String,
    #[serde(default)]
    pub searchable_fields: Vec<SearchableField>,
    #[serde(default)]
    pub vector_indexes: Vec<VectorIndexContext>,
    #[serde(default)]
    pub relationships: Vec<RelationshipContext>,
}

impl EntityContext {
    /// Look up a vector index by name.
    pub fn vector_index(&self, name: &str) -> Option<&VectorIndexContext> {
        self.vector_indexes.iter().find(|v| v.name == name)
    }

    /// Fields eligible for full-text comparison, in declaration order.
    pub fn comparable_fields(&self) -> impl Iterator<Item = &SearchableField> {
        self.searchable_fields
            .iter()
            .filter(|f| f.field_type == FieldType::String)
    }
}

/// The full catalog, keyed by entity type name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityCatalog {
    entities: HashMap<String, EntityContext>,
}

impl EntityCatalog {
    pub fn new(entities: Vec<EntityContext>) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityContext> {
        self.entities.get(entity_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(|s| s.as_str())
    }

    pub fn contexts(&self) -> impl Iterator<Item = &EntityContext> {
        self.entities.values()
    }

    /// Find the vector index with the given name across all entity types.
    pub fn find_vector_index(&self, name: &str) -> Option<(&EntityContext, &VectorIndexContext)> {
        self.entities
            .values()
            .find_map(|e| e.vector_index(name).map(|v| (e, v)))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Direction;

    fn scope_context() -> EntityContext {
        EntityContext {
            name: "Scope".to_string(),
            unique_field: "uuid".to_string(),
            display_name_field: "name".to_string(),
            query_field: "content".to_string(),
            searchable_fields: vec![
                SearchableField {
                    name: "name".to_string(),
                    field_type: FieldType::String,
                    indexed: true,
                },
                SearchableField {
                    name: "start_line".to_string(),
                    field_type: FieldType::Number,
                    indexed: false,
                },
            ],
            vector_indexes: vec![VectorIndexContext {
                name: "scopeEmbeddings".to_string(),
                source_field: "content".to_string(),
                dimension: 768,
                similarity: "cosine".to_string(),
                provider: None,
                model: None,
            }],
            relationships: vec![RelationshipContext {
                rel_type: "CONTAINS".to_string(),
                direction: Direction::Incoming,
                target: "File".to_string(),
                enrich: false,
            }],
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = EntityCatalog::new(vec![scope_context()]);

        assert!(catalog.get("Scope").is_some());
        assert!(catalog.get("Unknown").is_none());

        let (ctx, index) = catalog.find_vector_index("scopeEmbeddings").unwrap();
        assert_eq!(ctx.name, "Scope");
        assert_eq!(index.dimension, 768);
    }

    #[test]
    fn test_comparable_fields_skip_numbers() {
        let ctx = scope_context();
        let names: Vec<&str> = ctx.comparable_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name"]);
    }
}
