//! The declarative config document
//!
//! Parsed from YAML. Unknown keys are ignored so configs written for newer
//! versions keep loading; missing sections disable the corresponding
//! subsystem (no `embeddings` section means no vector indexes are created,
//! no `source` section means ingestion is not wired).

use serde::{Deserialize, Serialize};
use std::path::Path;

use ragforge_core::{
    Direction, EntityCatalog, EntityContext, FieldType, RelationshipContext, SearchableField,
    VectorIndexContext,
};

use crate::ConfigError;

/// Top-level config document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagForgeConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub embeddings: Option<EmbeddingsConfig>,
    #[serde(default)]
    pub reranking: Option<RerankingConfig>,
    #[serde(default)]
    pub source: Option<SourceConfig>,
    #[serde(default)]
    pub generation: Option<GenerationConfig>,
}

impl RagForgeConfig {
    /// Parse from a YAML string.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for entity in &self.entities {
            if entity.name.is_empty() {
                return Err(ConfigError::Invalid("entity with empty name".to_string()));
            }
            if entity.unique_field.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "entity {} has no uniqueField",
                    entity.name
                )));
            }
            for index in &entity.vector_indexes {
                if index.dimension == Some(0) {
                    return Err(ConfigError::Invalid(format!(
                        "vector index {} has zero dimension",
                        index.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the runtime entity catalog, resolving per-index dimension
    /// defaults from the embeddings section.
    pub fn catalog(&self) -> EntityCatalog {
        let default_dimension = self
            .embeddings
            .as_ref()
            .map(|e| e.defaults.dimension)
            .unwrap_or(768);

        let contexts = self
            .entities
            .iter()
            .map(|e| e.to_context(default_dimension))
            .collect();
        EntityCatalog::new(contexts)
    }
}

/// One entity type declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityConfig {
    pub name: String,
    pub unique_field: String,
    #[serde(default)]
    pub display_name_field: Option<String>,
    #[serde(default)]
    pub query_field: Option<String>,
    #[serde(default)]
    pub searchable_fields: Vec<SearchableFieldConfig>,
    #[serde(default)]
    pub vector_indexes: Vec<VectorIndexConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    /// Fields derived at ingestion time; opaque to the pipeline
    #[serde(default)]
    pub computed_fields: Vec<String>,
    /// Whether entity content nests (sections, scopes)
    #[serde(default)]
    pub hierarchical_content: bool,
    /// Whether content hashes are stored for incremental ingestion
    #[serde(default)]
    pub change_tracking: bool,
    #[serde(default)]
    pub example_display_fields: Vec<String>,
}

impl EntityConfig {
    fn to_context(&self, default_dimension: usize) -> EntityContext {
        EntityContext {
            name: self.name.clone(),
            unique_field: self.unique_field.clone(),
            display_name_field: self
                .display_name_field
                .clone()
                .unwrap_or_else(|| "name".to_string()),
            query_field: self
                .query_field
                .clone()
                .unwrap_or_else(|| self.unique_field.clone()),
            searchable_fields: self
                .searchable_fields
                .iter()
                .map(|f| SearchableField {
                    name: f.name.clone(),
                    field_type: f.field_type,
                    indexed: f.indexed,
                })
                .collect(),
            vector_indexes: self
                .vector_indexes
                .iter()
                .map(|v| VectorIndexContext {
                    name: v.name.clone(),
                    source_field: v.source_field.clone(),
                    dimension: v.dimension.unwrap_or(default_dimension),
                    similarity: v.similarity.clone().unwrap_or_else(|| "cosine".to_string()),
                    provider: v.provider.clone(),
                    model: v.model.clone(),
                })
                .collect(),
            relationships: self
                .relationships
                .iter()
                .map(|r| RelationshipContext {
                    rel_type: r.rel_type.clone(),
                    direction: r.direction,
                    target: r.target.clone(),
                    enrich: r.enrich,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchableFieldConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub indexed: bool,
}

/// One vector index declaration. Dimension is optional; when omitted the
/// embeddings defaults apply. A config carrying a single legacy
/// `vectorIndex` entry parses as a one-element list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexConfig {
    pub name: String,
    pub source_field: String,
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub similarity: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipConfig {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub direction: Direction,
    pub target: String,
    #[serde(default)]
    pub enrich: bool,
}

/// Embeddings section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: String,
    #[serde(default)]
    pub defaults: EmbeddingDefaults,
    /// Per-entity overrides; opaque maps keyed by entity name
    #[serde(default)]
    pub entities: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_similarity")]
    pub similarity: String,
}

fn default_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_similarity() -> String {
    "cosine".to_string()
}

impl Default for EmbeddingDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            dimension: default_dimension(),
            similarity: default_similarity(),
        }
    }
}

/// Reranking section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RerankingConfig {
    #[serde(default)]
    pub strategies: Vec<RerankStrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankStrategyConfig {
    pub name: String,
    /// "builtin" or "custom"
    #[serde(rename = "type")]
    pub strategy_type: String,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub scorer: Option<String>,
}

/// Source ingestion section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// "code" or "documents"
    #[serde(rename = "type")]
    pub source_type: String,
    pub adapter: String,
    pub root: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Generation section (scaffolding output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub output_dir: String,
    #[serde(default)]
    pub include_tests: bool,
    #[serde(default)]
    pub include_docs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
name: codebase
version: "1.0"
entities:
  - name: Scope
    uniqueField: uuid
    displayNameField: name
    queryField: content
    searchableFields:
      - name: name
        type: string
        indexed: true
      - name: start_line
        type: number
    vectorIndexes:
      - name: scopeEmbeddings
        sourceField: content
        dimension: 768
      - name: scopeNameEmbeddings
        sourceField: name
    relationships:
      - type: CONTAINS
        direction: incoming
        target: File
embeddings:
  provider: ollama
  defaults:
    model: nomic-embed-text
    dimension: 768
    similarity: cosine
reranking:
  strategies:
    - name: default
      type: builtin
      algorithm: weighted
unknown_section:
  anything: goes
"#;

    #[test]
    fn test_parse_sample() {
        let config = RagForgeConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.name, "codebase");
        assert_eq!(config.entities.len(), 1);
        assert_eq!(config.entities[0].vector_indexes.len(), 2);
        assert!(config.reranking.is_some());
        assert!(config.source.is_none());
    }

    #[test]
    fn test_catalog_applies_default_dimension() {
        let config = RagForgeConfig::from_yaml(SAMPLE).unwrap();
        let catalog = config.catalog();
        let ctx = catalog.get("Scope").unwrap();

        // Explicit dimension preserved, omitted dimension falls back to the
        // embeddings default.
        assert_eq!(ctx.vector_index("scopeEmbeddings").unwrap().dimension, 768);
        assert_eq!(
            ctx.vector_index("scopeNameEmbeddings").unwrap().dimension,
            768
        );
        assert_eq!(ctx.display_name_field, "name");
    }

    #[test]
    fn test_missing_sections_disable_subsystems() {
        let config = RagForgeConfig::from_yaml("name: empty").unwrap();
        assert!(config.embeddings.is_none());
        assert!(config.entities.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let text = r#"
entities:
  - name: Doc
    uniqueField: uuid
    vectorIndexes:
      - name: docEmbeddings
        sourceField: content
        dimension: 0
"#;
        let config = RagForgeConfig::from_yaml(text).unwrap();
        assert!(config.validate().is_err());
    }
}
