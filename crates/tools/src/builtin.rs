//! Built-in tools
//!
//! The standard toolkit handed to the research agent: semantic entity
//! search, relationship listing, bounded file access under the project
//! root, and a catalog overview.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragforge_core::{Direction, EntityCatalog};
use ragforge_graph::GraphClient;
use ragforge_llm::EmbeddingProvider;
use ragforge_retrieval::{
    apply_keyword_boost, KeywordBoostConfig, PipelineExecutor, QueryBuilder,
};

use crate::registry::Tool;
use crate::ToolError;

/// Semantic search over a vector index, with optional keyword boosting.
pub struct SearchEntitiesTool {
    executor: Arc<PipelineExecutor>,
    /// Default index when the model does not pick one
    default_index: String,
    entity_type: String,
}

impl SearchEntitiesTool {
    pub fn new(
        graph: Arc<dyn GraphClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        entity_type: impl Into<String>,
        default_index: impl Into<String>,
    ) -> Self {
        Self {
            executor: Arc::new(PipelineExecutor::new(graph, embedder)),
            default_index: default_index.into(),
            entity_type: entity_type.into(),
        }
    }
}

#[async_trait]
impl Tool for SearchEntitiesTool {
    fn name(&self) -> &str {
        "search_entities"
    }

    fn description(&self) -> &str {
        "Semantic search over indexed code entities. Returns scored matches \
         with file locations."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "natural-language search query"},
                "index": {"type": "string", "description": "vector index to search"},
                "top_k": {"type": "integer", "description": "maximum results", "default": 10},
                "min_score": {"type": "number", "description": "minimum cosine score", "default": 0.5},
                "keywords": {"type": "array", "description": "exact terms to boost"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args["query"].as_str().unwrap_or_default();
        let index = args["index"].as_str().unwrap_or(&self.default_index);
        let top_k = args["top_k"].as_u64().unwrap_or(10) as usize;
        let min_score = args["min_score"].as_f64().unwrap_or(0.5) as f32;

        let pipeline = QueryBuilder::new(&self.entity_type)
            .semantic(index, query, top_k, min_score)
            .build();
        let output = self
            .executor
            .run(&pipeline)
            .await
            .map_err(|e| ToolError::failed(self.name(), e))?;

        let mut results = output.results;
        let keywords: Vec<String> = args["keywords"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if !keywords.is_empty() {
            apply_keyword_boost(&mut results, &KeywordBoostConfig::new(keywords));
        }

        Ok(json!({
            "results": results
                .iter()
                .map(|r| {
                    json!({
                        "uuid": r.entity.uuid,
                        "type": r.entity.entity_type,
                        "name": r.entity.name,
                        "file": r.entity.field_str("file_path"),
                        "score": r.score,
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }
}

/// List entities related to one entity.
pub struct ListRelatedTool {
    graph: Arc<dyn GraphClient>,
}

impl ListRelatedTool {
    pub fn new(graph: Arc<dyn GraphClient>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl Tool for ListRelatedTool {
    fn name(&self) -> &str {
        "list_related"
    }

    fn description(&self) -> &str {
        "List entities connected to a given entity through graph relationships."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "uuid": {"type": "string", "description": "anchor entity uuid"},
                "rel_type": {"type": "string", "description": "relationship type; all when omitted"},
                "direction": {"type": "string", "description": "traversal direction", "enum": ["outgoing", "incoming", "both"], "default": "both"},
                "limit": {"type": "integer", "description": "maximum edges", "default": 15}
            },
            "required": ["uuid"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let uuid = args["uuid"].as_str().unwrap_or_default();
        let direction = match args["direction"].as_str() {
            Some("outgoing") => Direction::Outgoing,
            Some("incoming") => Direction::Incoming,
            _ => Direction::Both,
        };
        let limit = args["limit"].as_u64().unwrap_or(15) as usize;

        let edges = self
            .graph
            .fetch_related(uuid, args["rel_type"].as_str(), direction, limit)
            .await
            .map_err(|e| ToolError::failed(self.name(), e))?;

        Ok(json!({
            "related": edges
                .iter()
                .map(|e| {
                    json!({
                        "uuid": e.entity.uuid,
                        "name": e.entity.name,
                        "type": e.entity.entity_type,
                        "rel_type": e.relationship.rel_type,
                        "direction": e.direction.as_str(),
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }
}

/// Resolve a relative path under the project root, rejecting escapes.
fn resolve_under_root(root: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let joined = root.join(relative);
    let canonical_root = root
        .canonicalize()
        .map_err(|e| ToolError::failed("file_access", e))?;
    let canonical = joined
        .canonicalize()
        .map_err(|e| ToolError::failed("file_access", format!("{}: {}", relative, e)))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(ToolError::ArgsInvalid(format!(
            "path escapes the project root: {}",
            relative
        )));
    }
    Ok(canonical)
}

/// Read a file (or a line slice of it) under the project root.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file under the project root, optionally sliced by line range."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "path relative to the project root"},
                "start_line": {"type": "integer", "description": "1-based first line"},
                "end_line": {"type": "integer", "description": "1-based last line, inclusive"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let relative = args["path"].as_str().unwrap_or_default();
        let path = resolve_under_root(&self.root, relative)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed(self.name(), format!("{}: {}", relative, e)))?;

        let content = match (args["start_line"].as_u64(), args["end_line"].as_u64()) {
            (Some(start), end) => {
                let start = (start.max(1) - 1) as usize;
                let end = end.map(|e| e as usize).unwrap_or(usize::MAX);
                text.lines()
                    .enumerate()
                    .filter(|(i, _)| *i >= start && *i < end)
                    .map(|(_, line)| line)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            _ => text,
        };

        Ok(json!({"path": relative, "content": content}))
    }
}

/// List a directory under the project root.
pub struct ListDirTool {
    root: PathBuf,
}

impl ListDirTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List entries of a directory under the project root."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "directory relative to the project root", "default": "."}
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let relative = args["path"].as_str().unwrap_or(".");
        let path = resolve_under_root(&self.root, relative)?;

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::failed(self.name(), e))?;
        while let Ok(Some(entry)) = reader.next_entry().await {
            let file_type = entry.file_type().await.ok();
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": file_type.map(|t| t.is_dir()).unwrap_or(false),
            }));
        }
        entries.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or("")
                .cmp(b["name"].as_str().unwrap_or(""))
        });

        Ok(json!({"path": relative, "entries": entries}))
    }
}

/// Describe the entity catalog: types, fields, relationships.
pub struct ProjectOverviewTool {
    catalog: Arc<EntityCatalog>,
}

impl ProjectOverviewTool {
    pub fn new(catalog: Arc<EntityCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ProjectOverviewTool {
    fn name(&self) -> &str {
        "project_overview"
    }

    fn description(&self) -> &str {
        "Describe the knowledge base: entity types, searchable fields, \
         vector indexes and relationships."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        let mut types: Vec<Value> = self
            .catalog
            .contexts()
            .map(|ctx| {
                json!({
                    "name": ctx.name,
                    "unique_field": ctx.unique_field,
                    "searchable_fields": ctx
                        .searchable_fields
                        .iter()
                        .map(|f| f.name.clone())
                        .collect::<Vec<_>>(),
                    "vector_indexes": ctx
                        .vector_indexes
                        .iter()
                        .map(|v| v.name.clone())
                        .collect::<Vec<_>>(),
                    "relationships": ctx
                        .relationships
                        .iter()
                        .map(|r| format!("{} {} {}", r.rel_type, r.direction.as_str(), r.target))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        types.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or("")
                .cmp(b["name"].as_str().unwrap_or(""))
        });
        Ok(json!({"entity_types": types}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_file_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.txt"), "hello\nworld\n").unwrap();

        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let result = tool.execute(json!({"path": "ok.txt"})).await.unwrap();
        assert_eq!(result["content"], "hello\nworld\n");

        let err = tool
            .execute(json!({"path": "../../../etc/passwd"}))
            .await
            .unwrap_err();
        // Either the canonicalisation fails or the escape check trips;
        // both must refuse.
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_read_file_line_slice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();

        let tool = ReadFileTool::new(dir.path().to_path_buf());
        let result = tool
            .execute(json!({"path": "f.txt", "start_line": 2, "end_line": 3}))
            .await
            .unwrap();
        assert_eq!(result["content"], "b\nc");
    }

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = ListDirTool::new(dir.path().to_path_buf());
        let result = tool.execute(json!({})).await.unwrap();
        let names: Vec<&str> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }
}
