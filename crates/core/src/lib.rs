//! Core types for the RagForge knowledge base
//!
//! This crate provides foundational types used across all other crates:
//! - Entities and relationships stored in the property graph
//! - Search results with score tracking
//! - Entity type schemas (the configurable entity catalog)
//! - LLM message and tool-call types
//! - Error types

pub mod entity;
pub mod error;
pub mod llm_types;
pub mod result;
pub mod schema;

pub use entity::{Direction, Entity, RelatedEdge, Relationship};
pub use error::{Error, Result};
pub use llm_types::{Message, Role, ToolCall, ToolDefinition, ToolResult};
pub use result::{sort_results, KeywordBoost, ScoreBreakdown, ScoreMerging, SearchResult};
pub use schema::{
    EntityCatalog, EntityContext, FieldType, RelationshipContext, SearchableField,
    VectorIndexContext,
};
