//! Domain-level graph operations
//!
//! The retrieval pipeline and the conversation store talk to this trait
//! rather than to the driver, so tests run against in-memory fakes and the
//! pipeline stays independent of the store's query language.

use async_trait::async_trait;
use serde_json::Value;

use ragforge_core::{Direction, Entity, RelatedEdge};

use crate::GraphError;

/// Comparison operator for store-side field predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Contains,
    In,
    Gt,
    Lt,
}

impl FilterOp {
    /// Cypher operator fragment for this comparison.
    pub fn cypher(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Contains => "CONTAINS",
            FilterOp::In => "IN",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
        }
    }
}

/// A store-side predicate on an entity field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }
}

/// Restrict to entities related to a given entity through a relationship.
#[derive(Debug, Clone)]
pub struct RelatedByFilter {
    pub rel_type: String,
    pub direction: Direction,
    /// Uuid of the entity on the other end
    pub other_uuid: String,
}

/// Options for a vector index query.
#[derive(Debug, Clone, Default)]
pub struct VectorQueryOptions {
    /// Results below this cosine score are dropped
    pub min_score: f32,
    /// When set, only these uuids may appear in the result
    pub entity_uuid_filter: Option<Vec<String>>,
    /// Extra store-side predicates evaluated on the matched node
    pub field_filters: Vec<FieldFilter>,
}

/// Domain operations every backing store must provide.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Fetch entities by uuid, preserving the requested order where the
    /// store allows it.
    async fn fetch_by_uuids(
        &self,
        entity_type: &str,
        uuids: &[String],
    ) -> Result<Vec<Entity>, GraphError>;

    /// Fetch entities matching all the given field predicates.
    async fn fetch_by_fields(
        &self,
        entity_type: &str,
        filters: &[FieldFilter],
        limit: Option<usize>,
    ) -> Result<Vec<Entity>, GraphError>;

    /// Fetch every entity of a type, capped by `limit`.
    async fn fetch_all(
        &self,
        entity_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Entity>, GraphError>;

    /// Fetch entities related to `uuid` in `direction`, capped per call.
    /// `rel_type = None` traverses every relationship type.
    async fn fetch_related(
        &self,
        uuid: &str,
        rel_type: Option<&str>,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<RelatedEdge>, GraphError>;

    /// Query a named vector index. Results come back `(entity, score)`
    /// ordered score-descending, all `>= min_score`, at most `top_k`.
    async fn query_vector_index(
        &self,
        index_name: &str,
        top_k: usize,
        vector: &[f32],
        options: &VectorQueryOptions,
    ) -> Result<Vec<(Entity, f32)>, GraphError>;
}
