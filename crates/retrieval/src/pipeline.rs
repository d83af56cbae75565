//! The query pipeline
//!
//! A pipeline is a plain list of operation records executed in order over
//! a working result set. The chainable [`QueryBuilder`] is a façade that
//! appends records; all semantics are defined on the list itself.
//!
//! Before execution the list is normalised: a filter directly after a
//! fetch or semantic operation is merged into that operation's store
//! query (one round trip), and consecutive filters collapse into one.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use ragforge_core::{sort_results, Direction, Entity, SearchResult};
use ragforge_graph::{
    FieldFilter, FilterOp, GraphClient, RelatedByFilter, VectorQueryOptions,
};
use ragforge_llm::EmbeddingProvider;

use crate::rerank::{LlmReranker, RerankConfig};
use crate::{is_fatal_cause, OperationFailure, RetrievalError};

/// Edge cap per node during an expand operation.
const EXPAND_FETCH_LIMIT: usize = 100;

/// Operation kind tag, used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Fetch,
    Semantic,
    Expand,
    Filter,
    ClientFilter,
    LlmRerank,
}

/// Where a fetch draws its initial result set from.
#[derive(Debug, Clone)]
pub enum FetchSource {
    ByUuids(Vec<String>),
    ByFields(Vec<FieldFilter>),
    /// Entities related to an anchor entity
    ByRelated(RelatedByFilter),
    All,
}

/// Initial result set. `filters` holds predicates merged from adjacent
/// filter operations.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub source: FetchSource,
    pub filters: Vec<FieldFilter>,
}

/// Vector similarity step.
#[derive(Debug, Clone)]
pub struct SemanticSpec {
    pub index_name: String,
    pub text: String,
    pub top_k: usize,
    pub min_score: f32,
    /// Intersect with the current working set instead of replacing it
    pub restrict_to_current: bool,
    /// Predicates merged from an adjacent filter operation
    pub merged_filters: Vec<FieldFilter>,
}

/// Relationship expansion step.
#[derive(Debug, Clone)]
pub struct ExpandSpec {
    /// Traverse one relationship type, or all when `None`
    pub rel_type: Option<String>,
    pub direction: Direction,
    /// Clamped to [1, 3] at execution
    pub depth: usize,
    /// Tag written onto discovered entities (`_collected_as` field)
    pub collect_as: Option<String>,
}

/// Store-side filter step.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    pub field_filters: Vec<FieldFilter>,
    pub related_by: Option<RelatedByFilter>,
}

/// In-memory predicate step.
#[derive(Clone)]
pub struct ClientPredicate(pub Arc<dyn Fn(&SearchResult) -> bool + Send + Sync>);

impl fmt::Debug for ClientPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientPredicate")
    }
}

/// One pipeline operation.
#[derive(Debug, Clone)]
pub enum Operation {
    Fetch(FetchSpec),
    Semantic(SemanticSpec),
    Expand(ExpandSpec),
    Filter(FilterSpec),
    ClientFilter(ClientPredicate),
    LlmRerank(RerankConfig),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Fetch(_) => OperationKind::Fetch,
            Operation::Semantic(_) => OperationKind::Semantic,
            Operation::Expand(_) => OperationKind::Expand,
            Operation::Filter(_) => OperationKind::Filter,
            Operation::ClientFilter(_) => OperationKind::ClientFilter,
            Operation::LlmRerank(_) => OperationKind::LlmRerank,
        }
    }
}

/// A pipeline: entity type, operation list, final window.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub entity_type: String,
    pub operations: Vec<Operation>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// The normalised plan plus a note per merge that happened.
#[derive(Debug, Clone)]
pub struct NormalizedPlan {
    pub operations: Vec<Operation>,
    pub merge_notes: Vec<String>,
}

impl Pipeline {
    /// Merge adjacent compatible operations. A field-only filter directly
    /// after a fetch or semantic step folds into that step's store query;
    /// consecutive filters collapse.
    pub fn normalize(&self) -> NormalizedPlan {
        let mut operations: Vec<Operation> = Vec::with_capacity(self.operations.len());
        let mut merge_notes = Vec::new();

        for (index, op) in self.operations.iter().enumerate() {
            match op {
                Operation::Filter(spec) if spec.related_by.is_none() => {
                    match operations.last_mut() {
                        Some(Operation::Fetch(fetch)) => {
                            fetch.filters.extend(spec.field_filters.iter().cloned());
                            merge_notes
                                .push(format!("filter@{} merged into preceding fetch", index));
                            continue;
                        }
                        Some(Operation::Semantic(semantic)) => {
                            semantic
                                .merged_filters
                                .extend(spec.field_filters.iter().cloned());
                            merge_notes
                                .push(format!("filter@{} merged into preceding semantic", index));
                            continue;
                        }
                        Some(Operation::Filter(previous)) => {
                            previous
                                .field_filters
                                .extend(spec.field_filters.iter().cloned());
                            merge_notes
                                .push(format!("filter@{} merged into preceding filter", index));
                            continue;
                        }
                        _ => {}
                    }
                    operations.push(op.clone());
                }
                other => operations.push(other.clone()),
            }
        }

        NormalizedPlan {
            operations,
            merge_notes,
        }
    }
}

/// Pipeline output: the final sorted results plus any non-fatal failures
/// and the merge notes from normalisation.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub results: Vec<SearchResult>,
    pub failures: Vec<OperationFailure>,
    pub merge_notes: Vec<String>,
}

/// Executes pipelines against a graph store and embedding provider.
pub struct PipelineExecutor {
    graph: Arc<dyn GraphClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<LlmReranker>>,
}

impl PipelineExecutor {
    pub fn new(graph: Arc<dyn GraphClient>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            graph,
            embedder,
            reranker: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<LlmReranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Run a pipeline. Fatal causes abort with
    /// [`RetrievalError::PipelineOperationFailed`]; everything else is
    /// recorded and the working set is preserved.
    pub async fn run(&self, pipeline: &Pipeline) -> Result<PipelineOutput, RetrievalError> {
        let plan = pipeline.normalize();
        let mut working: Vec<SearchResult> = Vec::new();
        let mut failures: Vec<OperationFailure> = Vec::new();

        for (index, op) in plan.operations.iter().enumerate() {
            match self.apply(op, &pipeline.entity_type, &working).await {
                Ok(next) => working = next,
                Err(err) if is_fatal_cause(&err) => {
                    return Err(RetrievalError::PipelineOperationFailed {
                        index,
                        kind: op.kind(),
                        cause: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        index,
                        kind = ?op.kind(),
                        error = %err,
                        "Pipeline operation failed; working set preserved"
                    );
                    failures.push(OperationFailure {
                        index,
                        kind: op.kind(),
                        cause: err.to_string(),
                    });
                }
            }
        }

        sort_results(&mut working);
        if let Some(offset) = pipeline.offset {
            working = working.into_iter().skip(offset).collect();
        }
        if let Some(limit) = pipeline.limit {
            working.truncate(limit);
        }

        Ok(PipelineOutput {
            results: working,
            failures,
            merge_notes: plan.merge_notes,
        })
    }

    async fn apply(
        &self,
        op: &Operation,
        entity_type: &str,
        working: &[SearchResult],
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        match op {
            Operation::Fetch(spec) => self.apply_fetch(spec, entity_type).await,
            Operation::Semantic(spec) => self.apply_semantic(spec, working).await,
            Operation::Expand(spec) => self.apply_expand(spec, working).await,
            Operation::Filter(spec) => self.apply_filter(spec, entity_type, working).await,
            Operation::ClientFilter(predicate) => Ok(working
                .iter()
                .filter(|r| (predicate.0)(r))
                .cloned()
                .collect()),
            Operation::LlmRerank(config) => {
                let reranker = self.reranker.as_ref().ok_or_else(|| {
                    RetrievalError::Llm(ragforge_llm::LlmError::Configuration(
                        "no reranker configured".to_string(),
                    ))
                })?;
                reranker.rerank(working.to_vec(), config).await
            }
        }
    }

    async fn apply_fetch(
        &self,
        spec: &FetchSpec,
        entity_type: &str,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let entities: Vec<Entity> = match &spec.source {
            FetchSource::ByUuids(uuids) if spec.filters.is_empty() => {
                self.graph.fetch_by_uuids(entity_type, uuids).await?
            }
            FetchSource::ByUuids(uuids) => {
                // Merged filters ride along in the same store query.
                let mut filters = spec.filters.clone();
                filters.push(FieldFilter {
                    field: "uuid".to_string(),
                    op: FilterOp::In,
                    value: Value::Array(
                        uuids.iter().map(|u| Value::String(u.clone())).collect(),
                    ),
                });
                self.graph
                    .fetch_by_fields(entity_type, &filters, None)
                    .await?
            }
            FetchSource::ByFields(field_filters) => {
                let mut filters = field_filters.clone();
                filters.extend(spec.filters.iter().cloned());
                self.graph
                    .fetch_by_fields(entity_type, &filters, None)
                    .await?
            }
            FetchSource::ByRelated(related) => {
                let edges = self
                    .graph
                    .fetch_related(
                        &related.other_uuid,
                        Some(&related.rel_type),
                        related.direction,
                        EXPAND_FETCH_LIMIT,
                    )
                    .await?;
                let entities: Vec<Entity> = edges.into_iter().map(|e| e.entity).collect();
                if spec.filters.is_empty() {
                    entities
                } else {
                    // Fields beyond what the traversal returned: follow up
                    // with a second query over the fetched uuids.
                    self.filter_uuids_store_side(entity_type, &entities, &spec.filters)
                        .await?
                }
            }
            FetchSource::All => {
                self.graph
                    .fetch_by_fields(entity_type, &spec.filters, None)
                    .await?
            }
        };

        Ok(entities
            .into_iter()
            .map(|e| SearchResult::scored(e, 1.0))
            .collect())
    }

    async fn apply_semantic(
        &self,
        spec: &SemanticSpec,
        working: &[SearchResult],
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if spec.top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(&spec.text, &spec.index_name).await?;

        let options = VectorQueryOptions {
            min_score: spec.min_score,
            entity_uuid_filter: spec.restrict_to_current.then(|| {
                working.iter().map(|r| r.entity.uuid.clone()).collect()
            }),
            field_filters: spec.merged_filters.clone(),
        };

        let hits = self
            .graph
            .query_vector_index(&spec.index_name, spec.top_k, &vector, &options)
            .await?;

        Ok(hits
            .into_iter()
            .map(|(entity, score)| SearchResult::from_vector(entity, score))
            .collect())
    }

    async fn apply_expand(
        &self,
        spec: &ExpandSpec,
        working: &[SearchResult],
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let depth = spec.depth.clamp(1, 3);
        let mut results = working.to_vec();
        let mut seen: std::collections::HashSet<String> =
            working.iter().map(|r| r.entity.uuid.clone()).collect();
        // Frontier follows working-set order so repeated runs discover
        // entities in the same order.
        let mut frontier: Vec<String> = working.iter().map(|r| r.entity.uuid.clone()).collect();

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            // All nodes in a layer expand in parallel.
            let fetches = frontier.iter().map(|uuid| {
                self.graph.fetch_related(
                    uuid,
                    spec.rel_type.as_deref(),
                    spec.direction,
                    EXPAND_FETCH_LIMIT,
                )
            });
            let layers = join_all(fetches).await;

            let mut next_frontier = Vec::new();
            for layer in layers {
                for edge in layer? {
                    if seen.insert(edge.entity.uuid.clone()) {
                        next_frontier.push(edge.entity.uuid.clone());
                        let mut entity = edge.entity;
                        if let Some(tag) = &spec.collect_as {
                            entity
                                .fields
                                .insert("_collected_as".to_string(), Value::String(tag.clone()));
                        }
                        results.push(SearchResult::unscored(entity));
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(results)
    }

    async fn apply_filter(
        &self,
        spec: &FilterSpec,
        entity_type: &str,
        working: &[SearchResult],
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        let mut keep: std::collections::HashSet<String> =
            working.iter().map(|r| r.entity.uuid.clone()).collect();

        if !spec.field_filters.is_empty() {
            let entities: Vec<Entity> = working.iter().map(|r| r.entity.clone()).collect();
            let matched = self
                .filter_uuids_store_side(entity_type, &entities, &spec.field_filters)
                .await?;
            let matched_uuids: std::collections::HashSet<String> =
                matched.into_iter().map(|e| e.uuid).collect();
            keep.retain(|uuid| matched_uuids.contains(uuid));
        }

        if let Some(related) = &spec.related_by {
            let edges = self
                .graph
                .fetch_related(
                    &related.other_uuid,
                    Some(&related.rel_type),
                    related.direction,
                    EXPAND_FETCH_LIMIT,
                )
                .await?;
            let related_uuids: std::collections::HashSet<String> =
                edges.into_iter().map(|e| e.entity.uuid).collect();
            keep.retain(|uuid| related_uuids.contains(uuid));
        }

        Ok(working
            .iter()
            .filter(|r| keep.contains(&r.entity.uuid))
            .cloned()
            .collect())
    }

    /// Follow-up store query applying predicates over a set of fetched
    /// entities (the merging-rule fallback).
    async fn filter_uuids_store_side(
        &self,
        entity_type: &str,
        entities: &[Entity],
        field_filters: &[FieldFilter],
    ) -> Result<Vec<Entity>, RetrievalError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let mut filters = field_filters.to_vec();
        filters.push(FieldFilter {
            field: "uuid".to_string(),
            op: FilterOp::In,
            value: Value::Array(
                entities
                    .iter()
                    .map(|e| Value::String(e.uuid.clone()))
                    .collect(),
            ),
        });
        Ok(self
            .graph
            .fetch_by_fields(entity_type, &filters, None)
            .await?)
    }
}

/// Chainable façade over the operation list.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    pipeline: Pipeline,
}

impl QueryBuilder {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline {
                entity_type: entity_type.into(),
                operations: Vec::new(),
                offset: None,
                limit: None,
            },
        }
    }

    pub fn fetch_by_uuids(mut self, uuids: Vec<String>) -> Self {
        self.pipeline.operations.push(Operation::Fetch(FetchSpec {
            source: FetchSource::ByUuids(uuids),
            filters: Vec::new(),
        }));
        self
    }

    pub fn fetch_all(mut self) -> Self {
        self.pipeline.operations.push(Operation::Fetch(FetchSpec {
            source: FetchSource::All,
            filters: Vec::new(),
        }));
        self
    }

    pub fn fetch_by_fields(mut self, filters: Vec<FieldFilter>) -> Self {
        self.pipeline.operations.push(Operation::Fetch(FetchSpec {
            source: FetchSource::ByFields(filters),
            filters: Vec::new(),
        }));
        self
    }

    pub fn fetch_related_to(mut self, related: RelatedByFilter) -> Self {
        self.pipeline.operations.push(Operation::Fetch(FetchSpec {
            source: FetchSource::ByRelated(related),
            filters: Vec::new(),
        }));
        self
    }

    pub fn semantic(
        mut self,
        index_name: impl Into<String>,
        text: impl Into<String>,
        top_k: usize,
        min_score: f32,
    ) -> Self {
        self.pipeline
            .operations
            .push(Operation::Semantic(SemanticSpec {
                index_name: index_name.into(),
                text: text.into(),
                top_k,
                min_score,
                restrict_to_current: false,
                merged_filters: Vec::new(),
            }));
        self
    }

    /// Semantic step that intersects with the current working set.
    pub fn semantic_within(
        mut self,
        index_name: impl Into<String>,
        text: impl Into<String>,
        top_k: usize,
        min_score: f32,
    ) -> Self {
        self.pipeline
            .operations
            .push(Operation::Semantic(SemanticSpec {
                index_name: index_name.into(),
                text: text.into(),
                top_k,
                min_score,
                restrict_to_current: true,
                merged_filters: Vec::new(),
            }));
        self
    }

    /// Store-side equality predicate; merges into an adjacent fetch or
    /// semantic step at normalisation.
    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.pipeline.operations.push(Operation::Filter(FilterSpec {
            field_filters: vec![FieldFilter::eq(field, value)],
            related_by: None,
        }));
        self
    }

    pub fn where_filters(mut self, field_filters: Vec<FieldFilter>) -> Self {
        self.pipeline.operations.push(Operation::Filter(FilterSpec {
            field_filters,
            related_by: None,
        }));
        self
    }

    pub fn where_related_to(mut self, related: RelatedByFilter) -> Self {
        self.pipeline.operations.push(Operation::Filter(FilterSpec {
            field_filters: Vec::new(),
            related_by: Some(related),
        }));
        self
    }

    pub fn client_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SearchResult) -> bool + Send + Sync + 'static,
    {
        self.pipeline
            .operations
            .push(Operation::ClientFilter(ClientPredicate(Arc::new(predicate))));
        self
    }

    pub fn expand(mut self, rel_type: Option<String>, direction: Direction, depth: usize) -> Self {
        self.pipeline.operations.push(Operation::Expand(ExpandSpec {
            rel_type,
            direction,
            depth,
            collect_as: None,
        }));
        self
    }

    pub fn llm_rerank(mut self, config: RerankConfig) -> Self {
        self.pipeline.operations.push(Operation::LlmRerank(config));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.pipeline.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.pipeline.limit = Some(limit);
        self
    }

    pub fn build(self) -> Pipeline {
        self.pipeline
    }
}
