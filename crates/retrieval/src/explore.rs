//! Relationship exploration
//!
//! Breadth-first traversal around the top search results. Seeds are
//! explored serially; for each node the outgoing and incoming edges are
//! fetched in parallel, capped per direction. Depth is clamped to [1, 3].
//! The result is a deduplicated node list (seeds first, by score; then
//! discovered nodes in insertion order) and an edge list deduplicated by
//! `(from, to, type)`.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use ragforge_config::constants::retrieval as defaults;
use ragforge_core::{Direction, Entity, Relationship, SearchResult};
use ragforge_graph::{GraphClient, GraphError};

/// Exploration bounds.
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Requested depth; clamped to [1, 3]
    pub depth: usize,
    /// At most this many seed results are explored
    pub max_to_explore: usize,
    /// Per-direction edge cap for each node
    pub max_relationships_per_node: usize,
    /// Restrict traversal to one relationship type; all types when `None`
    pub rel_type: Option<String>,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            depth: 1,
            max_to_explore: defaults::MAX_TO_EXPLORE,
            max_relationships_per_node: defaults::MAX_RELATIONSHIPS_PER_NODE,
            rel_type: None,
        }
    }
}

impl ExploreConfig {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    fn clamped_depth(&self) -> usize {
        self.depth.clamp(defaults::MIN_DEPTH, defaults::MAX_DEPTH)
    }
}

/// A node in the exploration graph.
#[derive(Debug, Clone, Serialize)]
pub struct ExploredNode {
    pub entity: Entity,
    /// Seed score; discovered nodes carry none
    pub score: Option<f32>,
    pub is_search_result: bool,
}

/// The deduplicated exploration result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExplorationGraph {
    pub nodes: Vec<ExploredNode>,
    pub edges: Vec<Relationship>,
}

/// Breadth-first explorer over the graph store.
pub struct GraphExplorer {
    graph: Arc<dyn GraphClient>,
}

impl GraphExplorer {
    pub fn new(graph: Arc<dyn GraphClient>) -> Self {
        Self { graph }
    }

    /// Explore around the given results. An empty seed list yields an
    /// empty graph without touching the store.
    pub async fn explore(
        &self,
        seeds: &[SearchResult],
        config: &ExploreConfig,
    ) -> Result<ExplorationGraph, GraphError> {
        if seeds.is_empty() {
            return Ok(ExplorationGraph::default());
        }

        let depth = config.clamped_depth();
        let mut graph = ExplorationGraph::default();
        let mut seen_nodes: HashSet<String> = HashSet::new();
        let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();

        // Seeds first, in score order (the input is already sorted).
        let seeds = &seeds[..seeds.len().min(config.max_to_explore)];
        for seed in seeds {
            if seen_nodes.insert(seed.entity.uuid.clone()) {
                graph.nodes.push(ExploredNode {
                    entity: seed.entity.clone(),
                    score: seed.score,
                    is_search_result: true,
                });
            }
        }

        // One BFS per seed, serial between seeds.
        for seed in seeds {
            let mut queue: VecDeque<(String, usize)> = VecDeque::new();
            queue.push_back((seed.entity.uuid.clone(), 0));
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(seed.entity.uuid.clone());

            while let Some((uuid, current_depth)) = queue.pop_front() {
                let rel_type = config.rel_type.as_deref();
                // Outgoing and incoming fetched in parallel per node.
                let (outgoing, incoming) = tokio::join!(
                    self.graph.fetch_related(
                        &uuid,
                        rel_type,
                        Direction::Outgoing,
                        config.max_relationships_per_node,
                    ),
                    self.graph.fetch_related(
                        &uuid,
                        rel_type,
                        Direction::Incoming,
                        config.max_relationships_per_node,
                    ),
                );

                for edge in outgoing?.into_iter().chain(incoming?) {
                    if seen_edges.insert(edge.relationship.key()) {
                        graph.edges.push(edge.relationship.clone());
                    }
                    if seen_nodes.insert(edge.entity.uuid.clone()) {
                        graph.nodes.push(ExploredNode {
                            entity: edge.entity.clone(),
                            score: None,
                            is_search_result: false,
                        });
                    }
                    if current_depth + 1 < depth && visited.insert(edge.entity.uuid.clone()) {
                        queue.push_back((edge.entity.uuid, current_depth + 1));
                    }
                }
            }
        }

        tracing::debug!(
            seeds = seeds.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            depth,
            "Relationship exploration complete"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragforge_core::RelatedEdge;
    use ragforge_graph::{FieldFilter, VectorQueryOptions};
    use std::collections::HashMap;

    /// In-memory adjacency fixture.
    struct FakeGraph {
        outgoing: HashMap<String, Vec<(String, String)>>, // uuid -> (target, rel_type)
    }

    impl FakeGraph {
        fn chain_fanout(width: usize, depth_levels: usize) -> Self {
            // "seed" fans out to w children, each child to w grandchildren…
            let mut outgoing: HashMap<String, Vec<(String, String)>> = HashMap::new();
            let mut frontier = vec!["seed".to_string()];
            let mut counter = 0usize;
            for _ in 0..depth_levels {
                let mut next = Vec::new();
                for parent in &frontier {
                    let children: Vec<(String, String)> = (0..width)
                        .map(|_| {
                            counter += 1;
                            (format!("n{}", counter), "CALLS".to_string())
                        })
                        .collect();
                    next.extend(children.iter().map(|(c, _)| c.clone()));
                    outgoing.insert(parent.clone(), children);
                }
                frontier = next;
            }
            Self { outgoing }
        }
    }

    #[async_trait]
    impl GraphClient for FakeGraph {
        async fn fetch_by_uuids(
            &self,
            _entity_type: &str,
            _uuids: &[String],
        ) -> Result<Vec<Entity>, GraphError> {
            Ok(Vec::new())
        }

        async fn fetch_by_fields(
            &self,
            _entity_type: &str,
            _filters: &[FieldFilter],
            _limit: Option<usize>,
        ) -> Result<Vec<Entity>, GraphError> {
            Ok(Vec::new())
        }

        async fn fetch_all(
            &self,
            _entity_type: &str,
            _limit: Option<usize>,
        ) -> Result<Vec<Entity>, GraphError> {
            Ok(Vec::new())
        }

        async fn fetch_related(
            &self,
            uuid: &str,
            _rel_type: Option<&str>,
            direction: Direction,
            limit: usize,
        ) -> Result<Vec<RelatedEdge>, GraphError> {
            if direction == Direction::Incoming {
                return Ok(Vec::new());
            }
            Ok(self
                .outgoing
                .get(uuid)
                .map(|edges| {
                    edges
                        .iter()
                        .take(limit)
                        .map(|(target, rel_type)| RelatedEdge {
                            relationship: Relationship::new(uuid, target.clone(), rel_type.clone()),
                            entity: Entity::new(target.clone(), "Scope", target.clone()),
                            direction: Direction::Outgoing,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn query_vector_index(
            &self,
            _index_name: &str,
            _top_k: usize,
            _vector: &[f32],
            _options: &VectorQueryOptions,
        ) -> Result<Vec<(Entity, f32)>, GraphError> {
            Ok(Vec::new())
        }
    }

    fn seed_result() -> SearchResult {
        SearchResult::scored(Entity::new("seed", "Scope", "seed"), 0.9)
    }

    #[tokio::test]
    async fn test_depth_two_fanout_bounds() {
        // One seed with 20 outgoing edges, capped at 5 per node, depth 2:
        // 1 + 5 + 5*5 = 31 nodes at most.
        let graph = Arc::new(FakeGraph::chain_fanout(20, 3));
        let explorer = GraphExplorer::new(graph);
        let config = ExploreConfig {
            depth: 2,
            max_relationships_per_node: 5,
            ..Default::default()
        };

        let result = explorer.explore(&[seed_result()], &config).await.unwrap();

        assert!(result.nodes.len() <= 31);
        assert_eq!(result.nodes[0].entity.uuid, "seed");
        assert!(result.nodes[0].is_search_result);
        assert!(result.nodes[1..].iter().all(|n| !n.is_search_result));
        assert!(result.nodes[1..].iter().all(|n| n.score.is_none()));
    }

    #[tokio::test]
    async fn test_exploration_is_idempotent() {
        let graph = Arc::new(FakeGraph::chain_fanout(3, 2));
        let explorer = GraphExplorer::new(graph);
        let config = ExploreConfig::default().with_depth(2);

        let first = explorer.explore(&[seed_result()], &config).await.unwrap();
        let second = explorer.explore(&[seed_result()], &config).await.unwrap();

        let uuids = |g: &ExplorationGraph| -> Vec<String> {
            g.nodes.iter().map(|n| n.entity.uuid.clone()).collect()
        };
        assert_eq!(uuids(&first), uuids(&second));
        assert_eq!(first.edges.len(), second.edges.len());
    }

    #[tokio::test]
    async fn test_empty_seeds_empty_graph() {
        let graph = Arc::new(FakeGraph::chain_fanout(2, 1));
        let explorer = GraphExplorer::new(graph);

        let result = explorer
            .explore(&[], &ExploreConfig::default())
            .await
            .unwrap();
        assert!(result.nodes.is_empty());
        assert!(result.edges.is_empty());
    }

    #[tokio::test]
    async fn test_depth_is_clamped() {
        let graph = Arc::new(FakeGraph::chain_fanout(1, 6));
        let explorer = GraphExplorer::new(graph);

        // depth 10 clamps to 3: seed + three levels of single children.
        let config = ExploreConfig::default().with_depth(10);
        let result = explorer.explore(&[seed_result()], &config).await.unwrap();
        assert_eq!(result.nodes.len(), 4);

        // depth 0 clamps to 1.
        let config = ExploreConfig::default().with_depth(0);
        let result = explorer.explore(&[seed_result()], &config).await.unwrap();
        assert_eq!(result.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_edges_deduplicated() {
        let graph = Arc::new(FakeGraph::chain_fanout(2, 2));
        let explorer = GraphExplorer::new(graph);
        let config = ExploreConfig::default().with_depth(3);

        let result = explorer.explore(&[seed_result()], &config).await.unwrap();
        let mut keys: Vec<_> = result.edges.iter().map(|e| e.key()).collect();
        let before = keys.len();
        keys.dedup();
        keys.sort();
        keys.dedup();
        assert_eq!(before, keys.len());
    }
}
