//! Neo4j store implementation
//!
//! All calls are parameterised; labels and field names coming from the
//! entity catalog are the only identifiers interpolated into query text,
//! and those are sanitised first.

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Node, Query, Row};
use serde_json::Value;

use ragforge_core::{Direction, Entity, RelatedEdge, Relationship};

use crate::client::{FieldFilter, GraphClient, VectorQueryOptions};
use crate::params::{coerce_int, ParamValue, Params};
use crate::GraphError;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct GraphStoreConfig {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Rows fetched per pull; driver default when `None`
    pub fetch_size: Option<usize>,
}

impl GraphStoreConfig {
    pub fn from_env(layer: &ragforge_config::EnvLayer) -> Self {
        let env = ragforge_config::GraphStoreEnv::from_layer(layer);
        Self {
            uri: env.uri,
            username: env.username,
            password: env.password,
            database: env.database,
            fetch_size: None,
        }
    }
}

/// Strip characters that would escape a backtick-quoted identifier.
fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// The Neo4j-backed store.
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connect to the store. Connection failure surfaces as
    /// [`GraphError::StoreUnavailable`].
    pub async fn connect(config: GraphStoreConfig) -> Result<Self, GraphError> {
        let mut builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.username)
            .password(&config.password)
            .db(config.database.as_str());
        if let Some(fetch_size) = config.fetch_size {
            builder = builder.fetch_size(fetch_size);
        }
        let driver_config = builder.build().map_err(GraphError::from_driver)?;
        let graph = Graph::connect(driver_config)
            .await
            .map_err(GraphError::from_driver)?;
        tracing::info!(uri = %config.uri, db = %config.database, "Connected to graph store");
        Ok(Self { graph })
    }

    fn build_query(cypher: &str, params: Params) -> Query {
        let mut query = neo4rs::query(cypher);
        for (key, value) in params {
            query = value.apply(query, &key);
        }
        query
    }

    /// Run a parameterised query and collect all rows.
    pub async fn run(&self, cypher: &str, params: Params) -> Result<Vec<Row>, GraphError> {
        let query = Self::build_query(cypher, params);
        let mut stream = self
            .graph
            .execute(query)
            .await
            .map_err(GraphError::from_driver)?;

        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(GraphError::from_driver)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run a statement for its side effects only.
    pub async fn run_unit(&self, cypher: &str, params: Params) -> Result<(), GraphError> {
        let query = Self::build_query(cypher, params);
        self.graph.run(query).await.map_err(GraphError::from_driver)
    }

    /// Begin an explicit transaction.
    pub async fn begin(&self) -> Result<Transaction, GraphError> {
        let inner = self
            .graph
            .start_txn()
            .await
            .map_err(GraphError::from_driver)?;
        Ok(Transaction { inner })
    }

    /// Execute a batch of statements inside one write transaction. Either
    /// all statements commit or none do.
    pub async fn write_transaction(
        &self,
        statements: Vec<(String, Params)>,
    ) -> Result<(), GraphError> {
        let mut tx = self.begin().await?;
        for (cypher, params) in statements {
            if let Err(err) = tx.run(&cypher, params).await {
                tx.rollback().await.ok();
                return Err(err);
            }
        }
        tx.commit().await
    }

    /// Execute a batch of read statements inside one transaction, returning
    /// the rows per statement.
    pub async fn read_transaction(
        &self,
        statements: Vec<(String, Params)>,
    ) -> Result<Vec<Vec<Row>>, GraphError> {
        let mut tx = self.begin().await?;
        let mut all_rows = Vec::with_capacity(statements.len());
        for (cypher, params) in statements {
            match tx.execute(&cypher, params).await {
                Ok(rows) => all_rows.push(rows),
                Err(err) => {
                    tx.rollback().await.ok();
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(all_rows)
    }

    /// Decode a node column into an [`Entity`].
    pub fn node_to_entity(node: &Node) -> Result<Entity, GraphError> {
        let uuid: String = node
            .get("uuid")
            .map_err(|e| GraphError::Decode(format!("node without uuid: {}", e)))?;
        let entity_type = node
            .labels()
            .first()
            .map(|l| l.to_string())
            .unwrap_or_default();

        let mut entity = Entity::new(uuid.clone(), entity_type, uuid);
        for key in node.keys() {
            if let Some(value) = Self::property_to_json(node, key) {
                entity.fields.insert(key.to_string(), value);
            }
        }
        if let Some(name) = entity.field_str("name").map(|s| s.to_string()) {
            entity.name = name;
        }
        Ok(entity)
    }

    /// Best-effort bolt → JSON conversion for node properties. Structured
    /// properties (lists of floats, nested maps) are skipped; the pipeline
    /// never reads embeddings back through entity fields.
    fn property_to_json(node: &Node, key: &str) -> Option<Value> {
        if let Ok(v) = node.get::<String>(key) {
            return Some(Value::String(v));
        }
        if let Ok(v) = node.get::<i64>(key) {
            return Some(Value::Number(v.into()));
        }
        if let Ok(v) = node.get::<f64>(key) {
            return serde_json::Number::from_f64(v).map(Value::Number);
        }
        if let Ok(v) = node.get::<bool>(key) {
            return Some(Value::Bool(v));
        }
        if let Ok(v) = node.get::<Vec<String>>(key) {
            return Some(Value::Array(v.into_iter().map(Value::String).collect()));
        }
        None
    }

    /// Render field predicates into a WHERE fragment, binding values as
    /// parameters named `f0..fN`.
    fn render_filters(
        filters: &[FieldFilter],
        node_var: &str,
        params: &mut Params,
    ) -> Vec<String> {
        filters
            .iter()
            .enumerate()
            .map(|(i, filter)| {
                let key = format!("f{}", i);
                params.insert(key.clone(), ParamValue::from_json(&filter.value));
                format!(
                    "{}.`{}` {} ${}",
                    node_var,
                    sanitize_identifier(&filter.field),
                    filter.op.cypher(),
                    key
                )
            })
            .collect()
    }
}

#[async_trait]
impl GraphClient for Neo4jStore {
    async fn fetch_by_uuids(
        &self,
        entity_type: &str,
        uuids: &[String],
    ) -> Result<Vec<Entity>, GraphError> {
        let label = sanitize_identifier(entity_type);
        let cypher = format!("MATCH (n:`{}`) WHERE n.uuid IN $uuids RETURN n", label);
        let mut params = Params::new();
        params.insert("uuids".to_string(), ParamValue::StringList(uuids.to_vec()));

        let rows = self.run(&cypher, params).await?;
        let mut by_uuid = std::collections::HashMap::new();
        for row in rows {
            let node: Node = row
                .get("n")
                .map_err(|e| GraphError::Decode(e.to_string()))?;
            let entity = Self::node_to_entity(&node)?;
            by_uuid.insert(entity.uuid.clone(), entity);
        }
        // Preserve the requested order.
        Ok(uuids.iter().filter_map(|u| by_uuid.remove(u)).collect())
    }

    async fn fetch_by_fields(
        &self,
        entity_type: &str,
        filters: &[FieldFilter],
        limit: Option<usize>,
    ) -> Result<Vec<Entity>, GraphError> {
        let label = sanitize_identifier(entity_type);
        let mut params = Params::new();
        let fragments = Self::render_filters(filters, "n", &mut params);
        let where_clause = if fragments.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", fragments.join(" AND "))
        };
        let limit_clause = match limit {
            Some(n) => {
                params.insert("limit".to_string(), ParamValue::Int(coerce_int(n)));
                " LIMIT $limit"
            }
            None => "",
        };
        let cypher = format!(
            "MATCH (n:`{}`){} RETURN n{}",
            label, where_clause, limit_clause
        );

        let rows = self.run(&cypher, params).await?;
        rows.iter()
            .map(|row| {
                let node: Node = row
                    .get("n")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                Self::node_to_entity(&node)
            })
            .collect()
    }

    async fn fetch_all(
        &self,
        entity_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Entity>, GraphError> {
        self.fetch_by_fields(entity_type, &[], limit).await
    }

    async fn fetch_related(
        &self,
        uuid: &str,
        rel_type: Option<&str>,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<RelatedEdge>, GraphError> {
        let rel = match rel_type {
            Some(name) => format!(":`{}`", sanitize_identifier(name)),
            None => String::new(),
        };
        let pattern = match direction {
            Direction::Outgoing => format!("(n {{uuid: $uuid}})-[r{}]->(m)", rel),
            Direction::Incoming => format!("(n {{uuid: $uuid}})<-[r{}]-(m)", rel),
            Direction::Both => format!("(n {{uuid: $uuid}})-[r{}]-(m)", rel),
        };
        let cypher = format!(
            "MATCH {} RETURN m, type(r) AS rel_type, startNode(r).uuid AS from_uuid, \
             endNode(r).uuid AS to_uuid LIMIT $limit",
            pattern
        );
        let mut params = Params::new();
        params.insert("uuid".to_string(), ParamValue::String(uuid.to_string()));
        params.insert("limit".to_string(), ParamValue::Int(coerce_int(limit)));

        let rows = self.run(&cypher, params).await?;
        rows.iter()
            .map(|row| {
                let node: Node = row
                    .get("m")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                let rel_type: String = row
                    .get("rel_type")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                let from_uuid: String = row
                    .get("from_uuid")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                let to_uuid: String = row
                    .get("to_uuid")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                let entity = Self::node_to_entity(&node)?;
                let edge_direction = if from_uuid == uuid {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                };
                Ok(RelatedEdge {
                    relationship: Relationship::new(from_uuid, to_uuid, rel_type),
                    entity,
                    direction: edge_direction,
                })
            })
            .collect()
    }

    async fn query_vector_index(
        &self,
        index_name: &str,
        top_k: usize,
        vector: &[f32],
        options: &VectorQueryOptions,
    ) -> Result<Vec<(Entity, f32)>, GraphError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut params = Params::new();
        params.insert(
            "index_name".to_string(),
            ParamValue::String(index_name.to_string()),
        );
        params.insert("top_k".to_string(), ParamValue::Int(coerce_int(top_k)));
        params.insert("vector".to_string(), ParamValue::FloatList(vector.to_vec()));
        params.insert(
            "min_score".to_string(),
            ParamValue::Float(options.min_score as f64),
        );

        let mut predicates = vec!["score >= $min_score".to_string()];
        if let Some(uuids) = &options.entity_uuid_filter {
            params.insert(
                "uuid_filter".to_string(),
                ParamValue::StringList(uuids.clone()),
            );
            predicates.push("node.uuid IN $uuid_filter".to_string());
        }
        predicates.extend(Self::render_filters(&options.field_filters, "node", &mut params));

        let cypher = format!(
            "CALL db.index.vector.queryNodes($index_name, $top_k, $vector) \
             YIELD node, score WHERE {} RETURN node, score ORDER BY score DESC",
            predicates.join(" AND ")
        );

        tracing::debug!(index = index_name, top_k, "Vector index query");

        let rows = self.run(&cypher, params).await.map_err(|err| {
            // queryNodes reports an unknown index as a generic failure with
            // the index name embedded; reclassify it here.
            if err.to_string().contains(index_name) {
                GraphError::IndexMissing(index_name.to_string())
            } else {
                err
            }
        })?;

        rows.iter()
            .map(|row| {
                let node: Node = row
                    .get("node")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                let score: f64 = row
                    .get("score")
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                Ok((Self::node_to_entity(&node)?, score as f32))
            })
            .collect()
    }
}

/// An explicit transaction. Partial writes roll back on drop unless
/// committed.
pub struct Transaction {
    inner: neo4rs::Txn,
}

impl Transaction {
    /// Run a statement for its side effects.
    pub async fn run(&mut self, cypher: &str, params: Params) -> Result<(), GraphError> {
        let query = Neo4jStore::build_query(cypher, params);
        self.inner.run(query).await.map_err(GraphError::from_driver)
    }

    /// Run a statement and collect its rows.
    pub async fn execute(&mut self, cypher: &str, params: Params) -> Result<Vec<Row>, GraphError> {
        let query = Neo4jStore::build_query(cypher, params);
        let mut stream = self
            .inner
            .execute(query)
            .await
            .map_err(GraphError::from_driver)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.inner.handle()).await.map_err(GraphError::from_driver)? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub async fn commit(self) -> Result<(), GraphError> {
        self.inner.commit().await.map_err(GraphError::from_driver)
    }

    pub async fn rollback(self) -> Result<(), GraphError> {
        self.inner.rollback().await.map_err(GraphError::from_driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("Scope"), "Scope");
        assert_eq!(sanitize_identifier("file_path"), "file_path");
        assert_eq!(sanitize_identifier("`) DETACH DELETE n //"), "DETACHDELETEn");
    }

    #[test]
    fn test_render_filters_binds_params() {
        let filters = vec![
            FieldFilter::eq("type", serde_json::json!("function")),
            FieldFilter {
                field: "start_line".to_string(),
                op: crate::client::FilterOp::Gt,
                value: serde_json::json!(10),
            },
        ];
        let mut params = Params::new();
        let fragments = Neo4jStore::render_filters(&filters, "n", &mut params);

        assert_eq!(fragments[0], "n.`type` = $f0");
        assert_eq!(fragments[1], "n.`start_line` > $f1");
        assert_eq!(params.len(), 2);
        assert_eq!(
            params.get("f0"),
            Some(&ParamValue::String("function".to_string()))
        );
    }
}
