//! Graph synchronisation
//!
//! Diffs a parsed batch against what the store already holds, using the
//! per-entity content hash: new entities are created, changed ones
//! updated, unchanged ones skipped, and entities whose source vanished
//! are deleted. Writes are batched into store transactions.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ragforge_graph::{Neo4jStore, ParamValue, Params};

use crate::model::{ParsedBatch, SourceAdapter};
use crate::IngestError;

/// An entity ready for the store.
#[derive(Debug, Clone)]
pub struct SyncEntity {
    pub uuid: String,
    pub entity_type: String,
    pub name: String,
    pub fields: HashMap<String, Value>,
    pub content_hash: String,
}

/// A relationship ready for the store, endpoints resolved to uuids.
#[derive(Debug, Clone)]
pub struct SyncRelationship {
    pub from_uuid: String,
    pub from_type: String,
    pub to_uuid: String,
    pub to_type: String,
    pub rel_type: String,
}

/// Store operations the ingestor needs.
#[async_trait]
pub trait EntitySink: Send + Sync {
    /// uuid -> stored content hash for every entity of a type.
    async fn existing_hashes(
        &self,
        entity_type: &str,
    ) -> Result<HashMap<String, String>, IngestError>;

    async fn upsert_entities(&self, entities: &[SyncEntity]) -> Result<(), IngestError>;

    async fn delete_entities(&self, entity_type: &str, uuids: &[String])
        -> Result<(), IngestError>;

    async fn upsert_relationships(
        &self,
        relationships: &[SyncRelationship],
    ) -> Result<(), IngestError>;
}

/// What one sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub relationships: usize,
}

/// Synchronises parsed batches into a sink.
pub struct Ingestor<S> {
    sink: Arc<S>,
}

impl<S: EntitySink> Ingestor<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    /// Run one adapter pass and sync the result.
    pub async fn ingest(&self, adapter: &dyn SourceAdapter) -> Result<IngestReport, IngestError> {
        let batch = adapter.parse().await?;
        tracing::info!(
            adapter = adapter.name(),
            entities = batch.entities.len(),
            relationships = batch.relationships.len(),
            "Parsed source batch"
        );
        self.sync(&batch).await
    }

    /// Diff and apply one batch.
    pub async fn sync(&self, batch: &ParsedBatch) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport::default();

        // Group by type so hash lookups and deletes stay per-label.
        let mut by_type: HashMap<&str, Vec<&crate::model::ParsedEntity>> = HashMap::new();
        for entity in &batch.entities {
            by_type.entry(entity.entity_type.as_str()).or_default().push(entity);
        }

        for (entity_type, entities) in &by_type {
            let existing = self.sink.existing_hashes(entity_type).await?;
            let mut seen: HashSet<String> = HashSet::new();
            let mut to_write: Vec<SyncEntity> = Vec::new();

            for entity in entities {
                let uuid = entity.uuid();
                let hash = entity.hash();
                seen.insert(uuid.clone());

                match existing.get(&uuid) {
                    Some(stored) if *stored == hash => {
                        report.unchanged += 1;
                        continue;
                    }
                    Some(_) => report.updated += 1,
                    None => report.created += 1,
                }

                to_write.push(SyncEntity {
                    uuid,
                    entity_type: entity.entity_type.clone(),
                    name: entity.name.clone(),
                    fields: entity.fields.clone(),
                    content_hash: hash,
                });
            }

            if !to_write.is_empty() {
                self.sink.upsert_entities(&to_write).await?;
            }

            // Entities the source no longer produces.
            let stale: Vec<String> = existing
                .keys()
                .filter(|uuid| !seen.contains(*uuid))
                .cloned()
                .collect();
            if !stale.is_empty() {
                report.deleted += stale.len();
                self.sink.delete_entities(entity_type, &stale).await?;
            }
        }

        let relationships: Vec<SyncRelationship> = batch
            .relationships
            .iter()
            .map(|rel| SyncRelationship {
                from_uuid: rel.from.uuid(),
                from_type: rel.from.entity_type.clone(),
                to_uuid: rel.to.uuid(),
                to_type: rel.to.entity_type.clone(),
                rel_type: rel.rel_type.clone(),
            })
            .collect();
        if !relationships.is_empty() {
            report.relationships = relationships.len();
            self.sink.upsert_relationships(&relationships).await?;
        }

        tracing::info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            deleted = report.deleted,
            "Sync complete"
        );
        Ok(report)
    }
}

/// Sink backed by the Neo4j store. Entities MERGE on uuid; relationships
/// MERGE on `(from, to, type)`, so re-running a sync is idempotent.
pub struct GraphEntitySink {
    store: Arc<Neo4jStore>,
}

impl GraphEntitySink {
    pub fn new(store: Arc<Neo4jStore>) -> Self {
        Self { store }
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect()
    }
}

#[async_trait]
impl EntitySink for GraphEntitySink {
    async fn existing_hashes(
        &self,
        entity_type: &str,
    ) -> Result<HashMap<String, String>, IngestError> {
        let label = Self::sanitize(entity_type);
        let rows = self
            .store
            .run(
                &format!(
                    "MATCH (n:`{}`) RETURN n.uuid AS uuid, n.content_hash AS hash",
                    label
                ),
                Params::new(),
            )
            .await?;

        let mut hashes = HashMap::new();
        for row in rows {
            let uuid: String = row
                .get("uuid")
                .map_err(|e| IngestError::Adapter(e.to_string()))?;
            let hash: String = row.get("hash").unwrap_or_default();
            hashes.insert(uuid, hash);
        }
        Ok(hashes)
    }

    async fn upsert_entities(&self, entities: &[SyncEntity]) -> Result<(), IngestError> {
        let mut statements: Vec<(String, Params)> = Vec::with_capacity(entities.len());
        for entity in entities {
            let label = Self::sanitize(&entity.entity_type);
            let mut params = Params::new();
            params.insert("uuid".into(), ParamValue::String(entity.uuid.clone()));
            params.insert("name".into(), ParamValue::String(entity.name.clone()));
            params.insert(
                "hash".into(),
                ParamValue::String(entity.content_hash.clone()),
            );

            let mut assignments =
                vec!["n.name = $name".to_string(), "n.content_hash = $hash".to_string()];
            for (index, (field, value)) in entity.fields.iter().enumerate() {
                let key = format!("v{}", index);
                params.insert(key.clone(), ParamValue::from_json(value));
                assignments.push(format!("n.`{}` = ${}", Self::sanitize(field), key));
            }

            statements.push((
                format!(
                    "MERGE (n:`{}` {{uuid: $uuid}}) SET {}",
                    label,
                    assignments.join(", ")
                ),
                params,
            ));
        }
        self.store.write_transaction(statements).await?;
        Ok(())
    }

    async fn delete_entities(
        &self,
        entity_type: &str,
        uuids: &[String],
    ) -> Result<(), IngestError> {
        let label = Self::sanitize(entity_type);
        let mut params = Params::new();
        params.insert("uuids".into(), ParamValue::StringList(uuids.to_vec()));
        self.store
            .run_unit(
                &format!(
                    "MATCH (n:`{}`) WHERE n.uuid IN $uuids DETACH DELETE n",
                    label
                ),
                params,
            )
            .await?;
        Ok(())
    }

    async fn upsert_relationships(
        &self,
        relationships: &[SyncRelationship],
    ) -> Result<(), IngestError> {
        let mut statements: Vec<(String, Params)> = Vec::with_capacity(relationships.len());
        for rel in relationships {
            let mut params = Params::new();
            params.insert("from".into(), ParamValue::String(rel.from_uuid.clone()));
            params.insert("to".into(), ParamValue::String(rel.to_uuid.clone()));
            statements.push((
                format!(
                    "MATCH (a:`{}` {{uuid: $from}}), (b:`{}` {{uuid: $to}}) \
                     MERGE (a)-[:`{}`]->(b)",
                    Self::sanitize(&rel.from_type),
                    Self::sanitize(&rel.to_type),
                    Self::sanitize(&rel.rel_type),
                ),
                params,
            ));
        }
        self.store.write_transaction(statements).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityRef, ParsedEntity, ParsedRelationship};
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    #[derive(Default)]
    struct MemorySink {
        entities: SyncMutex<HashMap<String, SyncEntity>>,
        relationships: SyncMutex<HashSet<(String, String, String)>>,
    }

    #[async_trait]
    impl EntitySink for MemorySink {
        async fn existing_hashes(
            &self,
            entity_type: &str,
        ) -> Result<HashMap<String, String>, IngestError> {
            Ok(self
                .entities
                .lock()
                .values()
                .filter(|e| e.entity_type == entity_type)
                .map(|e| (e.uuid.clone(), e.content_hash.clone()))
                .collect())
        }

        async fn upsert_entities(&self, entities: &[SyncEntity]) -> Result<(), IngestError> {
            let mut map = self.entities.lock();
            for entity in entities {
                map.insert(entity.uuid.clone(), entity.clone());
            }
            Ok(())
        }

        async fn delete_entities(
            &self,
            _entity_type: &str,
            uuids: &[String],
        ) -> Result<(), IngestError> {
            let mut map = self.entities.lock();
            for uuid in uuids {
                map.remove(uuid);
            }
            Ok(())
        }

        async fn upsert_relationships(
            &self,
            relationships: &[SyncRelationship],
        ) -> Result<(), IngestError> {
            let mut set = self.relationships.lock();
            for rel in relationships {
                set.insert((rel.from_uuid.clone(), rel.to_uuid.clone(), rel.rel_type.clone()));
            }
            Ok(())
        }
    }

    fn entity(unique: &str, content: &str) -> ParsedEntity {
        ParsedEntity {
            entity_type: "Scope".into(),
            unique_value: unique.into(),
            name: unique.into(),
            fields: HashMap::from([("file_path".to_string(), json!("src/lib.rs"))]),
            content: Some(content.into()),
        }
    }

    fn batch(entities: Vec<ParsedEntity>) -> ParsedBatch {
        ParsedBatch {
            entities,
            relationships: vec![ParsedRelationship {
                from: EntityRef::new("Scope", "a"),
                to: EntityRef::new("Scope", "b"),
                rel_type: "CALLS".into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_first_sync_creates_everything() {
        let sink = Arc::new(MemorySink::default());
        let ingestor = Ingestor::new(sink.clone());

        let report = ingestor
            .sync(&batch(vec![entity("a", "fn a() {}"), entity("b", "fn b() {}")]))
            .await
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.unchanged, 0);
        assert_eq!(report.relationships, 1);
        assert_eq!(sink.entities.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_resync_is_a_noop() {
        let sink = Arc::new(MemorySink::default());
        let ingestor = Ingestor::new(sink.clone());
        let make = || batch(vec![entity("a", "fn a() {}"), entity("b", "fn b() {}")]);

        ingestor.sync(&make()).await.unwrap();
        let uuids_before: HashSet<String> = sink.entities.lock().keys().cloned().collect();

        let report = ingestor.sync(&make()).await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.deleted, 0);

        // No uuid churn.
        let uuids_after: HashSet<String> = sink.entities.lock().keys().cloned().collect();
        assert_eq!(uuids_before, uuids_after);
    }

    #[tokio::test]
    async fn test_changed_content_updates_same_uuid() {
        let sink = Arc::new(MemorySink::default());
        let ingestor = Ingestor::new(sink.clone());

        ingestor.sync(&batch(vec![entity("a", "v1"), entity("b", "x")])).await.unwrap();
        let report = ingestor
            .sync(&batch(vec![entity("a", "v2"), entity("b", "x")]))
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);

        let uuid = crate::model::deterministic_uuid("Scope", "a");
        let stored = sink.entities.lock().get(&uuid).cloned().unwrap();
        assert_eq!(stored.content_hash, crate::model::content_hash("v2"));
    }

    #[tokio::test]
    async fn test_vanished_entities_deleted() {
        let sink = Arc::new(MemorySink::default());
        let ingestor = Ingestor::new(sink.clone());

        ingestor.sync(&batch(vec![entity("a", "x"), entity("b", "y")])).await.unwrap();
        let report = ingestor.sync(&batch(vec![entity("a", "x")])).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(sink.entities.lock().len(), 1);
    }
}
