//! Schema bootstrap
//!
//! Creates the constraints, property indexes and vector indexes the rest
//! of the system assumes. Every statement is `IF NOT EXISTS` so bootstrap
//! is idempotent and safe to run on every startup.

use ragforge_core::EntityCatalog;

use crate::params::Params;
use crate::store::Neo4jStore;
use crate::GraphError;

/// Conversation-layer labels that exist regardless of the entity catalog.
const CONVERSATION_CONSTRAINTS: &[&str] = &[
    "CREATE CONSTRAINT conversation_uuid IF NOT EXISTS FOR (c:Conversation) REQUIRE c.uuid IS UNIQUE",
    "CREATE CONSTRAINT message_uuid IF NOT EXISTS FOR (m:Message) REQUIRE m.uuid IS UNIQUE",
    "CREATE CONSTRAINT summary_uuid IF NOT EXISTS FOR (s:Summary) REQUIRE s.uuid IS UNIQUE",
    "CREATE CONSTRAINT tool_call_uuid IF NOT EXISTS FOR (t:ToolCall) REQUIRE t.uuid IS UNIQUE",
    "CREATE CONSTRAINT tool_result_uuid IF NOT EXISTS FOR (t:ToolResult) REQUIRE t.uuid IS UNIQUE",
];

const CONVERSATION_INDEXES: &[&str] = &[
    "CREATE INDEX conversation_created IF NOT EXISTS FOR (c:Conversation) ON (c.created_at)",
    "CREATE INDEX conversation_updated IF NOT EXISTS FOR (c:Conversation) ON (c.updated_at)",
    "CREATE INDEX conversation_status IF NOT EXISTS FOR (c:Conversation) ON (c.status)",
    "CREATE INDEX message_timestamp IF NOT EXISTS FOR (m:Message) ON (m.timestamp)",
    "CREATE INDEX summary_level IF NOT EXISTS FOR (s:Summary) ON (s.level)",
    "CREATE INDEX summary_created IF NOT EXISTS FOR (s:Summary) ON (s.created_at)",
];

/// Applies the schema for a catalog to a connected store.
pub struct SchemaManager<'a> {
    store: &'a Neo4jStore,
}

impl<'a> SchemaManager<'a> {
    pub fn new(store: &'a Neo4jStore) -> Self {
        Self { store }
    }

    /// Create unique constraints and property indexes for every entity
    /// type, plus the conversation layer.
    pub async fn ensure_schema(&self, catalog: &EntityCatalog) -> Result<(), GraphError> {
        for statement in CONVERSATION_CONSTRAINTS.iter().chain(CONVERSATION_INDEXES) {
            self.store.run_unit(statement, Params::new()).await?;
        }

        for context in catalog.contexts() {
            let label = context.name.replace(|c: char| !c.is_alphanumeric() && c != '_', "");
            let statement = format!(
                "CREATE CONSTRAINT {}_unique IF NOT EXISTS FOR (n:`{}`) REQUIRE n.`{}` IS UNIQUE",
                label.to_lowercase(),
                label,
                context.unique_field
            );
            self.store.run_unit(&statement, Params::new()).await?;

            for field in context.searchable_fields.iter().filter(|f| f.indexed) {
                let statement = format!(
                    "CREATE INDEX {}_{} IF NOT EXISTS FOR (n:`{}`) ON (n.`{}`)",
                    label.to_lowercase(),
                    field.name,
                    label,
                    field.name
                );
                self.store.run_unit(&statement, Params::new()).await?;
            }
        }

        tracing::info!(entity_types = catalog.len(), "Graph schema ensured");
        Ok(())
    }

    /// Create the vector indexes declared in the catalog.
    pub async fn ensure_vector_indexes(&self, catalog: &EntityCatalog) -> Result<(), GraphError> {
        for context in catalog.contexts() {
            for index in &context.vector_indexes {
                let statement = Self::vector_index_statement(
                    &index.name,
                    &context.name,
                    &index.source_field,
                    index.dimension,
                );
                self.store.run_unit(&statement, Params::new()).await?;
            }
        }
        Ok(())
    }

    /// Create the conversation-layer vector indexes, used when embeddings
    /// are enabled for memory.
    pub async fn ensure_memory_vector_indexes(&self, dimension: usize) -> Result<(), GraphError> {
        for (name, label) in [
            ("messageEmbeddings", "Message"),
            ("summaryEmbeddings", "Summary"),
        ] {
            let statement = Self::vector_index_statement(name, label, "embedding", dimension);
            self.store.run_unit(&statement, Params::new()).await?;
        }
        Ok(())
    }

    fn vector_index_statement(
        name: &str,
        label: &str,
        source_field: &str,
        dimension: usize,
    ) -> String {
        format!(
            "CREATE VECTOR INDEX `{}` IF NOT EXISTS FOR (n:`{}`) ON (n.`{}`) \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: 'cosine'}}}}",
            name, label, source_field, dimension
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_index_statement_shape() {
        let statement =
            SchemaManager::vector_index_statement("scopeEmbeddings", "Scope", "content", 768);
        assert!(statement.contains("CREATE VECTOR INDEX `scopeEmbeddings` IF NOT EXISTS"));
        assert!(statement.contains("`vector.dimensions`: 768"));
        assert!(statement.contains("'cosine'"));
    }
}
