//! Source ingestion
//!
//! The core does not parse source code; it consumes already-parsed
//! entities and relationships from a [`SourceAdapter`] and synchronises
//! them into the graph:
//! - entity uuids are deterministic (uuid-v5 over type + unique value),
//!   so re-ingesting an unchanged tree never mutates ids;
//! - every entity carries a content hash; unchanged entities are skipped,
//!   changed ones updated, vanished ones deleted.

pub mod model;
pub mod sync;

pub use model::{
    content_hash, deterministic_uuid, EntityRef, ParsedBatch, ParsedEntity, ParsedRelationship,
    SourceAdapter,
};
pub use sync::{EntitySink, GraphEntitySink, IngestReport, Ingestor, SyncEntity, SyncRelationship};

use thiserror::Error;

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Source adapter failed: {0}")]
    Adapter(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error(transparent)]
    Graph(#[from] ragforge_graph::GraphError),
}

impl From<IngestError> for ragforge_core::Error {
    fn from(err: IngestError) -> Self {
        ragforge_core::Error::Ingest(err.to_string())
    }
}
