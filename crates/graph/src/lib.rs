//! Graph store adapter
//!
//! Wraps the Neo4j bolt driver behind a small, parameterised surface:
//! - [`Neo4jStore::run`] for arbitrary parameterised Cypher
//! - read/write transactions with per-turn atomicity
//! - [`GraphClient`] domain operations (fetch, filter, related, vector
//!   index queries) used by the retrieval pipeline
//! - schema bootstrap (constraints, property indexes, vector indexes)
//!
//! All integer-typed parameters are coerced to the store's native 64-bit
//! integers before dispatch; vector parameters are sent as float lists.

pub mod client;
pub mod params;
pub mod schema;
pub mod store;

pub use client::{FieldFilter, FilterOp, GraphClient, RelatedByFilter, VectorQueryOptions};
pub use params::{coerce_int, ParamValue, Params};
pub use schema::SchemaManager;
pub use store::{GraphStoreConfig, Neo4jStore, Transaction};

use thiserror::Error;

/// Graph store errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Connection lost or never established
    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected the query text
    #[error("Malformed query: {0}")]
    QueryMalformed(String),

    /// A vector index named in a query does not exist
    #[error("Vector index missing: {0}")]
    IndexMissing(String),

    /// A row came back in a shape we could not decode
    #[error("Row decode failed: {0}")]
    Decode(String),
}

impl GraphError {
    /// Classify a driver error. The bolt driver does not expose server
    /// error codes as variants, so classification inspects the rendered
    /// message: syntax complaints map to [`GraphError::QueryMalformed`],
    /// unknown-index complaints to [`GraphError::IndexMissing`], and
    /// everything else is treated as the store being unreachable.
    pub fn from_driver(err: neo4rs::Error) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("syntaxerror") || lower.contains("invalid input") {
            GraphError::QueryMalformed(message)
        } else if lower.contains("no such") && lower.contains("index")
            || lower.contains("index does not exist")
            || lower.contains("procedurenotfound")
        {
            GraphError::IndexMissing(message)
        } else {
            GraphError::StoreUnavailable(message)
        }
    }

    /// Whether the error should abort the current operation outright.
    pub fn is_fatal(&self) -> bool {
        // Every graph error kind is fatal for the operation that hit it;
        // callers decide whether the surrounding pipeline continues.
        true
    }
}

impl From<GraphError> for ragforge_core::Error {
    fn from(err: GraphError) -> Self {
        ragforge_core::Error::Graph(err.to_string())
    }
}
