//! Top-level error type
//!
//! Each subsystem crate defines its own `thiserror` enum and converts into
//! this aggregate at the crate boundary. User-visible messages carry the
//! kind and the offending operation or provider; stack traces never cross
//! the public surface.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Graph store error: {0}")]
    Graph(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Ingestion error: {0}")]
    Ingest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = Error::Graph("connection refused".to_string());
        assert_eq!(err.to_string(), "Graph store error: connection refused");
    }
}
