//! Conversation memory
//!
//! Persists conversations, turns and the hierarchical summary forest, and
//! builds the dual context (recent turns + RAG over summaries) handed to
//! the research agent.
//!
//! - Turns are append-only; archived conversations are read-only.
//! - Level-1 summaries cover contiguous character ranges of turns;
//!   level-(L+1) summaries cover contiguous ranges of level-L summaries.
//! - Summarisation runs asynchronously and never blocks turn ingestion; a
//!   failed attempt is retried at the next threshold crossing.

pub mod context;
pub mod conversation;
pub mod export;
pub mod store;
pub mod summarize;

pub use context::{ContextBuilder, ContextQuery, DualContext};
pub use conversation::{
    Conversation, ConversationStatus, StoredMessage, Summary, ToolCallRecord, Turn,
};
pub use export::{ConversationExport, ConversationExporter, ExportFormat};
pub use store::{ConversationStore, GraphConversationStore, InMemoryConversationStore, SummaryFilter};
pub use summarize::{HierarchicalSummarizer, SummarizerConfig};

use thiserror::Error;

/// Memory errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Conversation is archived and read-only: {0}")]
    ConversationReadOnly(String),

    #[error("Summary promotion failed: {0}")]
    SummaryPromotionFailed(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Llm(#[from] ragforge_llm::LlmError),
}

impl From<ragforge_graph::GraphError> for MemoryError {
    fn from(err: ragforge_graph::GraphError) -> Self {
        MemoryError::Store(err.to_string())
    }
}

impl From<MemoryError> for ragforge_core::Error {
    fn from(err: MemoryError) -> Self {
        ragforge_core::Error::Memory(err.to_string())
    }
}
