//! Retrieval pipeline and post-processing
//!
//! Features:
//! - Composable query pipeline: fetch, semantic, expand, filter,
//!   client-filter and LLM-rerank operations over a working result set,
//!   with adjacent-operation merging and score tracking
//! - Keyword boosting (exact substring + tokenised Levenshtein)
//! - Bounded breadth-first relationship exploration
//! - LLM reranking with weighted score merging
//! - LLM summarization of result sets
//!
//! Operations execute strictly in order; failures tag the operation but
//! only fatal causes (store down, provider down) abort the pipeline.

pub mod boost;
pub mod explore;
pub mod pipeline;
pub mod post;
pub mod rerank;
pub mod summarize;

pub use boost::{apply_keyword_boost, KeywordBoostConfig};
pub use explore::{ExploreConfig, ExplorationGraph, ExploredNode, GraphExplorer};
pub use pipeline::{
    ExpandSpec, FetchSource, FetchSpec, FilterSpec, NormalizedPlan, Operation, OperationKind,
    Pipeline, PipelineExecutor, PipelineOutput, QueryBuilder, SemanticSpec,
};
pub use post::{PostProcessConfig, PostProcessed, PostProcessor};
pub use rerank::{LlmReranker, RerankConfig};
pub use summarize::{ResultSummarizer, ResultSummary, Snippet, Suggestion, SuggestionKind};

use thiserror::Error;

/// A non-fatal operation failure, attached to the pipeline output.
#[derive(Debug, Clone)]
pub struct OperationFailure {
    /// Index of the failing operation in the normalised plan
    pub index: usize,
    pub kind: pipeline::OperationKind,
    pub cause: String,
}

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A fatal cause aborted the pipeline at the given operation
    #[error("Pipeline operation {index} ({kind:?}) failed: {cause}")]
    PipelineOperationFailed {
        index: usize,
        kind: pipeline::OperationKind,
        cause: String,
    },

    #[error(transparent)]
    Graph(#[from] ragforge_graph::GraphError),

    #[error(transparent)]
    Llm(#[from] ragforge_llm::LlmError),
}

impl From<RetrievalError> for ragforge_core::Error {
    fn from(err: RetrievalError) -> Self {
        ragforge_core::Error::Retrieval(err.to_string())
    }
}

/// Whether an underlying cause must abort the whole pipeline.
pub(crate) fn is_fatal_cause(err: &RetrievalError) -> bool {
    match err {
        // Store failures are always fatal.
        RetrievalError::Graph(_) => true,
        RetrievalError::Llm(e) => matches!(
            e,
            ragforge_llm::LlmError::GenProviderDown(_)
                | ragforge_llm::LlmError::EmbedProviderDown(_)
        ),
        RetrievalError::PipelineOperationFailed { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        let fatal = RetrievalError::Llm(ragforge_llm::LlmError::GenProviderDown("x".into()));
        assert!(is_fatal_cause(&fatal));

        let non_fatal =
            RetrievalError::Llm(ragforge_llm::LlmError::GenOutputMalformed("x".into()));
        assert!(!is_fatal_cause(&non_fatal));

        let store = RetrievalError::Graph(ragforge_graph::GraphError::StoreUnavailable(
            "gone".into(),
        ));
        assert!(is_fatal_cause(&store));
    }
}
