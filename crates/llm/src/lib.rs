//! LLM integration
//!
//! Features:
//! - Completion backends behind [`CompletionBackend`] (OpenAI-compatible
//!   chat API; works against hosted endpoints and local servers)
//! - Embedding providers behind [`EmbeddingProvider`] with batch support,
//!   dimension checking and an in-process cache
//! - Per-provider rate-limit discipline (reactive rolling window with
//!   micro-retry, opt-in proactive sliding-window limiter)
//! - A structured executor that renders schema-driven prompts, parses
//!   XML/JSON output and runs bounded tool-call loops

pub mod backend;
pub mod embeddings;
pub mod provider;
pub mod rate_limit;
pub mod schema;
pub mod structured;

pub use backend::{CompletionBackend, CompletionConfig, OpenAiBackend};
pub use embeddings::{
    CachedEmbedder, EmbeddingApiStyle, EmbeddingConfig, EmbeddingProvider, HttpEmbeddingProvider,
};
pub use provider::CompletionProvider;
pub use rate_limit::{is_rate_limit_message, RateLimitStrategy, RateLimiter};
pub use schema::{OutputFormat, OutputSchema, SchemaField, SchemaNode};
pub use structured::{
    IterationRecord, StructuredExecutor, StructuredOutcome, StructuredRequest, ToolDispatcher,
};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    /// Provider signalled a rate limit; retriable with the window strategy
    #[error("Rate limited by {provider} (next delay {delay_ms} ms, {remaining_attempts} attempts left)")]
    GenRateLimited {
        provider: String,
        delay_ms: u64,
        remaining_attempts: u32,
    },

    /// Request exceeded the provider timeout; retriable up to the cap
    #[error("Completion timed out on {provider} ({remaining_attempts} attempts left)")]
    GenTimeout {
        provider: String,
        remaining_attempts: u32,
    },

    /// Provider refused the prompt; fatal
    #[error("Generation blocked by provider safety filters: {0}")]
    GenSafetyBlocked(String),

    /// Provider unreachable after retries; fatal
    #[error("Completion provider down: {0}")]
    GenProviderDown(String),

    /// Output failed to parse against the schema after the repair retry
    #[error("Malformed model output: {0}")]
    GenOutputMalformed(String),

    /// Embedding provider signalled a rate limit; retriable with backoff
    #[error("Embedding rate limited ({remaining_attempts} attempts left)")]
    EmbedRateLimited { remaining_attempts: u32 },

    /// Embedding provider unreachable; fatal
    #[error("Embedding provider down: {0}")]
    EmbedProviderDown(String),

    /// Input too large for the embedding model; fatal
    #[error("Embedding input too large: {0}")]
    EmbedInputTooLarge(String),

    /// Returned vector did not match the index dimension; fatal
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbedDimensionMismatch { expected: usize, actual: usize },

    /// The executor was asked for zero iterations or ran out of them
    #[error("Iteration budget exhausted after {0} iterations")]
    IterationsExhausted(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Whether the provider wrapper may retry this error.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::GenRateLimited { .. }
                | LlmError::GenTimeout { .. }
                | LlmError::EmbedRateLimited { .. }
        )
    }
}

impl From<LlmError> for ragforge_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::EmbedRateLimited { .. }
            | LlmError::EmbedProviderDown(_)
            | LlmError::EmbedInputTooLarge(_)
            | LlmError::EmbedDimensionMismatch { .. } => {
                ragforge_core::Error::Embedding(err.to_string())
            }
            other => ragforge_core::Error::Llm(other.to_string()),
        }
    }
}
