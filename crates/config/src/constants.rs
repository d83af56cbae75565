//! Centralized constants
//!
//! Single source of truth for retrieval, memory and rate-limit defaults.
//! Values here are engine tuning, not project data; anything describing a
//! concrete knowledge base (entity types, index names, dimensions) belongs
//! in the YAML config document.

/// Retrieval and post-processing defaults
pub mod retrieval {
    /// Weight added per matched keyword, scaled by similarity
    pub const BOOST_WEIGHT: f32 = 0.15;

    /// Minimum Levenshtein similarity for a keyword boost to apply
    pub const MIN_SIMILARITY: f32 = 0.6;

    /// Tokens shorter than this are ignored during keyword matching
    pub const MIN_TOKEN_LEN: usize = 3;

    /// LLM rerank batch size
    pub const RERANK_BATCH_SIZE: usize = 100;

    /// Maximum concurrent rerank batches
    pub const RERANK_PARALLEL: usize = 5;

    /// Default weighted-merge weights (vector, llm)
    pub const RERANK_WEIGHTS: (f32, f32) = (0.3, 0.7);

    /// Maximum seeds used for relationship exploration
    pub const MAX_TO_EXPLORE: usize = 10;

    /// Per-direction edge cap during exploration
    pub const MAX_RELATIONSHIPS_PER_NODE: usize = 15;

    /// Exploration depth bounds; requested depth is clamped into this range
    pub const MIN_DEPTH: usize = 1;
    pub const MAX_DEPTH: usize = 3;

    /// Summarized snippet content cap, in lines
    pub const SNIPPET_MAX_LINES: usize = 30;
}

/// Conversation memory defaults
pub mod memory {
    /// Characters of new turns that trigger a level-1 summary
    pub const SUMMARIZE_EVERY_N_CHARS: usize = 10_000;

    /// Turn count that triggers a level-1 summary
    pub const MAX_TURNS_BEFORE_SUMMARIZE: usize = 5;

    /// Highest summary level that promotion may create
    pub const SUMMARY_LEVELS: usize = 3;

    /// Character volume of same-level summaries that triggers promotion
    pub const MAX_CHARS_BEFORE_SUMMARIZE_SUMMARIES: usize = 10_000;

    /// Recent-context window limits
    pub const RECENT_CONTEXT_MAX_CHARS: usize = 5_000;
    pub const RECENT_CONTEXT_MAX_TURNS: usize = 10;

    /// RAG-on-summaries limits
    pub const RAG_MAX_SUMMARIES: usize = 5;
    pub const RAG_MIN_SCORE: f32 = 0.7;

    /// Per-level score boost for summary retrieval
    pub const LEVEL_BOOSTS: [(usize, f32); 3] = [(1, 1.0), (2, 1.1), (3, 1.2)];

    /// Recency decay half-life parameter, in days
    pub const DECAY_DAYS: f64 = 7.0;
}

/// Completion provider rate-limit discipline
pub mod rate_limit {
    use std::time::Duration;

    /// Total attempts per logical request
    pub const RETRY_ATTEMPTS: u32 = 3;

    /// Rolling window observed for the reactive strategy
    pub const WINDOW: Duration = Duration::from_secs(60);

    /// Safety buffer added after the oldest in-window request expires
    pub const SAFETY_BUFFER: Duration = Duration::from_secs(2);

    /// Micro-retry prune horizon
    pub const PRUNE_HORIZON: Duration = Duration::from_secs(58);

    /// Micro-retry backoff step and cap
    pub const MICRO_RETRY_STEP: Duration = Duration::from_secs(5);
    pub const MICRO_RETRY_MAX: Duration = Duration::from_secs(15);

    /// Timestamps older than this are dropped on success
    pub const SUCCESS_DROP_HORIZON: Duration = Duration::from_secs(30);

    /// Pre-request jitter bounds
    pub const JITTER_MIN_MS: u64 = 1_000;
    pub const JITTER_MAX_MS: u64 = 2_000;

    /// Substrings that identify a rate-limit response
    pub const RATE_LIMIT_MARKERS: [&str; 4] = ["429", "quota", "rate limit", "resource exhausted"];
}

/// Agent loop defaults
pub mod agent {
    /// Default iteration cap for the tool loop
    pub const MAX_ITERATIONS: usize = 10;
}

/// Tool logging defaults
pub mod tool_logs {
    /// Strings longer than this are truncated before persisting
    pub const MAX_STRING_LEN: usize = 5_000;

    /// Arrays longer than this are truncated before persisting
    pub const MAX_ARRAY_LEN: usize = 100;

    /// result.json larger than this is replaced with a preview stub
    pub const MAX_RESULT_BYTES: usize = 100 * 1024;
}
