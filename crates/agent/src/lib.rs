//! Research agent
//!
//! Drives the tool loop with conversational memory: dual context from the
//! conversation store, the tool registry through the structured executor,
//! a finalize-report discipline, and an optional stateful report editor
//! for iterative report writing.

pub mod report;
pub mod research;

pub use report::{Confidence, ReportEditor};
pub use research::{AgentAnswer, AgentConfig, FinalizeReportTool, ResearchAgent};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent iteration budget exhausted after {iterations} iterations")]
    IterationExhausted { iterations: usize },

    #[error(transparent)]
    Llm(#[from] ragforge_llm::LlmError),

    #[error(transparent)]
    Memory(#[from] ragforge_memory::MemoryError),
}

impl From<AgentError> for ragforge_core::Error {
    fn from(err: AgentError) -> Self {
        ragforge_core::Error::Agent(err.to_string())
    }
}
