//! Tool registry and execution
//!
//! Tools expose a uniform schema (a JSON-schema subset) and an async
//! handler. The registry validates arguments before dispatch, wraps calls
//! in the sanitising logger (unless a tool logs its own calls), and
//! captures failures as unsuccessful results so the agent loop never
//! aborts on a failing tool.

pub mod builtin;
pub mod logging;
pub mod registry;

pub use builtin::{ListDirTool, ListRelatedTool, ProjectOverviewTool, ReadFileTool, SearchEntitiesTool};
pub use logging::{sanitize, LogSource, ToolCallLogger};
pub use registry::{validate_args, Tool, ToolRegistry};

use thiserror::Error;

/// Tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Invalid arguments: {0}")]
    ArgsInvalid(String),

    #[error("Tool {name} failed: {cause}")]
    Failed { name: String, cause: String },
}

impl ToolError {
    pub fn failed(name: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        ToolError::Failed {
            name: name.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<ToolError> for ragforge_core::Error {
    fn from(err: ToolError) -> Self {
        ragforge_core::Error::Tool(err.to_string())
    }
}
