//! LLM message and tool-call types
//!
//! Shared between the completion backends, the structured executor, the
//! tool registry and the research agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Schema for one tool exposed to the model.
///
/// `parameters` is a JSON-schema subset: an object of properties with
/// `type`, `description`, optional `enum`/`default`, plus a `required`
/// array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, unique within one response
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: HashMap<String, Value>,
}

/// A tool execution outcome, fed back to the model on the next iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    /// Tool output when `success`, otherwise `Value::Null`
    #[serde(default)]
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock execution time
    pub duration_ms: u64,
    /// Which loop iteration produced this result
    pub iteration: usize,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, output: Value, duration_ms: u64, iteration: usize) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output,
            error: None,
            duration_ms,
            iteration,
        }
    }

    pub fn failed(
        tool_name: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
        iteration: usize,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms,
            iteration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_tool_result_serde_skips_error_when_ok() {
        let result = ToolResult::ok("search", json!({"hits": 3}), 12, 0);
        let text = serde_json::to_string(&result).unwrap();
        assert!(!text.contains("error"));
        assert!(text.contains("\"success\":true"));
    }

    #[test]
    fn test_tool_call_parses_without_arguments() {
        let call: ToolCall =
            serde_json::from_str(r#"{"id": "t1", "name": "list_files"}"#).unwrap();
        assert!(call.arguments.is_empty());
    }
}
