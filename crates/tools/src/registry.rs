//! Tool registry
//!
//! Manages tool registration, argument validation and dispatch. The
//! registry implements the executor-side [`ToolDispatcher`] so the
//! structured executor can drive it directly.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ragforge_core::{ToolCall, ToolDefinition, ToolResult};
use ragforge_llm::ToolDispatcher;

use crate::logging::ToolCallLogger;
use crate::ToolError;

/// A registered tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-schema subset: `{"type": "object", "properties": {...},
    /// "required": [...]}` where each property has `type`, `description`
    /// and optionally `enum` / `default`.
    fn input_schema(&self) -> Value;

    /// Execute with validated arguments.
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;

    /// Tools that persist their own call logs opt out of the central
    /// logger here so no call is logged twice.
    fn has_custom_logger(&self) -> bool {
        false
    }
}

/// Validate arguments against the schema subset and fill in defaults.
pub fn validate_args(schema: &Value, args: &Value) -> Result<Value, ToolError> {
    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let incoming = match args {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return Err(ToolError::ArgsInvalid("arguments must be an object".to_string())),
    };

    let mut validated = Map::new();
    for (name, property) in &properties {
        let value = match incoming.get(name) {
            Some(value) => value.clone(),
            None => match property.get("default") {
                Some(default) => default.clone(),
                None => {
                    if required.contains(&name.as_str()) {
                        return Err(ToolError::ArgsInvalid(format!(
                            "missing required argument `{}`",
                            name
                        )));
                    }
                    continue;
                }
            },
        };

        if let Some(expected) = property.get("type").and_then(|t| t.as_str()) {
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(ToolError::ArgsInvalid(format!(
                    "argument `{}` must be a {}",
                    name, expected
                )));
            }
        }

        if let Some(allowed) = property.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(&value) {
                return Err(ToolError::ArgsInvalid(format!(
                    "argument `{}` must be one of {}",
                    name,
                    Value::Array(allowed.clone())
                )));
            }
        }

        validated.insert(name.clone(), value);
    }

    Ok(Value::Object(validated))
}

/// The tool registry.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    logger: Option<Arc<ToolCallLogger>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            logger: None,
        }
    }

    /// Enable central call logging.
    pub fn with_logger(mut self, logger: Arc<ToolCallLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn register_boxed(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of tools that persist their own logs.
    pub fn custom_logger_tools(&self) -> Vec<String> {
        self.tools
            .values()
            .filter(|t| t.has_custom_logger())
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Snapshot of every tool's schema, for prompts.
    pub fn snapshot(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Execute one call, capturing failure as an unsuccessful result.
    pub async fn execute(&self, call: &ToolCall, iteration: usize) -> ToolResult {
        let start = Instant::now();
        let args = Value::Object(call.arguments.clone().into_iter().collect());

        let outcome = match self.tools.get(&call.name) {
            None => Err(ToolError::Unknown(call.name.clone())),
            Some(tool) => match validate_args(&tool.input_schema(), &args) {
                Err(err) => Err(err),
                Ok(validated) => tool.execute(validated).await,
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        if let Some(logger) = &self.logger {
            let skip = self
                .tools
                .get(&call.name)
                .map(|t| t.has_custom_logger())
                .unwrap_or(false);
            if !skip {
                logger.log_call(&call.name, &args, &outcome, duration_ms).await;
            }
        }

        match outcome {
            Ok(output) => {
                tracing::debug!(tool = %call.name, duration_ms, "Tool call succeeded");
                ToolResult::ok(call.name.clone(), output, duration_ms, iteration)
            }
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "Tool call failed");
                ToolResult::failed(call.name.clone(), err.to_string(), duration_ms, iteration)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn catalog(&self) -> Vec<ToolDefinition> {
        self.snapshot()
    }

    async fn dispatch(&self, call: &ToolCall, iteration: usize) -> ToolResult {
        self.execute(call, iteration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the message back"
        }

        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "what to echo"},
                    "upper": {"type": "boolean", "description": "uppercase it", "default": false},
                    "mode": {"type": "string", "description": "echo mode", "enum": ["plain", "loud"], "default": "plain"}
                },
                "required": ["message"]
            })
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            let message = args["message"].as_str().unwrap_or_default();
            let upper = args["upper"].as_bool().unwrap_or(false);
            let out = if upper {
                message.to_uppercase()
            } else {
                message.to_string()
            };
            Ok(json!({"echo": out}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "boom"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::failed("boom", "kaput"))
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "t1".to_string(),
            name: name.to_string(),
            arguments: args
                .as_object()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn test_validate_defaults_and_enum() {
        let schema = EchoTool.input_schema();

        let validated = validate_args(&schema, &json!({"message": "hi"})).unwrap();
        assert_eq!(validated["upper"], json!(false));
        assert_eq!(validated["mode"], json!("plain"));

        let err = validate_args(&schema, &json!({"message": "hi", "mode": "silent"})).unwrap_err();
        assert!(matches!(err, ToolError::ArgsInvalid(_)));

        let err = validate_args(&schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("message"));

        let err = validate_args(&schema, &json!({"message": 5})).unwrap_err();
        assert!(err.to_string().contains("string"));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .execute(&call("echo", json!({"message": "hi", "upper": true})), 2)
            .await;
        assert!(result.success);
        assert_eq!(result.output["echo"], "HI");
        assert_eq!(result.iteration, 2);
    }

    #[tokio::test]
    async fn test_failures_are_captured_not_raised() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);

        let result = registry.execute(&call("boom", json!({})), 0).await;
        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().contains("kaput"));

        let result = registry.execute(&call("missing", json!({})), 0).await;
        assert!(!result.success);
        assert!(result.error.as_ref().unwrap().contains("Unknown tool"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(FailingTool);
        registry.register(EchoTool);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "boom");
        assert_eq!(snapshot[1].name, "echo");
    }
}
