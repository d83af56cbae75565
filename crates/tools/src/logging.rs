//! Tool call logging
//!
//! When enabled, every tool call persists three files under
//! `<home>/.ragforge/logs/tools/<tool>/<timestamp>/`: `args.json`,
//! `result.json` and `metadata.json`. Values are sanitised first: keys
//! that look like secrets are redacted, long strings and arrays are
//! truncated. Oversized results are replaced with a preview stub.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use ragforge_config::constants::tool_logs as limits;

use crate::ToolError;

static SECRET_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|api[_-]?key|token|secret|auth|credential|private)")
        .expect("valid secret-key pattern")
});

/// Where a call originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Mcp,
    Agent,
    Internal,
}

/// Redact secret-looking keys and truncate oversized strings/arrays,
/// recursively. Applied before anything touches disk.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if SECRET_KEY.is_match(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), sanitize(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => {
            let truncated: Vec<Value> = items
                .iter()
                .take(limits::MAX_ARRAY_LEN)
                .map(sanitize)
                .collect();
            if items.len() > limits::MAX_ARRAY_LEN {
                let mut with_marker = truncated;
                with_marker.push(Value::String(format!(
                    "[... {} more items truncated]",
                    items.len() - limits::MAX_ARRAY_LEN
                )));
                Value::Array(with_marker)
            } else {
                Value::Array(truncated)
            }
        }
        Value::String(text) if text.len() > limits::MAX_STRING_LEN => {
            let cut: String = text.chars().take(limits::MAX_STRING_LEN).collect();
            Value::String(format!("{}... [truncated {} chars]", cut, text.len()))
        }
        other => other.clone(),
    }
}

/// Persists sanitised tool calls to disk.
pub struct ToolCallLogger {
    root: PathBuf,
    source: LogSource,
}

impl ToolCallLogger {
    /// Default location: `<home>/.ragforge/logs`.
    pub fn new(source: LogSource) -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ragforge")
            .join("logs");
        Self { root, source }
    }

    pub fn with_root(root: PathBuf, source: LogSource) -> Self {
        Self { root, source }
    }

    /// Build a logger only when the `RAGFORGE_TOOL_LOGS` flag is set.
    pub fn from_env(layer: &ragforge_config::EnvLayer, source: LogSource) -> Option<Self> {
        layer.flag("RAGFORGE_TOOL_LOGS").then(|| Self::new(source))
    }

    /// Persist one call. Logging never fails the call itself; IO errors
    /// are traced and swallowed.
    pub async fn log_call(
        &self,
        tool_name: &str,
        args: &Value,
        outcome: &Result<Value, ToolError>,
        duration_ms: u64,
    ) {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let dir = self.root.join("tools").join(tool_name).join(&timestamp);
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(error = %err, "Failed to create tool log directory");
            return;
        }

        let args_json = sanitize(args);
        Self::write_json(&dir.join("args.json"), &args_json).await;

        let result_json = match outcome {
            Ok(output) => Self::bounded_result(&sanitize(output)),
            Err(err) => json!({"success": false, "error": err.to_string()}),
        };
        Self::write_json(&dir.join("result.json"), &result_json).await;

        let metadata = json!({
            "toolName": tool_name,
            "timestamp": timestamp,
            "duration": duration_ms,
            "success": outcome.is_ok(),
            "error": outcome.as_ref().err().map(|e| e.to_string()),
            "source": self.source,
        });
        Self::write_json(&dir.join("metadata.json"), &metadata).await;
    }

    /// Oversized results are replaced by a stub with a preview.
    fn bounded_result(value: &Value) -> Value {
        let serialized = value.to_string();
        if serialized.len() <= limits::MAX_RESULT_BYTES {
            return value.clone();
        }
        let preview: String = serialized.chars().take(1024).collect();
        json!({
            "_truncated": true,
            "_originalSize": serialized.len(),
            "_preview": preview,
        })
    }

    async fn write_json(path: &std::path::Path, value: &Value) {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
        if let Err(err) = tokio::fs::write(path, text).await {
            tracing::warn!(path = %path.display(), error = %err, "Failed to write tool log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_redacts_secret_keys() {
        let value = json!({
            "query": "find auth code",
            "api_key": "sk-1234",
            "Password": "hunter2",
            "nested": {"access_token": "abc", "path": "src/lib.rs"}
        });
        let clean = sanitize(&value);

        assert_eq!(clean["api_key"], "[REDACTED]");
        assert_eq!(clean["Password"], "[REDACTED]");
        assert_eq!(clean["nested"]["access_token"], "[REDACTED]");
        assert_eq!(clean["nested"]["path"], "src/lib.rs");
        assert_eq!(clean["query"], "find auth code");
    }

    #[test]
    fn test_sanitize_truncates_long_strings_and_arrays() {
        let long = "x".repeat(6000);
        let many: Vec<Value> = (0..150).map(|i| json!(i)).collect();
        let value = json!({"text": long, "items": many});

        let clean = sanitize(&value);
        let text = clean["text"].as_str().unwrap();
        assert!(text.contains("[truncated 6000 chars]"));

        let items = clean["items"].as_array().unwrap();
        // 100 items plus the truncation marker.
        assert_eq!(items.len(), 101);
        assert!(items[100].as_str().unwrap().contains("50 more items"));
    }

    #[test]
    fn test_bounded_result_stub() {
        let big = json!({"data": "y".repeat(200 * 1024)});
        let stub = ToolCallLogger::bounded_result(&big);
        assert_eq!(stub["_truncated"], true);
        assert!(stub["_originalSize"].as_u64().unwrap() > 100 * 1024);
        assert!(stub["_preview"].as_str().unwrap().len() <= 1024);
    }

    #[tokio::test]
    async fn test_log_call_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ToolCallLogger::with_root(dir.path().to_path_buf(), LogSource::Agent);

        logger
            .log_call(
                "search",
                &json!({"query": "x", "token": "secret"}),
                &Ok(json!({"hits": 3})),
                12,
            )
            .await;

        let tool_dir = dir.path().join("tools").join("search");
        let call_dirs: Vec<_> = std::fs::read_dir(&tool_dir).unwrap().collect();
        assert_eq!(call_dirs.len(), 1);

        let call_dir = call_dirs[0].as_ref().unwrap().path();
        let args: Value =
            serde_json::from_str(&std::fs::read_to_string(call_dir.join("args.json")).unwrap())
                .unwrap();
        assert_eq!(args["token"], "[REDACTED]");

        let metadata: Value = serde_json::from_str(
            &std::fs::read_to_string(call_dir.join("metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["toolName"], "search");
        assert_eq!(metadata["success"], true);
        assert_eq!(metadata["source"], "agent");
    }
}
