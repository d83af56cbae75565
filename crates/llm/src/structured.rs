//! Structured executor
//!
//! Wraps a completion provider to enforce structured outputs: renders a
//! prompt from a schema, parses the reply, retries once with a repair
//! prompt on malformed output, and runs bounded tool-call loops with
//! parallel per-iteration batches.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use ragforge_core::{ToolCall, ToolDefinition, ToolResult};

use crate::provider::CompletionProvider;
use crate::schema::{extract_json, OutputFormat, OutputSchema};
use crate::LlmError;

/// Dispatches tool calls on behalf of the executor. Implemented by the
/// tool registry; iterations pass their index through so results carry it.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Schemas of every available tool, rendered into the prompt.
    fn catalog(&self) -> Vec<ToolDefinition>;

    /// Execute one call. Failures come back as unsuccessful results, never
    /// as errors; the loop is not aborted by a failing tool.
    async fn dispatch(&self, call: &ToolCall, iteration: usize) -> ToolResult;
}

/// One structured execution request.
#[derive(Clone)]
pub struct StructuredRequest {
    /// Named input values
    pub input: HashMap<String, String>,
    /// Render order for `input`; names absent from `input` are skipped
    pub input_fields: Vec<String>,
    pub system_prompt: String,
    pub user_task: String,
    pub output_schema: OutputSchema,
    pub output_format: OutputFormat,
    pub tools: Option<Arc<dyn ToolDispatcher>>,
    /// Iteration cap; zero means "do not call the model"
    pub max_iterations: usize,
    /// A tool whose invocation ends the loop
    pub finalize_tool: Option<String>,
    /// When set, a closing call renders the transcript into this schema
    pub final_response: Option<OutputSchema>,
    /// Request-id prefix for deterministic logging
    pub request_id: String,
}

impl StructuredRequest {
    pub fn new(user_task: impl Into<String>, output_schema: OutputSchema) -> Self {
        Self {
            input: HashMap::new(),
            input_fields: Vec::new(),
            system_prompt: String::new(),
            user_task: user_task.into(),
            output_schema,
            output_format: OutputFormat::Json,
            tools: None,
            max_iterations: 1,
            finalize_tool: None,
            final_response: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.input_fields.push(name.clone());
        self.input.insert(name, value.into());
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolDispatcher>, max_iterations: usize) -> Self {
        self.tools = Some(tools);
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_finalize_tool(mut self, name: impl Into<String>) -> Self {
        self.finalize_tool = Some(name.into());
        self
    }
}

/// Everything that happened in one loop iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub iteration: usize,
    pub prompt: String,
    pub raw_response: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

/// The executor's result.
#[derive(Debug, Clone)]
pub struct StructuredOutcome {
    /// Conformed output value; the last partial value when `incomplete`
    pub value: Value,
    /// True when the iteration cap ended the loop before a final answer
    pub incomplete: bool,
    pub iterations: usize,
    pub transcript: Vec<IterationRecord>,
}

impl StructuredOutcome {
    /// All tool results across iterations, in execution order.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.transcript.iter().flat_map(|r| r.tool_results.iter())
    }
}

/// The structured executor.
#[derive(Clone)]
pub struct StructuredExecutor {
    provider: CompletionProvider,
}

impl StructuredExecutor {
    pub fn new(provider: CompletionProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &CompletionProvider {
        &self.provider
    }

    /// Run the request to completion or the iteration cap.
    pub async fn execute(&self, request: &StructuredRequest) -> Result<StructuredOutcome, LlmError> {
        if request.max_iterations == 0 {
            return Err(LlmError::IterationsExhausted(0));
        }

        let catalog = request
            .tools
            .as_ref()
            .map(|t| t.catalog())
            .unwrap_or_default();
        let known_tools: Vec<&str> = catalog.iter().map(|t| t.name.as_str()).collect();

        let mut transcript: Vec<IterationRecord> = Vec::new();
        let mut context_blocks: Vec<String> = Vec::new();
        let mut last_value = Value::Null;
        let mut finalized = false;

        for iteration in 0..request.max_iterations {
            let prompt = self.render_prompt(request, &catalog, &context_blocks);
            let request_id = format!("{}-i{}", request.request_id, iteration);
            let raw = self.provider.generate(&prompt, &request_id).await?;

            let (value, calls) = self
                .parse_response(request, &prompt, &raw, &request_id)
                .await?;
            if !value.is_null() {
                last_value = value.clone();
            }

            // Drop unknown and malformed calls before dispatch.
            let valid_calls: Vec<ToolCall> = calls
                .into_iter()
                .filter(|call| {
                    if call.name.is_empty() {
                        tracing::warn!(%request_id, "Dropping tool call without a name");
                        return false;
                    }
                    if !known_tools.contains(&call.name.as_str()) {
                        tracing::warn!(%request_id, tool = %call.name, "Dropping unknown tool call");
                        return false;
                    }
                    true
                })
                .collect();

            if valid_calls.is_empty() && value.is_null() {
                // Every call was dropped and no final fields parsed; nudge
                // the model and spend an iteration rather than returning an
                // empty answer as complete.
                context_blocks.push(
                    "## Note\nYour previous tool calls were unknown or malformed. \
                     Use only the listed tools, or produce the final output."
                        .to_string(),
                );
                transcript.push(IterationRecord {
                    iteration,
                    prompt,
                    raw_response: raw,
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                });
                continue;
            }

            if valid_calls.is_empty() {
                // Stop condition (a): no tool calls and the required fields
                // parsed. parse_response already enforced the schema.
                transcript.push(IterationRecord {
                    iteration,
                    prompt,
                    raw_response: raw,
                    tool_calls: Vec::new(),
                    tool_results: Vec::new(),
                });
                let value = self.maybe_finalize(request, last_value, &transcript).await?;
                return Ok(StructuredOutcome {
                    value,
                    incomplete: false,
                    iterations: iteration + 1,
                    transcript,
                });
            }

            let dispatcher = request
                .tools
                .as_ref()
                .expect("valid tool calls require a dispatcher");

            // The whole batch runs in parallel; results come back in the
            // order the calls were requested.
            let results: Vec<ToolResult> = join_all(
                valid_calls
                    .iter()
                    .map(|call| dispatcher.dispatch(call, iteration)),
            )
            .await;

            // A finalize tool ends the loop unless it vetoes with
            // `{"accepted": false}` (e.g. confidence too low) or failed.
            finalized = request.finalize_tool.as_deref().is_some_and(|name| {
                valid_calls.iter().zip(&results).any(|(call, result)| {
                    call.name == name
                        && result.success
                        && result
                            .output
                            .get("accepted")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(true)
                })
            });

            context_blocks.push(Self::format_tool_block(iteration, &valid_calls, &results));
            transcript.push(IterationRecord {
                iteration,
                prompt,
                raw_response: raw,
                tool_calls: valid_calls,
                tool_results: results,
            });

            if finalized {
                break;
            }
        }

        let iterations = transcript.len();
        let incomplete = !finalized;
        if incomplete {
            tracing::debug!(
                request_id = %request.request_id,
                iterations,
                "Iteration cap reached; returning last partial output"
            );
        }
        let value = self.maybe_finalize(request, last_value, &transcript).await?;
        Ok(StructuredOutcome {
            value,
            incomplete,
            iterations,
            transcript,
        })
    }

    /// One more call that renders the collected answer and tool transcript
    /// into the `final_response` schema, when configured.
    async fn maybe_finalize(
        &self,
        request: &StructuredRequest,
        value: Value,
        transcript: &[IterationRecord],
    ) -> Result<Value, LlmError> {
        let Some(final_schema) = &request.final_response else {
            return Ok(value);
        };

        let mut prompt = String::new();
        if !request.system_prompt.is_empty() {
            prompt.push_str(&request.system_prompt);
            prompt.push_str("\n\n");
        }
        prompt.push_str("## Task\n");
        prompt.push_str(&request.user_task);
        prompt.push_str("\n\n## Collected answer\n");
        prompt.push_str(&value.to_string());
        prompt.push_str("\n\n## Tool transcript\n");
        for record in transcript {
            for result in &record.tool_results {
                prompt.push_str(&format!(
                    "- [{}] {} (success: {})\n",
                    record.iteration, result.tool_name, result.success
                ));
            }
        }
        prompt.push_str("\n\nProduce the final report.\n\n");
        prompt.push_str(&final_schema.render_instructions(request.output_format));

        let request_id = format!("{}-final", request.request_id);
        let raw = self.provider.generate(&prompt, &request_id).await?;
        match final_schema.parse(&raw, request.output_format) {
            Ok(parsed) => Ok(parsed),
            Err(err) => {
                let repaired = self
                    .repair(request, final_schema, &prompt, &raw, &err, &request_id)
                    .await?;
                Ok(repaired)
            }
        }
    }

    fn render_prompt(
        &self,
        request: &StructuredRequest,
        catalog: &[ToolDefinition],
        context_blocks: &[String],
    ) -> String {
        let mut prompt = String::new();

        if !request.system_prompt.is_empty() {
            prompt.push_str(&request.system_prompt);
            prompt.push_str("\n\n");
        }

        if !catalog.is_empty() {
            prompt.push_str("## Available tools\n");
            for tool in catalog {
                prompt.push_str(&format!(
                    "- {}: {}\n  parameters: {}\n",
                    tool.name, tool.description, tool.parameters
                ));
            }
            prompt.push_str(
                "\nTo call tools, include a `tool_calls` array in your reply: \
                 [{\"name\": \"tool\", \"arguments\": {...}}]. \
                 Results arrive in the next message. Reply without tool calls \
                 once you can produce the final output.\n\n",
            );
        }

        for name in &request.input_fields {
            if let Some(value) = request.input.get(name) {
                prompt.push_str(&format!("## {}\n{}\n\n", name, value));
            }
        }

        prompt.push_str("## Task\n");
        prompt.push_str(&request.user_task);
        prompt.push_str("\n\n");

        prompt.push_str(&request.output_schema.render_instructions(request.output_format));

        for block in context_blocks {
            prompt.push_str("\n\n");
            prompt.push_str(block);
        }

        prompt
    }

    fn format_tool_block(iteration: usize, calls: &[ToolCall], results: &[ToolResult]) -> String {
        let mut block = format!("## Tool results (iteration {})\n", iteration);
        for (call, result) in calls.iter().zip(results) {
            let payload = if result.success {
                result.output.to_string()
            } else {
                format!(
                    "{{\"success\": false, \"error\": {}}}",
                    serde_json::to_string(result.error.as_deref().unwrap_or("unknown"))
                        .unwrap_or_default()
                )
            };
            block.push_str(&format!("### {} -> {}\n", call.name, payload));
        }
        block
    }

    /// Parse one reply: tool calls come out first, then the remainder is
    /// conformed against the schema. A reply carrying only tool calls is
    /// valid mid-loop; a reply with neither tool calls nor the required
    /// fields gets one repair retry.
    async fn parse_response(
        &self,
        request: &StructuredRequest,
        prompt: &str,
        raw: &str,
        request_id: &str,
    ) -> Result<(Value, Vec<ToolCall>), LlmError> {
        let calls = Self::extract_tool_calls(raw, request.output_format);
        match request.output_schema.parse(raw, request.output_format) {
            Ok(value) => Ok((value, calls)),
            Err(_) if !calls.is_empty() => {
                // Tool-call-only replies do not need the final fields yet.
                Ok((Value::Null, calls))
            }
            Err(err) => {
                let value = self
                    .repair(
                        request,
                        &request.output_schema,
                        prompt,
                        raw,
                        &err,
                        request_id,
                    )
                    .await?;
                Ok((value, Vec::new()))
            }
        }
    }

    /// One retry with an explicit repair prompt, then surface
    /// [`LlmError::GenOutputMalformed`].
    async fn repair(
        &self,
        request: &StructuredRequest,
        schema: &OutputSchema,
        prompt: &str,
        raw: &str,
        parse_error: &str,
        request_id: &str,
    ) -> Result<Value, LlmError> {
        tracing::warn!(request_id, error = parse_error, "Malformed output; retrying with repair prompt");

        let repair_prompt = format!(
            "{}\n\nYour previous output was malformed and could not be parsed: \
             {}\n\nPrevious output:\n{}\n\nReply again, following the template exactly.",
            prompt, parse_error, raw
        );
        let repair_id = format!("{}-repair", request_id);
        let raw = self.provider.generate(&repair_prompt, &repair_id).await?;
        schema
            .parse(&raw, request.output_format)
            .map_err(LlmError::GenOutputMalformed)
    }

    /// Pull tool calls out of a reply without conforming the rest.
    fn extract_tool_calls(raw: &str, format: OutputFormat) -> Vec<ToolCall> {
        let parsed_calls: Vec<Value> = match format {
            OutputFormat::Json => extract_json(raw)
                .and_then(|text| serde_json::from_str::<Value>(&text).ok())
                .and_then(|v| v.get("tool_calls").cloned())
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default(),
            OutputFormat::Xml => {
                // <tool_calls><call><name>..</name><arguments>{json}</arguments></call></tool_calls>
                let mut out = Vec::new();
                if let Some(start) = raw.find("<tool_calls>") {
                    if let Some(end) = raw[start..].find("</tool_calls>") {
                        let body = &raw[start + "<tool_calls>".len()..start + end];
                        let mut rest = body;
                        while let Some(call_start) = rest.find("<call>") {
                            let Some(call_end) = rest[call_start..].find("</call>") else {
                                break;
                            };
                            let span = &rest[call_start + "<call>".len()..call_start + call_end];
                            let name = Self::tag_text(span, "name").unwrap_or_default();
                            let arguments = Self::tag_text(span, "arguments")
                                .and_then(|t| serde_json::from_str::<Value>(t.trim()).ok())
                                .unwrap_or(Value::Object(Default::default()));
                            out.push(serde_json::json!({"name": name, "arguments": arguments}));
                            rest = &rest[call_start + call_end + "</call>".len()..];
                        }
                    }
                }
                out
            }
        };

        parsed_calls
            .into_iter()
            .filter_map(|raw_call| {
                let name = raw_call.get("name")?.as_str()?.to_string();
                let arguments = match raw_call.get("arguments") {
                    Some(Value::Object(map)) => map.clone().into_iter().collect(),
                    _ => HashMap::new(),
                };
                let id = raw_call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                Some(ToolCall { id, name, arguments })
            })
            .collect()
    }

    fn tag_text<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        let start = text.find(&open)? + open.len();
        let end = text[start..].find(&close)? + start;
        Some(&text[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompletionBackend;
    use crate::schema::SchemaField;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Backend replaying scripted responses.
    struct ScriptedBackend {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(mut responses: Vec<&str>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn generate(&self, prompt: &str, _request_id: &str) -> Result<String, LlmError> {
            self.prompts.lock().push(prompt.to_string());
            self.responses
                .lock()
                .pop()
                .ok_or_else(|| LlmError::GenProviderDown("script exhausted".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTools;

    #[async_trait]
    impl ToolDispatcher for EchoTools {
        fn catalog(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "search".to_string(),
                description: "search things".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }]
        }

        async fn dispatch(&self, call: &ToolCall, iteration: usize) -> ToolResult {
            ToolResult::ok(call.name.clone(), json!({"echo": true}), 1, iteration)
        }
    }

    fn executor(backend: Arc<ScriptedBackend>) -> StructuredExecutor {
        StructuredExecutor::new(CompletionProvider::new(backend))
    }

    fn answer_request() -> StructuredRequest {
        StructuredRequest::new(
            "Answer the question",
            OutputSchema::new(vec![SchemaField::string("answer", "the answer", true)]),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_answer_single_iteration() {
        let backend = ScriptedBackend::new(vec![r#"{"answer": "42"}"#]);
        let outcome = executor(backend).execute(&answer_request()).await.unwrap();

        assert!(!outcome.incomplete);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.value["answer"], "42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_iterations_is_structured_failure() {
        let backend = ScriptedBackend::new(vec![]);
        let mut request = answer_request();
        request.max_iterations = 0;

        let result = executor(backend).execute(&request).await;
        assert!(matches!(result, Err(LlmError::IterationsExhausted(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_retry_on_malformed_output() {
        let backend = ScriptedBackend::new(vec!["not json at all", r#"{"answer": "fixed"}"#]);
        let outcome = executor(backend.clone())
            .execute(&answer_request())
            .await
            .unwrap();

        assert_eq!(outcome.value["answer"], "fixed");
        let prompts = backend.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("previous output was malformed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_twice_surfaces_error() {
        let backend = ScriptedBackend::new(vec!["garbage", "more garbage"]);
        let result = executor(backend).execute(&answer_request()).await;
        assert!(matches!(result, Err(LlmError::GenOutputMalformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_loop_iteration_cap() {
        // The model keeps asking for tools; with a cap of 3, exactly three
        // batches run and the fourth prompt is never issued.
        let tool_reply = r#"{"tool_calls": [{"name": "search", "arguments": {"q": "x"}}]}"#;
        let backend = ScriptedBackend::new(vec![tool_reply, tool_reply, tool_reply]);

        let mut request = answer_request();
        request.tools = Some(Arc::new(EchoTools));
        request.max_iterations = 3;

        let outcome = executor(backend.clone()).execute(&request).await.unwrap();

        assert!(outcome.incomplete);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.tool_results().count(), 3);
        assert_eq!(backend.prompts.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tools_filtered_and_results_fed_back() {
        let backend = ScriptedBackend::new(vec![
            r#"{"tool_calls": [{"name": "search", "arguments": {}}, {"name": "bogus", "arguments": {}}]}"#,
            r#"{"answer": "done"}"#,
        ]);

        let mut request = answer_request();
        request.tools = Some(Arc::new(EchoTools));
        request.max_iterations = 5;

        let outcome = executor(backend.clone()).execute(&request).await.unwrap();

        assert!(!outcome.incomplete);
        assert_eq!(outcome.value["answer"], "done");
        // Only the known tool ran.
        assert_eq!(outcome.transcript[0].tool_calls.len(), 1);
        // Its result appears in the second prompt.
        let prompts = backend.prompts.lock();
        assert!(prompts[1].contains("Tool results (iteration 0)"));
        assert!(prompts[1].contains("search"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_tool_ends_loop() {
        let backend = ScriptedBackend::new(vec![
            r#"{"tool_calls": [{"name": "search", "arguments": {}}]}"#,
        ]);

        let mut request = answer_request();
        request.tools = Some(Arc::new(EchoTools));
        request.max_iterations = 10;
        request.finalize_tool = Some("search".to_string());

        let outcome = executor(backend).execute(&request).await.unwrap();
        assert!(!outcome.incomplete);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_extract_tool_calls_xml() {
        let raw = r#"
<response>
  <tool_calls>
    <call><name>search</name><arguments>{"q": "parser"}</arguments></call>
    <call><name>read_file</name><arguments>{"path": "src/lib.rs"}</arguments></call>
  </tool_calls>
</response>"#;
        let calls = StructuredExecutor::extract_tool_calls(raw, OutputFormat::Xml);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["q"], json!("parser"));
    }
}
