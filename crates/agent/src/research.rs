//! The research agent
//!
//! `ask` builds the dual context from the conversation store, hands the
//! tool registry to the structured executor, iterates until the model
//! finalizes with high confidence or the iteration cap, then appends the
//! turn and triggers summarisation asynchronously.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use ragforge_config::constants::agent as defaults;
use ragforge_core::Role;
use ragforge_llm::{
    IterationRecord, LlmError, OutputSchema, SchemaField, StructuredExecutor, StructuredRequest,
    ToolDispatcher,
};
use ragforge_memory::{
    ContextBuilder, ContextQuery, Conversation, ConversationStore, HierarchicalSummarizer,
    StoredMessage, ToolCallRecord, Turn,
};
use ragforge_tools::{Tool, ToolError, ToolRegistry};

use crate::report::{Confidence, ReportEditor};
use crate::AgentError;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Persona paragraph prepended to the system prompt
    pub persona: Option<String>,
    /// Name of the finalisation tool
    pub finalize_tool: String,
    /// Dual-context retrieval parameters
    pub context: ContextQuery,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: defaults::MAX_ITERATIONS,
            persona: None,
            finalize_tool: "finalize_report".to_string(),
            context: ContextQuery::default(),
        }
    }
}

/// The structured answer returned by [`ResearchAgent::ask`].
#[derive(Debug, Clone)]
pub struct AgentAnswer {
    pub answer: String,
    pub confidence: Confidence,
    pub tools_used: Vec<String>,
    pub iterations: usize,
    /// True when the iteration cap ended the loop
    pub incomplete: bool,
    /// Report editor content, when a report session ran
    pub report: Option<String>,
    pub conversation_uuid: String,
    /// Per-iteration session log: prompt, raw response, calls, results
    pub transcript: Vec<IterationRecord>,
}

/// Signals the loop to end. Low or medium confidence is logged and
/// vetoed; the agent keeps researching until high confidence or the
/// iteration cap.
pub struct FinalizeReportTool {
    editor: Option<Arc<ReportEditor>>,
}

impl FinalizeReportTool {
    pub fn new() -> Self {
        Self { editor: None }
    }

    pub fn with_editor(editor: Arc<ReportEditor>) -> Self {
        Self {
            editor: Some(editor),
        }
    }
}

impl Default for FinalizeReportTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FinalizeReportTool {
    fn name(&self) -> &str {
        "finalize_report"
    }

    fn description(&self) -> &str {
        "Finish the research session. Call only when you are highly \
         confident in the answer; lower confidence keeps the session open."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "confidence": {
                    "type": "string",
                    "description": "how confident you are in the answer",
                    "enum": ["high", "medium", "low"]
                },
                "summary": {"type": "string", "description": "one-line wrap-up"}
            },
            "required": ["confidence"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let confidence = args["confidence"]
            .as_str()
            .and_then(Confidence::parse)
            .unwrap_or(Confidence::Low);

        if confidence != Confidence::High {
            tracing::info!(
                confidence = confidence.as_str(),
                "finalize_report called below high confidence; continuing"
            );
            return Ok(json!({
                "accepted": false,
                "confidence": confidence.as_str(),
                "note": "confidence below high; keep researching"
            }));
        }

        if let Some(editor) = &self.editor {
            if let Err(err) = editor.finalize(confidence) {
                return Ok(json!({"accepted": false, "error": err}));
            }
        }

        Ok(json!({"accepted": true, "confidence": "high"}))
    }
}

/// The research agent.
pub struct ResearchAgent {
    executor: StructuredExecutor,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    context_builder: ContextBuilder,
    summarizer: Option<Arc<HierarchicalSummarizer>>,
    editor: Option<Arc<ReportEditor>>,
    config: AgentConfig,
}

impl ResearchAgent {
    pub fn new(
        executor: StructuredExecutor,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        config: AgentConfig,
    ) -> Self {
        let context_builder = ContextBuilder::new(store.clone());
        Self {
            executor,
            tools,
            store,
            context_builder,
            summarizer: None,
            editor: None,
            config,
        }
    }

    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<HierarchicalSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_report_editor(mut self, editor: Arc<ReportEditor>) -> Self {
        self.editor = Some(editor);
        self
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        if let Some(persona) = &self.config.persona {
            prompt.push_str(persona);
            prompt.push_str("\n\n");
        }
        prompt.push_str(
            "You are a research agent over a code knowledge base. Use the \
             available tools to gather evidence before answering. Call \
             finalize_report only when you have high confidence in the \
             answer; otherwise keep researching with at least 2-3 distinct \
             searches. Cite entity uuids and file paths in your answer.",
        );
        prompt
    }

    fn answer_schema() -> OutputSchema {
        OutputSchema::new(vec![
            SchemaField::string("answer", "the final answer, with citations", true),
            SchemaField::string("confidence", "high, medium or low", false),
        ])
    }

    /// Answer a question, appending the exchange to the conversation.
    pub async fn ask(
        &self,
        question: &str,
        conversation_uuid: Option<String>,
    ) -> Result<AgentAnswer, AgentError> {
        if self.config.max_iterations == 0 {
            return Err(AgentError::IterationExhausted { iterations: 0 });
        }

        // Resolve the conversation, creating one on first contact.
        let conversation_uuid = match conversation_uuid {
            Some(uuid) => uuid,
            None => {
                let title: String = question.chars().take(80).collect();
                let conversation = Conversation::new(title);
                let uuid = conversation.uuid.clone();
                self.store.create_conversation(&conversation).await?;
                uuid
            }
        };

        let context = self
            .context_builder
            .build(&conversation_uuid, question, &self.config.context)
            .await?;

        let mut request = StructuredRequest::new(question.to_string(), Self::answer_schema())
            .with_system_prompt(self.system_prompt());
        if !context.is_empty() {
            request = request.with_input(
                "conversation_context",
                context.render(&self.config.context),
            );
        }
        request.tools = Some(self.tools.clone() as Arc<dyn ToolDispatcher>);
        request.max_iterations = self.config.max_iterations;
        request.finalize_tool = Some(self.config.finalize_tool.clone());

        let outcome = match self.executor.execute(&request).await {
            Ok(outcome) => outcome,
            Err(LlmError::IterationsExhausted(iterations)) => {
                return Err(AgentError::IterationExhausted { iterations })
            }
            Err(err) => return Err(err.into()),
        };

        let answer = outcome.value["answer"].as_str().unwrap_or("").to_string();
        let confidence = self.resolve_confidence(&outcome.value, &outcome.transcript, outcome.incomplete);

        let mut tools_used: Vec<String> = outcome
            .tool_results()
            .map(|r| r.tool_name.clone())
            .collect();
        tools_used.dedup();
        tools_used.sort();
        tools_used.dedup();

        self.append_turn(&conversation_uuid, question, &answer, &outcome.transcript)
            .await?;

        if let Some(summarizer) = &self.summarizer {
            // Fire-and-forget; appends never wait on summarisation.
            summarizer.trigger(conversation_uuid.clone());
        }

        let report = self
            .editor
            .as_ref()
            .map(|e| e.content())
            .filter(|content| !content.is_empty());

        Ok(AgentAnswer {
            answer,
            confidence,
            tools_used,
            iterations: outcome.iterations,
            incomplete: outcome.incomplete,
            report,
            conversation_uuid,
            transcript: outcome.transcript,
        })
    }

    /// Confidence comes from the structured answer, else from the
    /// finalize tool's accepted result, else defaults by completeness.
    fn resolve_confidence(
        &self,
        value: &Value,
        transcript: &[IterationRecord],
        incomplete: bool,
    ) -> Confidence {
        if let Some(confidence) = value["confidence"].as_str().and_then(Confidence::parse) {
            return confidence;
        }
        let finalized = transcript
            .iter()
            .flat_map(|r| r.tool_results.iter())
            .filter(|r| r.tool_name == self.config.finalize_tool && r.success)
            .filter_map(|r| r.output.get("confidence")?.as_str())
            .last()
            .and_then(Confidence::parse);
        match (finalized, incomplete) {
            (Some(confidence), _) => confidence,
            (None, true) => Confidence::Low,
            (None, false) => Confidence::Medium,
        }
    }

    async fn append_turn(
        &self,
        conversation_uuid: &str,
        question: &str,
        answer: &str,
        transcript: &[IterationRecord],
    ) -> Result<(), AgentError> {
        let tool_calls: Vec<ToolCallRecord> = transcript
            .iter()
            .flat_map(|record| record.tool_calls.iter().zip(record.tool_results.iter()))
            .map(|(call, result)| {
                ToolCallRecord::new(
                    call.name.clone(),
                    Value::Object(call.arguments.clone().into_iter().collect()),
                    if result.success {
                        result.output.clone()
                    } else {
                        json!({"error": result.error})
                    },
                    result.success,
                    result.duration_ms,
                )
            })
            .collect();

        let turn = Turn::new(
            StoredMessage::new(Role::User, question),
            tool_calls,
            StoredMessage::new(Role::Assistant, answer),
        );
        self.store.append_turn(conversation_uuid, turn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use ragforge_llm::{CompletionBackend, CompletionProvider};
    use ragforge_memory::InMemoryConversationStore;

    struct ScriptedBackend {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(mut responses: Vec<&str>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn generate(&self, _prompt: &str, _request_id: &str) -> Result<String, LlmError> {
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

    fn agent(backend: Arc<ScriptedBackend>, config: AgentConfig) -> (ResearchAgent, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut registry = ToolRegistry::new();
        registry.register(FinalizeReportTool::new());
        let agent = ResearchAgent::new(
            StructuredExecutor::new(CompletionProvider::new(backend)),
            Arc::new(registry),
            store.clone(),
            config,
        );
        (agent, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_answer_appends_turn() {
        let backend = ScriptedBackend::new(vec![
            r#"{"answer": "the parser is in src/parser.rs", "confidence": "high"}"#,
        ]);
        let (agent, store) = agent(backend, AgentConfig::default());

        let answer = agent.ask("where is the parser?", None).await.unwrap();
        assert_eq!(answer.answer, "the parser is in src/parser.rs");
        assert_eq!(answer.confidence, Confidence::High);
        assert!(!answer.incomplete);
        assert_eq!(answer.iterations, 1);

        let turns = store.get_turns(&answer.conversation_uuid).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user.content, "where is the parser?");
        assert_eq!(turns[0].assistant.content, "the parser is in src/parser.rs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_finalize_keeps_looping() {
        let backend = ScriptedBackend::new(vec![
            r#"{"tool_calls": [{"name": "finalize_report", "arguments": {"confidence": "low"}}]}"#,
            r#"{"tool_calls": [{"name": "finalize_report", "arguments": {"confidence": "high"}}]}"#,
            r#"{"answer": "done", "confidence": "high"}"#,
        ]);
        let (agent, _) = agent(backend, AgentConfig::default());

        let answer = agent.ask("question", None).await.unwrap();
        // The low-confidence finalize was vetoed; the high one stopped the
        // loop after two iterations.
        assert_eq!(answer.iterations, 2);
        assert!(!answer.incomplete);
        assert_eq!(answer.confidence, Confidence::High);
        assert_eq!(answer.tools_used, vec!["finalize_report".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_cap_marks_incomplete() {
        let tool_reply =
            r#"{"tool_calls": [{"name": "finalize_report", "arguments": {"confidence": "low"}}]}"#;
        let backend = ScriptedBackend::new(vec![tool_reply, tool_reply, tool_reply]);
        let config = AgentConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let (agent, _) = agent(backend, config);

        let answer = agent.ask("question", None).await.unwrap();
        assert!(answer.incomplete);
        assert_eq!(answer.iterations, 3);
        assert_eq!(answer.confidence, Confidence::Low);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_iterations_is_error() {
        let backend = ScriptedBackend::new(vec![]);
        let config = AgentConfig {
            max_iterations: 0,
            ..Default::default()
        };
        let (agent, _) = agent(backend, config);

        let result = agent.ask("question", None).await;
        assert!(matches!(
            result,
            Err(AgentError::IterationExhausted { iterations: 0 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prior_conversation_feeds_context() {
        let backend = ScriptedBackend::new(vec![
            r#"{"answer": "first", "confidence": "high"}"#,
            r#"{"answer": "second", "confidence": "high"}"#,
        ]);
        let (agent, store) = agent(backend, AgentConfig::default());

        let first = agent.ask("question one", None).await.unwrap();
        let second = agent
            .ask("question two", Some(first.conversation_uuid.clone()))
            .await
            .unwrap();

        assert_eq!(first.conversation_uuid, second.conversation_uuid);
        let turns = store.get_turns(&first.conversation_uuid).await.unwrap();
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_with_editor_report() {
        let backend = ScriptedBackend::new(vec![
            r#"{"answer": "see report", "confidence": "high"}"#,
        ]);
        let store = Arc::new(InMemoryConversationStore::new());
        let editor = Arc::new(ReportEditor::new());
        editor.set("# Findings\nall good").unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(FinalizeReportTool::with_editor(editor.clone()));

        let agent = ResearchAgent::new(
            StructuredExecutor::new(CompletionProvider::new(backend)),
            Arc::new(registry),
            store,
            AgentConfig::default(),
        )
        .with_report_editor(editor);

        let answer = agent.ask("question", None).await.unwrap();
        assert_eq!(answer.report.as_deref(), Some("# Findings\nall good"));
    }
}
