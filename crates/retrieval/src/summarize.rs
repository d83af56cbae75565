//! LLM summarization of result sets
//!
//! Formats the limited result list into a text block and asks the model
//! for code snippets, a findings paragraph and optional follow-up
//! suggestions. Single-iteration call, no tools.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ragforge_config::constants::retrieval as defaults;
use ragforge_core::SearchResult;
use ragforge_llm::{
    OutputSchema, SchemaField, SchemaNode, StructuredExecutor, StructuredRequest,
};

use crate::RetrievalError;

/// A snippet the model judged relevant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub uuid: String,
    pub file: String,
    /// Absolute line range, e.g. "120-148"
    pub line_range: String,
    /// Concise content, at most 30 lines
    pub content: String,
    pub why_relevant: String,
}

/// What the model suggests doing next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Search,
    Explore,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub target: String,
    pub reason: String,
}

/// The summarization result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub snippets: Vec<Snippet>,
    pub findings: String,
    pub suggestions: Vec<Suggestion>,
}

/// Summarizer over the structured executor.
pub struct ResultSummarizer {
    executor: StructuredExecutor,
}

impl ResultSummarizer {
    pub fn new(executor: StructuredExecutor) -> Self {
        Self { executor }
    }

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            SchemaField::new(
                "snippets",
                "the most relevant code locations",
                true,
                SchemaNode::Array(Box::new(SchemaNode::Object(vec![
                    SchemaField::string("uuid", "entity uuid, copied exactly", true),
                    SchemaField::string("file", "file path", true),
                    SchemaField::string("line_range", "absolute line range, e.g. 10-42", true),
                    SchemaField::string(
                        "content",
                        "concise snippet content, at most 30 lines",
                        true,
                    ),
                    SchemaField::string("why_relevant", "why this matters for the query", true),
                ]))),
            ),
            SchemaField::string("findings", "overall findings paragraph", true),
            SchemaField::new(
                "suggestions",
                "optional follow-up actions",
                false,
                SchemaNode::Array(Box::new(SchemaNode::Object(vec![
                    SchemaField::string("type", "one of: search, explore, read", true),
                    SchemaField::string("target", "what to search/explore/read", true),
                    SchemaField::string("reason", "why", true),
                ]))),
            ),
        ])
    }

    /// Render candidates into the prompt block the model reads.
    fn format_results(results: &[SearchResult]) -> String {
        let mut block = String::new();
        for result in results {
            let entity = &result.entity;
            let file = entity.field_str("file_path").unwrap_or("-");
            let lines = match (entity.field_i64("start_line"), entity.field_i64("end_line")) {
                (Some(start), Some(end)) => format!("{}-{}", start, end),
                _ => "-".to_string(),
            };
            let description = entity.field_str("description").unwrap_or("");
            let content = entity.field_str("content").unwrap_or("");
            block.push_str(&format!(
                "id: {}\ntype: {}\nname: {}\nfile: {}\nlines: {}\nscore: {}\ndescription: {}\ncontent:\n{}\n---\n",
                entity.uuid,
                entity.entity_type,
                entity.name,
                file,
                lines,
                result
                    .score
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "null".to_string()),
                description,
                content,
            ));
        }
        block
    }

    pub async fn summarize(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<ResultSummary, RetrievalError> {
        let request = StructuredRequest::new(
            format!(
                "Summarize how these search results answer the query. Keep \
                 snippet content to at most {} lines each.",
                defaults::SNIPPET_MAX_LINES
            ),
            Self::schema(),
        )
        .with_input("query", query)
        .with_input("results", Self::format_results(results));

        let outcome = self.executor.execute(&request).await?;
        Ok(Self::parse_summary(&outcome.value))
    }

    fn parse_summary(value: &Value) -> ResultSummary {
        let snippets = value["snippets"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(Snippet {
                            uuid: item.get("uuid")?.as_str()?.to_string(),
                            file: item.get("file")?.as_str()?.to_string(),
                            line_range: item
                                .get("line_range")
                                .and_then(|v| v.as_str())
                                .unwrap_or("-")
                                .to_string(),
                            content: item.get("content")?.as_str()?.to_string(),
                            why_relevant: item
                                .get("why_relevant")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let suggestions = value["suggestions"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let kind = match item.get("type")?.as_str()? {
                            "search" => SuggestionKind::Search,
                            "explore" => SuggestionKind::Explore,
                            "read" => SuggestionKind::Read,
                            _ => return None,
                        };
                        Some(Suggestion {
                            kind,
                            target: item.get("target")?.as_str()?.to_string(),
                            reason: item
                                .get("reason")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        ResultSummary {
            snippets,
            findings: value["findings"].as_str().unwrap_or("").to_string(),
            suggestions,
        }
    }
}
