//! Conversation export
//!
//! Serialises a conversation to JSON or Markdown in a configured
//! directory; the filename is the conversation uuid. The JSON form
//! mirrors the data model. The Markdown form groups summaries by level
//! (highest first), then turns, with tool arguments, durations and
//! outputs inlined and embeddings reduced to dimensionality notes.
//! `parse_markdown` recovers the representable subset for round-trips.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use ragforge_core::Role;

use crate::conversation::{Conversation, ConversationStatus, StoredMessage, Summary, Turn};
use crate::MemoryError;

/// Export file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

/// The full export payload; the JSON form is this struct verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExport {
    pub conversation: Conversation,
    pub turns: Vec<Turn>,
    pub summaries: Vec<Summary>,
}

/// Writes exports to disk.
pub struct ConversationExporter {
    directory: PathBuf,
    format: ExportFormat,
}

impl ConversationExporter {
    pub fn new(directory: PathBuf, format: ExportFormat) -> Self {
        Self { directory, format }
    }

    /// Honour the `RAGFORGE_EXPORT_PATH` override, falling back to the
    /// given default directory.
    pub fn from_env(
        layer: &ragforge_config::EnvLayer,
        default_directory: PathBuf,
        format: ExportFormat,
    ) -> Self {
        let directory = layer
            .get("RAGFORGE_EXPORT_PATH")
            .map(PathBuf::from)
            .unwrap_or(default_directory);
        Self::new(directory, format)
    }

    /// Export one conversation; returns the written path.
    pub async fn export(&self, payload: &ConversationExport) -> Result<PathBuf, MemoryError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| MemoryError::Store(format!("export dir: {}", e)))?;
        let path = self.directory.join(format!(
            "{}.{}",
            payload.conversation.uuid,
            self.format.extension()
        ));
        let content = match self.format {
            ExportFormat::Json => serde_json::to_string_pretty(payload)
                .map_err(|e| MemoryError::Store(e.to_string()))?,
            ExportFormat::Markdown => render_markdown(payload),
        };
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| MemoryError::Store(format!("export write: {}", e)))?;
        tracing::debug!(path = %path.display(), "Exported conversation");
        Ok(path)
    }
}

/// Render the Markdown form.
pub fn render_markdown(payload: &ConversationExport) -> String {
    let conversation = &payload.conversation;
    let mut out = String::new();

    out.push_str(&format!("# Conversation: {}\n\n", conversation.title));
    out.push_str(&format!("- uuid: {}\n", conversation.uuid));
    out.push_str(&format!(
        "- status: {}\n",
        match conversation.status {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
        }
    ));
    out.push_str(&format!("- messages: {}\n", conversation.message_count));
    out.push_str(&format!("- total_chars: {}\n\n", conversation.total_chars));

    // Summaries grouped by level, highest first.
    let mut levels: Vec<usize> = payload.summaries.iter().map(|s| s.level).collect();
    levels.sort_unstable();
    levels.dedup();
    for level in levels.into_iter().rev() {
        out.push_str(&format!("## Summaries (level {})\n\n", level));
        for summary in payload.summaries.iter().filter(|s| s.level == level) {
            out.push_str(&format!(
                "### [{}..{})\n",
                summary.start_char, summary.end_char
            ));
            out.push_str(&format!("Conversational: {}\n", summary.conversational));
            out.push_str(&format!("Actions: {}\n", summary.actions));
            if let Some(embedding) = &summary.embedding {
                out.push_str(&format!("[embedding: {} dims]\n", embedding.len()));
            }
            out.push('\n');
        }
    }

    out.push_str("## Turns\n\n");
    for (index, turn) in payload.turns.iter().enumerate() {
        out.push_str(&format!("### Turn {}\n", index + 1));
        out.push_str(&format!("User: {}\n", turn.user.content));
        for call in &turn.tool_calls {
            out.push_str(&format!(
                "Tool {} ({} ms): {} -> {}\n",
                call.tool_name, call.duration_ms, call.arguments, call.output
            ));
        }
        if let Some(embedding) = &turn.user.embedding {
            out.push_str(&format!("[embedding: {} dims]\n", embedding.len()));
        }
        out.push_str(&format!("Assistant: {}\n\n", turn.assistant.content));
    }

    out
}

/// Parse the Markdown form back into the representable subset: metadata,
/// summary levels/ranges/texts and turn message contents. Embeddings and
/// timestamps are not representable and come back empty/default.
pub fn parse_markdown(text: &str) -> Result<ConversationExport, MemoryError> {
    let mut title = String::new();
    let mut uuid = String::new();
    let mut status = ConversationStatus::Active;
    let mut message_count = 0usize;
    let mut total_chars = 0usize;
    let mut summaries: Vec<Summary> = Vec::new();
    let mut turns: Vec<Turn> = Vec::new();

    let mut current_level: Option<usize> = None;
    let mut in_turns = false;
    let mut pending_user: Option<String> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("# Conversation: ") {
            title = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("- uuid: ") {
            uuid = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("- status: ") {
            status = match rest {
                "archived" => ConversationStatus::Archived,
                _ => ConversationStatus::Active,
            };
        } else if let Some(rest) = line.strip_prefix("- messages: ") {
            message_count = rest.parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("- total_chars: ") {
            total_chars = rest.parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("## Summaries (level ") {
            current_level = rest.trim_end_matches(')').parse().ok();
            in_turns = false;
        } else if line.starts_with("## Turns") {
            current_level = None;
            in_turns = true;
        } else if let (Some(level), Some(rest)) = (current_level, line.strip_prefix("### [")) {
            // "### [start..end)"
            let range = rest.trim_end_matches(')');
            let (start, end) = range.split_once("..").unwrap_or(("0", "0"));
            summaries.push(Summary {
                uuid: String::new(),
                conversation_uuid: uuid.clone(),
                level,
                start_char: start.parse().unwrap_or(0),
                end_char: end.parse().unwrap_or(0),
                conversational: String::new(),
                actions: String::new(),
                key_findings: vec![],
                files_mentioned: vec![],
                tools_used: vec![],
                embedding: None,
                created_at: chrono::Utc::now(),
            });
        } else if let Some(rest) = line.strip_prefix("Conversational: ") {
            if let Some(summary) = summaries.last_mut() {
                summary.conversational = rest.to_string();
            }
        } else if let Some(rest) = line.strip_prefix("Actions: ") {
            if let Some(summary) = summaries.last_mut() {
                summary.actions = rest.to_string();
            }
        } else if in_turns {
            if let Some(rest) = line.strip_prefix("User: ") {
                pending_user = Some(rest.to_string());
            } else if let Some(rest) = line.strip_prefix("Assistant: ") {
                let user = pending_user.take().unwrap_or_default();
                turns.push(Turn::new(
                    StoredMessage::new(Role::User, user),
                    Vec::new(),
                    StoredMessage::new(Role::Assistant, rest.to_string()),
                ));
            }
        }
    }

    if uuid.is_empty() {
        return Err(MemoryError::Store(
            "markdown export missing conversation uuid".to_string(),
        ));
    }

    let mut conversation = Conversation::new(title);
    conversation.uuid = uuid;
    conversation.status = status;
    conversation.message_count = message_count;
    conversation.total_chars = total_chars;

    // Restore cumulative offsets.
    let mut offset = 0usize;
    for turn in &mut turns {
        turn.start_char = offset;
        offset += turn.char_count();
    }

    Ok(ConversationExport {
        conversation,
        turns,
        summaries,
    })
}
