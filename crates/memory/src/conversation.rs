//! Conversation data model
//!
//! A conversation is an ordered list of turns (user message, zero or more
//! tool results, assistant message) plus a summary forest: level-1
//! summaries cover character ranges of turns, higher levels cover ranges
//! of the level below. `total_chars` always equals the sum of the
//! conversation's message char counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ragforge_core::Role;

/// Conversation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
}

/// Conversation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub uuid: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ConversationStatus,
    pub message_count: usize,
    pub total_chars: usize,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            status: ConversationStatus::Active,
            message_count: 0,
            total_chars: 0,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status == ConversationStatus::Archived
    }
}

/// One stored message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub char_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            char_count: content.chars().count(),
            role,
            content,
            embedding: None,
            reasoning: None,
            timestamp: Utc::now(),
        }
    }
}

/// A tool call recorded inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub output: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    pub char_count: usize,
}

impl ToolCallRecord {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        output: serde_json::Value,
        success: bool,
        duration_ms: u64,
    ) -> Self {
        let char_count = output.to_string().chars().count();
        Self {
            tool_name: tool_name.into(),
            arguments,
            output,
            success,
            duration_ms,
            char_count,
        }
    }
}

/// One turn: user message, tool results, assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub uuid: String,
    pub user: StoredMessage,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub assistant: StoredMessage,
    /// Offset of this turn's first character in the conversation stream
    pub start_char: usize,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(user: StoredMessage, tool_calls: Vec<ToolCallRecord>, assistant: StoredMessage) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            user,
            tool_calls,
            assistant,
            start_char: 0,
            timestamp: Utc::now(),
        }
    }

    /// Character volume of this turn, all messages included.
    pub fn char_count(&self) -> usize {
        self.user.char_count
            + self.assistant.char_count
            + self.tool_calls.iter().map(|t| t.char_count).sum::<usize>()
    }

    /// End of this turn's character range (exclusive).
    pub fn end_char(&self) -> usize {
        self.start_char + self.char_count()
    }
}

/// A summary node. Level 1 covers turns; level L+1 covers level-L
/// summaries. Ranges are character offsets into the conversation stream,
/// `[start_char, end_char)`. Summaries are created once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub uuid: String,
    pub conversation_uuid: String,
    pub level: usize,
    pub start_char: usize,
    pub end_char: usize,
    /// Conversational-style paragraph
    pub conversational: String,
    /// Actions-style paragraph
    pub actions: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub files_mentioned: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    /// Characters of summary text, used by the promotion threshold.
    pub fn text_chars(&self) -> usize {
        self.conversational.chars().count() + self.actions.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_char_count_includes_tool_output() {
        let turn = Turn::new(
            StoredMessage::new(Role::User, "hi"),
            vec![ToolCallRecord::new(
                "search",
                json!({}),
                json!("abc"),
                true,
                5,
            )],
            StoredMessage::new(Role::Assistant, "hello"),
        );
        // "hi" (2) + "\"abc\"" (5) + "hello" (5)
        assert_eq!(turn.char_count(), 12);
        assert_eq!(turn.end_char(), 12);
    }

    #[test]
    fn test_conversation_starts_active_and_empty() {
        let conversation = Conversation::new("research session");
        assert_eq!(conversation.status, ConversationStatus::Active);
        assert_eq!(conversation.total_chars, 0);
        assert_eq!(conversation.message_count, 0);
    }
}
