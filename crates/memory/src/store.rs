//! Conversation storage
//!
//! [`ConversationStore`] is the persistence seam: the graph-backed
//! implementation is primary, the in-memory one backs tests and
//! single-session use. Turn appends are atomic; archived conversations
//! reject writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use ragforge_core::Role;
use ragforge_graph::{coerce_int, Neo4jStore, ParamValue, Params};

use crate::conversation::{
    Conversation, ConversationStatus, StoredMessage, Summary, ToolCallRecord, Turn,
};
use crate::MemoryError;

/// Filter for summary queries.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub level: Option<usize>,
}

impl SummaryFilter {
    pub fn level(level: usize) -> Self {
        Self { level: Some(level) }
    }
}

/// The storage operations the memory layer needs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), MemoryError>;

    async fn get_conversation(&self, uuid: &str) -> Result<Conversation, MemoryError>;

    /// Move a conversation to archived; it becomes read-only.
    async fn archive_conversation(&self, uuid: &str) -> Result<(), MemoryError>;

    /// Append a turn. The store assigns `start_char` and updates the
    /// conversation counters atomically with the turn write. Returns the
    /// stored turn.
    async fn append_turn(&self, conversation_uuid: &str, turn: Turn) -> Result<Turn, MemoryError>;

    /// All turns, ordered by position.
    async fn get_turns(&self, conversation_uuid: &str) -> Result<Vec<Turn>, MemoryError>;

    /// Newest turns fitting both limits, in chronological order.
    async fn get_recent_turns(
        &self,
        conversation_uuid: &str,
        max_chars: usize,
        max_turns: usize,
    ) -> Result<Vec<Turn>, MemoryError>;

    /// Summaries ordered by start offset.
    async fn get_summaries(
        &self,
        conversation_uuid: &str,
        filter: &SummaryFilter,
    ) -> Result<Vec<Summary>, MemoryError>;

    async fn append_summary(&self, summary: &Summary) -> Result<(), MemoryError>;

    /// Vector search over summary embeddings, optionally scoped to one
    /// conversation. Returns `(summary, cosine score)` pairs descending.
    async fn find_similar_summaries(
        &self,
        conversation_uuid: Option<&str>,
        query_embedding: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<(Summary, f32)>, MemoryError>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct ConversationRecord {
    conversation: Option<Conversation>,
    turns: Vec<Turn>,
    summaries: Vec<Summary>,
}

/// In-memory store for tests and single-session runs.
#[derive(Default)]
pub struct InMemoryConversationStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), MemoryError> {
        let mut records = self.records.write();
        let record = records.entry(conversation.uuid.clone()).or_default();
        record.conversation = Some(conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, uuid: &str) -> Result<Conversation, MemoryError> {
        self.records
            .read()
            .get(uuid)
            .and_then(|r| r.conversation.clone())
            .ok_or_else(|| MemoryError::ConversationNotFound(uuid.to_string()))
    }

    async fn archive_conversation(&self, uuid: &str) -> Result<(), MemoryError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(uuid)
            .and_then(|r| r.conversation.as_mut())
            .ok_or_else(|| MemoryError::ConversationNotFound(uuid.to_string()))?;
        record.status = ConversationStatus::Archived;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_turn(&self, conversation_uuid: &str, mut turn: Turn) -> Result<Turn, MemoryError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(conversation_uuid)
            .ok_or_else(|| MemoryError::ConversationNotFound(conversation_uuid.to_string()))?;
        let conversation = record
            .conversation
            .as_mut()
            .ok_or_else(|| MemoryError::ConversationNotFound(conversation_uuid.to_string()))?;
        if conversation.is_archived() {
            return Err(MemoryError::ConversationReadOnly(
                conversation_uuid.to_string(),
            ));
        }

        turn.start_char = conversation.total_chars;
        conversation.total_chars += turn.char_count();
        conversation.message_count += 2 + turn.tool_calls.len();
        conversation.updated_at = Utc::now();
        record.turns.push(turn.clone());
        Ok(turn)
    }

    async fn get_turns(&self, conversation_uuid: &str) -> Result<Vec<Turn>, MemoryError> {
        Ok(self
            .records
            .read()
            .get(conversation_uuid)
            .map(|r| r.turns.clone())
            .unwrap_or_default())
    }

    async fn get_recent_turns(
        &self,
        conversation_uuid: &str,
        max_chars: usize,
        max_turns: usize,
    ) -> Result<Vec<Turn>, MemoryError> {
        let turns = self.get_turns(conversation_uuid).await?;
        let mut selected: Vec<Turn> = Vec::new();
        let mut chars = 0usize;
        for turn in turns.into_iter().rev() {
            if selected.len() >= max_turns {
                break;
            }
            let turn_chars = turn.char_count();
            if !selected.is_empty() && chars + turn_chars > max_chars {
                break;
            }
            chars += turn_chars;
            selected.push(turn);
        }
        selected.reverse();
        Ok(selected)
    }

    async fn get_summaries(
        &self,
        conversation_uuid: &str,
        filter: &SummaryFilter,
    ) -> Result<Vec<Summary>, MemoryError> {
        let mut summaries: Vec<Summary> = self
            .records
            .read()
            .get(conversation_uuid)
            .map(|r| r.summaries.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|s| filter.level.map_or(true, |level| s.level == level))
            .collect();
        summaries.sort_by_key(|s| (s.level, s.start_char));
        Ok(summaries)
    }

    async fn append_summary(&self, summary: &Summary) -> Result<(), MemoryError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&summary.conversation_uuid)
            .ok_or_else(|| MemoryError::ConversationNotFound(summary.conversation_uuid.clone()))?;
        record.summaries.push(summary.clone());
        Ok(())
    }

    async fn find_similar_summaries(
        &self,
        conversation_uuid: Option<&str>,
        query_embedding: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<(Summary, f32)>, MemoryError> {
        let records = self.records.read();
        let mut scored: Vec<(Summary, f32)> = records
            .iter()
            .filter(|(uuid, _)| conversation_uuid.map_or(true, |c| c == uuid.as_str()))
            .flat_map(|(_, record)| record.summaries.iter())
            .filter_map(|summary| {
                let embedding = summary.embedding.as_ref()?;
                let score = Self::cosine(embedding, query_embedding);
                (score >= min_score).then(|| (summary.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        Ok(scored)
    }
}

// =============================================================================
// Graph-backed store
// =============================================================================

/// Conversation store persisted in the property graph. Each turn is a
/// `Turn` node linked to its `Message` and `ToolCall` nodes; the turn
/// write and the conversation counter update share one transaction.
pub struct GraphConversationStore {
    store: Arc<Neo4jStore>,
}

impl GraphConversationStore {
    pub fn new(store: Arc<Neo4jStore>) -> Self {
        Self { store }
    }

    fn row_string(row: &neo4rs::Row, key: &str) -> Result<String, MemoryError> {
        row.get::<String>(key)
            .map_err(|e| MemoryError::Store(format!("missing column {}: {}", key, e)))
    }

    fn node_to_conversation(node: &neo4rs::Node) -> Result<Conversation, MemoryError> {
        let get_string = |key: &str| -> Result<String, MemoryError> {
            node.get::<String>(key)
                .map_err(|e| MemoryError::Store(format!("conversation missing {}: {}", key, e)))
        };
        let status = match get_string("status")?.as_str() {
            "archived" => ConversationStatus::Archived,
            _ => ConversationStatus::Active,
        };
        Ok(Conversation {
            uuid: get_string("uuid")?,
            title: get_string("title")?,
            tags: node.get::<Vec<String>>("tags").unwrap_or_default(),
            created_at: parse_time(&get_string("created_at")?)?,
            updated_at: parse_time(&get_string("updated_at")?)?,
            status,
            message_count: node.get::<i64>("message_count").unwrap_or(0) as usize,
            total_chars: node.get::<i64>("total_chars").unwrap_or(0) as usize,
        })
    }

    fn node_to_summary(node: &neo4rs::Node) -> Result<Summary, MemoryError> {
        let get_string = |key: &str| -> Result<String, MemoryError> {
            node.get::<String>(key)
                .map_err(|e| MemoryError::Store(format!("summary missing {}: {}", key, e)))
        };
        Ok(Summary {
            uuid: get_string("uuid")?,
            conversation_uuid: get_string("conversation_uuid")?,
            level: node.get::<i64>("level").unwrap_or(1) as usize,
            start_char: node.get::<i64>("start_char").unwrap_or(0) as usize,
            end_char: node.get::<i64>("end_char").unwrap_or(0) as usize,
            conversational: get_string("conversational")?,
            actions: node.get::<String>("actions").unwrap_or_default(),
            key_findings: node.get::<Vec<String>>("key_findings").unwrap_or_default(),
            files_mentioned: node.get::<Vec<String>>("files_mentioned").unwrap_or_default(),
            tools_used: node.get::<Vec<String>>("tools_used").unwrap_or_default(),
            embedding: None, // never read back; vector search runs store-side
            created_at: parse_time(&get_string("created_at")?)?,
        })
    }
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MemoryError::Store(format!("bad timestamp {}: {}", text, e)))
}

#[async_trait]
impl ConversationStore for GraphConversationStore {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), MemoryError> {
        let mut params = Params::new();
        params.insert("uuid".into(), ParamValue::String(conversation.uuid.clone()));
        params.insert("title".into(), ParamValue::String(conversation.title.clone()));
        params.insert("tags".into(), ParamValue::StringList(conversation.tags.clone()));
        params.insert(
            "created_at".into(),
            ParamValue::String(conversation.created_at.to_rfc3339()),
        );
        params.insert(
            "updated_at".into(),
            ParamValue::String(conversation.updated_at.to_rfc3339()),
        );
        params.insert("status".into(), ParamValue::String("active".into()));

        self.store
            .run_unit(
                "CREATE (c:Conversation {uuid: $uuid, title: $title, tags: $tags, \
                 created_at: $created_at, updated_at: $updated_at, status: $status, \
                 message_count: 0, total_chars: 0})",
                params,
            )
            .await?;
        Ok(())
    }

    async fn get_conversation(&self, uuid: &str) -> Result<Conversation, MemoryError> {
        let mut params = Params::new();
        params.insert("uuid".into(), ParamValue::String(uuid.to_string()));
        let rows = self
            .store
            .run("MATCH (c:Conversation {uuid: $uuid}) RETURN c", params)
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| MemoryError::ConversationNotFound(uuid.to_string()))?;
        let node: neo4rs::Node = row
            .get("c")
            .map_err(|e| MemoryError::Store(e.to_string()))?;
        Self::node_to_conversation(&node)
    }

    async fn archive_conversation(&self, uuid: &str) -> Result<(), MemoryError> {
        // Check existence first so a missing conversation is reported as
        // such rather than as a silent no-op.
        self.get_conversation(uuid).await?;
        let mut params = Params::new();
        params.insert("uuid".into(), ParamValue::String(uuid.to_string()));
        params.insert(
            "updated_at".into(),
            ParamValue::String(Utc::now().to_rfc3339()),
        );
        self.store
            .run_unit(
                "MATCH (c:Conversation {uuid: $uuid}) \
                 SET c.status = 'archived', c.updated_at = $updated_at",
                params,
            )
            .await?;
        Ok(())
    }

    async fn append_turn(&self, conversation_uuid: &str, mut turn: Turn) -> Result<Turn, MemoryError> {
        let conversation = self.get_conversation(conversation_uuid).await?;
        if conversation.is_archived() {
            return Err(MemoryError::ConversationReadOnly(
                conversation_uuid.to_string(),
            ));
        }

        turn.start_char = conversation.total_chars;
        let turn_chars = turn.char_count();
        let message_delta = 2 + turn.tool_calls.len();

        let mut statements: Vec<(String, Params)> = Vec::new();

        let mut turn_params = Params::new();
        turn_params.insert("conv".into(), ParamValue::String(conversation_uuid.into()));
        turn_params.insert("uuid".into(), ParamValue::String(turn.uuid.clone()));
        turn_params.insert(
            "start_char".into(),
            ParamValue::Int(coerce_int(turn.start_char)),
        );
        turn_params.insert(
            "timestamp".into(),
            ParamValue::String(turn.timestamp.to_rfc3339()),
        );
        statements.push((
            "MATCH (c:Conversation {uuid: $conv}) \
             CREATE (c)-[:HAS_TURN]->(:Turn {uuid: $uuid, start_char: $start_char, \
             timestamp: $timestamp})"
                .into(),
            turn_params,
        ));

        for (role, message) in [("user", &turn.user), ("assistant", &turn.assistant)] {
            let mut params = Params::new();
            params.insert("turn".into(), ParamValue::String(turn.uuid.clone()));
            params.insert(
                "uuid".into(),
                ParamValue::String(uuid::Uuid::new_v4().to_string()),
            );
            params.insert("role".into(), ParamValue::String(role.to_string()));
            params.insert("content".into(), ParamValue::String(message.content.clone()));
            params.insert(
                "char_count".into(),
                ParamValue::Int(coerce_int(message.char_count)),
            );
            params.insert(
                "timestamp".into(),
                ParamValue::String(message.timestamp.to_rfc3339()),
            );
            let embedding_fragment = match &message.embedding {
                Some(vector) => {
                    params.insert("embedding".into(), ParamValue::FloatList(vector.clone()));
                    ", embedding: $embedding"
                }
                None => "",
            };
            statements.push((
                format!(
                    "MATCH (t:Turn {{uuid: $turn}}) \
                     CREATE (t)-[:HAS_MESSAGE {{role: $role}}]->(:Message {{uuid: $uuid, \
                     role: $role, content: $content, char_count: $char_count, \
                     timestamp: $timestamp{}}})",
                    embedding_fragment
                ),
                params,
            ));
        }

        for (index, call) in turn.tool_calls.iter().enumerate() {
            let mut params = Params::new();
            params.insert("turn".into(), ParamValue::String(turn.uuid.clone()));
            params.insert(
                "uuid".into(),
                ParamValue::String(uuid::Uuid::new_v4().to_string()),
            );
            params.insert("name".into(), ParamValue::String(call.tool_name.clone()));
            params.insert(
                "arguments".into(),
                ParamValue::String(call.arguments.to_string()),
            );
            params.insert("output".into(), ParamValue::String(call.output.to_string()));
            params.insert("success".into(), ParamValue::Bool(call.success));
            params.insert(
                "duration_ms".into(),
                ParamValue::Int(coerce_int(call.duration_ms as usize)),
            );
            params.insert("seq".into(), ParamValue::Int(coerce_int(index)));
            statements.push((
                "MATCH (t:Turn {uuid: $turn}) \
                 CREATE (t)-[:HAS_TOOL_CALL {seq: $seq}]->(:ToolCall {uuid: $uuid, \
                 name: $name, arguments: $arguments, output: $output, success: $success, \
                 duration_ms: $duration_ms})"
                    .into(),
                params,
            ));
        }

        let mut counter_params = Params::new();
        counter_params.insert("conv".into(), ParamValue::String(conversation_uuid.into()));
        counter_params.insert(
            "chars".into(),
            ParamValue::Int(coerce_int(turn_chars)),
        );
        counter_params.insert(
            "messages".into(),
            ParamValue::Int(coerce_int(message_delta)),
        );
        counter_params.insert(
            "updated_at".into(),
            ParamValue::String(Utc::now().to_rfc3339()),
        );
        statements.push((
            "MATCH (c:Conversation {uuid: $conv}) \
             SET c.total_chars = c.total_chars + $chars, \
                 c.message_count = c.message_count + $messages, \
                 c.updated_at = $updated_at"
                .into(),
            counter_params,
        ));

        // One transaction: the turn, its messages and the counter update
        // land together or not at all.
        self.store.write_transaction(statements).await?;
        Ok(turn)
    }

    async fn get_turns(&self, conversation_uuid: &str) -> Result<Vec<Turn>, MemoryError> {
        let mut params = Params::new();
        params.insert("conv".into(), ParamValue::String(conversation_uuid.into()));
        let rows = self
            .store
            .run(
                "MATCH (c:Conversation {uuid: $conv})-[:HAS_TURN]->(t:Turn) \
                 MATCH (t)-[:HAS_MESSAGE {role: 'user'}]->(u:Message) \
                 MATCH (t)-[:HAS_MESSAGE {role: 'assistant'}]->(a:Message) \
                 OPTIONAL MATCH (t)-[rc:HAS_TOOL_CALL]->(tc:ToolCall) \
                 WITH t, u, a, rc, tc ORDER BY t.start_char, rc.seq \
                 WITH t, u, a, collect(tc) AS tool_calls ORDER BY t.start_char \
                 RETURN t.uuid AS uuid, t.start_char AS start_char, \
                        t.timestamp AS timestamp, \
                        u.content AS user_content, u.timestamp AS user_ts, \
                        a.content AS assistant_content, a.timestamp AS assistant_ts, \
                        tool_calls",
                params,
            )
            .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in &rows {
            let user_content = Self::row_string(row, "user_content")?;
            let assistant_content = Self::row_string(row, "assistant_content")?;
            let mut user = StoredMessage::new(Role::User, user_content);
            user.timestamp = parse_time(&Self::row_string(row, "user_ts")?)?;
            let mut assistant = StoredMessage::new(Role::Assistant, assistant_content);
            assistant.timestamp = parse_time(&Self::row_string(row, "assistant_ts")?)?;

            let tool_calls = row
                .get::<Vec<neo4rs::Node>>("tool_calls")
                .unwrap_or_default()
                .iter()
                .filter_map(|node| {
                    Some(ToolCallRecord::new(
                        node.get::<String>("name").ok()?,
                        serde_json::from_str(&node.get::<String>("arguments").ok()?).ok()?,
                        serde_json::from_str(&node.get::<String>("output").ok()?).ok()?,
                        node.get::<bool>("success").unwrap_or(false),
                        node.get::<i64>("duration_ms").unwrap_or(0) as u64,
                    ))
                })
                .collect();

            let mut turn = Turn::new(user, tool_calls, assistant);
            turn.uuid = Self::row_string(row, "uuid")?;
            turn.start_char = row.get::<i64>("start_char").unwrap_or(0) as usize;
            turn.timestamp = parse_time(&Self::row_string(row, "timestamp")?)?;
            turns.push(turn);
        }
        Ok(turns)
    }

    async fn get_recent_turns(
        &self,
        conversation_uuid: &str,
        max_chars: usize,
        max_turns: usize,
    ) -> Result<Vec<Turn>, MemoryError> {
        let turns = self.get_turns(conversation_uuid).await?;
        let mut selected: Vec<Turn> = Vec::new();
        let mut chars = 0usize;
        for turn in turns.into_iter().rev() {
            if selected.len() >= max_turns {
                break;
            }
            let turn_chars = turn.char_count();
            if !selected.is_empty() && chars + turn_chars > max_chars {
                break;
            }
            chars += turn_chars;
            selected.push(turn);
        }
        selected.reverse();
        Ok(selected)
    }

    async fn get_summaries(
        &self,
        conversation_uuid: &str,
        filter: &SummaryFilter,
    ) -> Result<Vec<Summary>, MemoryError> {
        let mut params = Params::new();
        params.insert("conv".into(), ParamValue::String(conversation_uuid.into()));
        let level_clause = match filter.level {
            Some(level) => {
                params.insert("level".into(), ParamValue::Int(coerce_int(level)));
                " AND s.level = $level"
            }
            None => "",
        };
        let rows = self
            .store
            .run(
                &format!(
                    "MATCH (s:Summary) WHERE s.conversation_uuid = $conv{} \
                     RETURN s ORDER BY s.level, s.start_char",
                    level_clause
                ),
                params,
            )
            .await?;
        rows.iter()
            .map(|row| {
                let node: neo4rs::Node = row
                    .get("s")
                    .map_err(|e| MemoryError::Store(e.to_string()))?;
                Self::node_to_summary(&node)
            })
            .collect()
    }

    async fn append_summary(&self, summary: &Summary) -> Result<(), MemoryError> {
        let mut params = Params::new();
        params.insert("uuid".into(), ParamValue::String(summary.uuid.clone()));
        params.insert(
            "conv".into(),
            ParamValue::String(summary.conversation_uuid.clone()),
        );
        params.insert("level".into(), ParamValue::Int(coerce_int(summary.level)));
        params.insert(
            "start_char".into(),
            ParamValue::Int(coerce_int(summary.start_char)),
        );
        params.insert(
            "end_char".into(),
            ParamValue::Int(coerce_int(summary.end_char)),
        );
        params.insert(
            "conversational".into(),
            ParamValue::String(summary.conversational.clone()),
        );
        params.insert("actions".into(), ParamValue::String(summary.actions.clone()));
        params.insert(
            "key_findings".into(),
            ParamValue::StringList(summary.key_findings.clone()),
        );
        params.insert(
            "files_mentioned".into(),
            ParamValue::StringList(summary.files_mentioned.clone()),
        );
        params.insert(
            "tools_used".into(),
            ParamValue::StringList(summary.tools_used.clone()),
        );
        params.insert(
            "created_at".into(),
            ParamValue::String(summary.created_at.to_rfc3339()),
        );
        let embedding_fragment = match &summary.embedding {
            Some(vector) => {
                params.insert("embedding".into(), ParamValue::FloatList(vector.clone()));
                ", embedding: $embedding"
            }
            None => "",
        };

        self.store
            .run_unit(
                &format!(
                    "MATCH (c:Conversation {{uuid: $conv}}) \
                     CREATE (c)-[:HAS_SUMMARY]->(:Summary {{uuid: $uuid, \
                     conversation_uuid: $conv, level: $level, start_char: $start_char, \
                     end_char: $end_char, conversational: $conversational, \
                     actions: $actions, key_findings: $key_findings, \
                     files_mentioned: $files_mentioned, tools_used: $tools_used, \
                     created_at: $created_at{}}})",
                    embedding_fragment
                ),
                params,
            )
            .await?;
        Ok(())
    }

    async fn find_similar_summaries(
        &self,
        conversation_uuid: Option<&str>,
        query_embedding: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<(Summary, f32)>, MemoryError> {
        let mut params = Params::new();
        params.insert(
            "top_k".into(),
            ParamValue::Int(coerce_int(max_results)),
        );
        params.insert(
            "vector".into(),
            ParamValue::FloatList(query_embedding.to_vec()),
        );
        params.insert("min_score".into(), ParamValue::Float(min_score as f64));
        let conversation_clause = match conversation_uuid {
            Some(uuid) => {
                params.insert("conv".into(), ParamValue::String(uuid.to_string()));
                " AND node.conversation_uuid = $conv"
            }
            None => "",
        };

        let rows = self
            .store
            .run(
                &format!(
                    "CALL db.index.vector.queryNodes('summaryEmbeddings', $top_k, $vector) \
                     YIELD node, score WHERE score >= $min_score{} \
                     RETURN node, score ORDER BY score DESC",
                    conversation_clause
                ),
                params,
            )
            .await?;

        rows.iter()
            .map(|row| {
                let node: neo4rs::Node = row
                    .get("node")
                    .map_err(|e| MemoryError::Store(e.to_string()))?;
                let score: f64 = row
                    .get("score")
                    .map_err(|e| MemoryError::Store(e.to_string()))?;
                Ok((Self::node_to_summary(&node)?, score as f32))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(user: &str, assistant: &str) -> Turn {
        Turn::new(
            StoredMessage::new(Role::User, user),
            Vec::new(),
            StoredMessage::new(Role::Assistant, assistant),
        )
    }

    #[tokio::test]
    async fn test_total_chars_invariant() {
        let store = InMemoryConversationStore::new();
        let conversation = Conversation::new("t");
        store.create_conversation(&conversation).await.unwrap();

        store.append_turn(&conversation.uuid, turn("abc", "defgh")).await.unwrap();
        store.append_turn(&conversation.uuid, turn("ij", "k")).await.unwrap();

        let stored = store.get_conversation(&conversation.uuid).await.unwrap();
        let turns = store.get_turns(&conversation.uuid).await.unwrap();
        let sum: usize = turns.iter().map(|t| t.char_count()).sum();
        assert_eq!(stored.total_chars, sum);
        assert_eq!(stored.total_chars, 11);
        assert_eq!(stored.message_count, 4);

        // Offsets are cumulative.
        assert_eq!(turns[0].start_char, 0);
        assert_eq!(turns[1].start_char, 8);
    }

    #[tokio::test]
    async fn test_archived_is_read_only() {
        let store = InMemoryConversationStore::new();
        let conversation = Conversation::new("t");
        store.create_conversation(&conversation).await.unwrap();
        store.archive_conversation(&conversation.uuid).await.unwrap();

        let result = store.append_turn(&conversation.uuid, turn("a", "b")).await;
        assert!(matches!(result, Err(MemoryError::ConversationReadOnly(_))));
    }

    #[tokio::test]
    async fn test_recent_turns_window() {
        let store = InMemoryConversationStore::new();
        let conversation = Conversation::new("t");
        store.create_conversation(&conversation).await.unwrap();
        for i in 0..6 {
            store
                .append_turn(&conversation.uuid, turn(&format!("u{}", i), "aaaa"))
                .await
                .unwrap();
        }

        // Max 3 turns.
        let recent = store.get_recent_turns(&conversation.uuid, 10_000, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].user.content, "u3");
        assert_eq!(recent[2].user.content, "u5");

        // Char budget cuts earlier; the newest turn always fits.
        let recent = store.get_recent_turns(&conversation.uuid, 7, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user.content, "u5");
    }

    #[tokio::test]
    async fn test_find_similar_scoped_to_conversation() {
        let store = InMemoryConversationStore::new();
        for name in ["a", "b"] {
            let mut conversation = Conversation::new(name);
            conversation.uuid = name.to_string();
            store.create_conversation(&conversation).await.unwrap();
            let summary = Summary {
                uuid: format!("s-{}", name),
                conversation_uuid: name.to_string(),
                level: 1,
                start_char: 0,
                end_char: 10,
                conversational: "text".into(),
                actions: "acts".into(),
                key_findings: vec![],
                files_mentioned: vec![],
                tools_used: vec![],
                embedding: Some(vec![1.0, 0.0]),
                created_at: Utc::now(),
            };
            store.append_summary(&summary).await.unwrap();
        }

        let hits = store
            .find_similar_summaries(Some("a"), &[1.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.uuid, "s-a");
        assert!((hits[0].1 - 1.0).abs() < 1e-6);

        let hits = store
            .find_similar_summaries(None, &[1.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }
}
