//! Dual-context retrieval
//!
//! Two slots feed the agent: the newest turns (bounded by chars and
//! count, chronological) and RAG over the conversation's summary
//! embeddings with per-level boost and optional recency decay. The
//! rendered context lists the highest-level summaries first, then lower
//! levels, then the recent turns.

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use ragforge_config::constants::memory as defaults;
use ragforge_llm::EmbeddingProvider;

use crate::conversation::{Summary, Turn};
use crate::store::ConversationStore;
use crate::MemoryError;

/// Context retrieval parameters. The store-side defaults are
/// authoritative; caller overrides replace them when set.
#[derive(Debug, Clone)]
pub struct ContextQuery {
    pub recent_max_chars: usize,
    pub recent_max_turns: usize,
    pub rag_max_summaries: usize,
    pub rag_min_score: f32,
    /// Per-level score boost
    pub level_boosts: HashMap<usize, f32>,
    /// Recency decay `exp(-age_days / decay_days)`; disabled when `None`
    pub decay_days: Option<f64>,
    /// Normalise file references against this root
    pub project_root: Option<String>,
}

impl Default for ContextQuery {
    fn default() -> Self {
        Self {
            recent_max_chars: defaults::RECENT_CONTEXT_MAX_CHARS,
            recent_max_turns: defaults::RECENT_CONTEXT_MAX_TURNS,
            rag_max_summaries: defaults::RAG_MAX_SUMMARIES,
            rag_min_score: defaults::RAG_MIN_SCORE,
            level_boosts: defaults::LEVEL_BOOSTS.iter().copied().collect(),
            decay_days: Some(defaults::DECAY_DAYS),
            project_root: None,
        }
    }
}

impl ContextQuery {
    fn boost_for(&self, level: usize) -> f32 {
        self.level_boosts.get(&level).copied().unwrap_or(1.0)
    }
}

/// The assembled context.
#[derive(Debug, Clone)]
pub struct DualContext {
    /// Matched summaries with adjusted scores, highest level first
    pub summaries: Vec<(Summary, f32)>,
    /// Recent turns, chronological
    pub recent_turns: Vec<Turn>,
}

impl DualContext {
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty() && self.recent_turns.is_empty()
    }

    /// Render as one text block for the prompt.
    pub fn render(&self, query: &ContextQuery) -> String {
        let mut out = String::new();

        if !self.summaries.is_empty() {
            out.push_str("## Earlier in this conversation\n");
            for (summary, score) in &self.summaries {
                out.push_str(&format!(
                    "[level {} | relevance {:.2}] {}\nActions: {}\n",
                    summary.level, score, summary.conversational, summary.actions
                ));
                if !summary.files_mentioned.is_empty() {
                    let files: Vec<String> = summary
                        .files_mentioned
                        .iter()
                        .map(|f| normalize_path(f, query.project_root.as_deref()))
                        .collect();
                    out.push_str(&format!("Files: {}\n", files.join(", ")));
                }
                out.push('\n');
            }
        }

        if !self.recent_turns.is_empty() {
            out.push_str("## Recent turns\n");
            for turn in &self.recent_turns {
                out.push_str(&format!("User: {}\n", turn.user.content));
                for call in &turn.tool_calls {
                    out.push_str(&format!("Tool {} -> {}\n", call.tool_name, call.output));
                }
                out.push_str(&format!("Assistant: {}\n\n", turn.assistant.content));
            }
        }

        out
    }
}

/// Make a file reference relative to the project root where possible.
fn normalize_path(path: &str, project_root: Option<&str>) -> String {
    let Some(root) = project_root else {
        return path.to_string();
    };
    Path::new(path)
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string())
}

/// Builds dual contexts against a store and embedder.
pub struct ContextBuilder {
    store: Arc<dyn ConversationStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Build the context for a query in one conversation.
    pub async fn build(
        &self,
        conversation_uuid: &str,
        query_text: &str,
        query: &ContextQuery,
    ) -> Result<DualContext, MemoryError> {
        let recent_turns = self
            .store
            .get_recent_turns(conversation_uuid, query.recent_max_chars, query.recent_max_turns)
            .await?;

        let mut summaries: Vec<(Summary, f32)> = Vec::new();
        if let Some(embedder) = &self.embedder {
            let embedding = embedder.embed(query_text, "summaryEmbeddings").await?;
            // Over-fetch before boosting so the threshold applies to the
            // adjusted scores.
            let candidates = self
                .store
                .find_similar_summaries(
                    Some(conversation_uuid),
                    &embedding,
                    query.rag_max_summaries * 3,
                    0.0,
                )
                .await?;

            let now = Utc::now();
            summaries = candidates
                .into_iter()
                .map(|(summary, score)| {
                    let mut adjusted = score * query.boost_for(summary.level);
                    if let Some(decay_days) = query.decay_days {
                        let age_days = (now - summary.created_at).num_seconds().max(0) as f64
                            / 86_400.0;
                        adjusted *= (-age_days / decay_days).exp() as f32;
                    }
                    (summary, adjusted)
                })
                .filter(|(_, score)| *score >= query.rag_min_score)
                .collect();
            summaries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            summaries.truncate(query.rag_max_summaries);
            // Highest level first in the rendered context.
            summaries.sort_by(|a, b| b.0.level.cmp(&a.0.level));
        }

        Ok(DualContext {
            summaries,
            recent_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, StoredMessage};
    use crate::store::InMemoryConversationStore;
    use async_trait::async_trait;
    use ragforge_core::Role;
    use ragforge_llm::LlmError;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        async fn embed(&self, _text: &str, _index_name: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn summary(uuid: &str, level: usize, embedding: Vec<f32>) -> Summary {
        Summary {
            uuid: uuid.to_string(),
            conversation_uuid: "c1".to_string(),
            level,
            start_char: 0,
            end_char: 10,
            conversational: format!("summary {}", uuid),
            actions: "did things".to_string(),
            key_findings: vec![],
            files_mentioned: vec!["/project/src/lib.rs".to_string()],
            tools_used: vec![],
            embedding: Some(embedding),
            created_at: Utc::now(),
        }
    }

    async fn seeded_store() -> Arc<InMemoryConversationStore> {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut conversation = Conversation::new("c");
        conversation.uuid = "c1".to_string();
        store.create_conversation(&conversation).await.unwrap();
        store
            .append_turn(
                "c1",
                Turn::new(
                    StoredMessage::new(Role::User, "hello"),
                    Vec::new(),
                    StoredMessage::new(Role::Assistant, "hi"),
                ),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_level_boost_orders_summaries() {
        let store = seeded_store().await;
        // Same raw similarity; the level-3 summary should outrank after
        // boosting and render first.
        store.append_summary(&summary("s1", 1, vec![1.0, 0.0])).await.unwrap();
        store.append_summary(&summary("s3", 3, vec![1.0, 0.0])).await.unwrap();

        let builder = ContextBuilder::new(store).with_embedder(Arc::new(UnitEmbedder));
        let query = ContextQuery {
            decay_days: None,
            ..Default::default()
        };
        let context = builder.build("c1", "what happened", &query).await.unwrap();

        assert_eq!(context.summaries.len(), 2);
        assert_eq!(context.summaries[0].0.uuid, "s3");
        assert!(context.summaries[0].1 > context.summaries[1].1);
        assert_eq!(context.recent_turns.len(), 1);
    }

    #[tokio::test]
    async fn test_min_score_filters_weak_matches() {
        let store = seeded_store().await;
        store.append_summary(&summary("weak", 1, vec![0.1, 0.99])).await.unwrap();

        let builder = ContextBuilder::new(store).with_embedder(Arc::new(UnitEmbedder));
        let context = builder
            .build("c1", "query", &ContextQuery::default())
            .await
            .unwrap();
        assert!(context.summaries.is_empty());
    }

    #[tokio::test]
    async fn test_render_normalizes_paths_and_orders_sections() {
        let store = seeded_store().await;
        store.append_summary(&summary("s1", 1, vec![1.0, 0.0])).await.unwrap();

        let builder = ContextBuilder::new(store).with_embedder(Arc::new(UnitEmbedder));
        let query = ContextQuery {
            decay_days: None,
            project_root: Some("/project".to_string()),
            ..Default::default()
        };
        let context = builder.build("c1", "query", &query).await.unwrap();
        let rendered = context.render(&query);

        let summaries_at = rendered.find("Earlier in this conversation").unwrap();
        let recent_at = rendered.find("Recent turns").unwrap();
        assert!(summaries_at < recent_at);
        assert!(rendered.contains("src/lib.rs"));
        assert!(!rendered.contains("/project/src/lib.rs"));
    }

    #[tokio::test]
    async fn test_no_embedder_recent_only() {
        let store = seeded_store().await;
        let builder = ContextBuilder::new(store);
        let context = builder
            .build("c1", "query", &ContextQuery::default())
            .await
            .unwrap();
        assert!(context.summaries.is_empty());
        assert_eq!(context.recent_turns.len(), 1);
    }
}
