//! Hierarchical summarization
//!
//! Level-1 summaries condense unsummarised turns once either threshold is
//! crossed, always keeping the two most recent turns out for continuity.
//! Level-L summaries promote into level L+1 when their text volume
//! crosses the promotion threshold, keeping the most recent one out.
//! Promotion never passes `summary_levels`.
//!
//! Summarisation runs in a spawned task and never blocks turn appends. A
//! failed attempt only delays compaction: the unsummarised tail keeps
//! growing and is retried at the next threshold crossing.

use chrono::Utc;
use std::sync::Arc;

use ragforge_config::constants::memory as defaults;
use ragforge_llm::{
    EmbeddingProvider, OutputSchema, SchemaField, SchemaNode, StructuredExecutor,
    StructuredRequest,
};

use crate::conversation::{Summary, Turn};
use crate::store::{ConversationStore, SummaryFilter};
use crate::MemoryError;

/// Turns kept out of a fresh level-1 summary for continuity.
const KEEP_RECENT_TURNS: usize = 2;
/// Same-level summaries kept out of a promotion.
const KEEP_RECENT_SUMMARIES: usize = 1;

/// Summarization thresholds.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// New-turn characters that trigger a level-1 summary
    pub summarize_every_n_chars: usize,
    /// New-turn count that triggers a level-1 summary
    pub max_turns_before_summarize: usize,
    /// Highest level promotion may create
    pub summary_levels: usize,
    /// Same-level summary characters that trigger promotion
    pub max_chars_before_summarize_summaries: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            summarize_every_n_chars: defaults::SUMMARIZE_EVERY_N_CHARS,
            max_turns_before_summarize: defaults::MAX_TURNS_BEFORE_SUMMARIZE,
            summary_levels: defaults::SUMMARY_LEVELS,
            max_chars_before_summarize_summaries: defaults::MAX_CHARS_BEFORE_SUMMARIZE_SUMMARIES,
        }
    }
}

/// Drives summary creation and promotion for one store.
pub struct HierarchicalSummarizer {
    store: Arc<dyn ConversationStore>,
    executor: StructuredExecutor,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: SummarizerConfig,
}

impl HierarchicalSummarizer {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        executor: StructuredExecutor,
        config: SummarizerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            embedder: None,
            config,
        }
    }

    /// Embed summaries as they are created so they participate in
    /// RAG-on-summaries retrieval.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Fire-and-forget trigger. Failures are logged; the next threshold
    /// crossing retries.
    pub fn trigger(self: &Arc<Self>, conversation_uuid: String) {
        let summarizer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = summarizer.run_once(&conversation_uuid).await {
                tracing::warn!(
                    conversation = %conversation_uuid,
                    error = %err,
                    "Summarization attempt failed; will retry at next threshold"
                );
            }
        });
    }

    /// One summarization pass: level-1 creation, then promotions.
    pub async fn run_once(&self, conversation_uuid: &str) -> Result<(), MemoryError> {
        self.summarize_turns(conversation_uuid).await?;
        for level in 1..self.config.summary_levels {
            self.promote_level(conversation_uuid, level).await?;
        }
        Ok(())
    }

    /// Create a level-1 summary when enough unsummarised material exists.
    async fn summarize_turns(&self, conversation_uuid: &str) -> Result<(), MemoryError> {
        let turns = self.store.get_turns(conversation_uuid).await?;
        let level_one = self
            .store
            .get_summaries(conversation_uuid, &SummaryFilter::level(1))
            .await?;
        let summarized_until = level_one.iter().map(|s| s.end_char).max().unwrap_or(0);

        let unsummarized: Vec<&Turn> = turns
            .iter()
            .filter(|t| t.start_char >= summarized_until)
            .collect();
        let unsummarized_chars: usize = unsummarized.iter().map(|t| t.char_count()).sum();

        let over_turns = unsummarized.len() > self.config.max_turns_before_summarize;
        let over_chars = unsummarized_chars > self.config.summarize_every_n_chars;
        if !over_turns && !over_chars {
            return Ok(());
        }
        if unsummarized.len() <= KEEP_RECENT_TURNS {
            return Ok(());
        }

        // Summarise everything except the most recent two turns.
        let to_summarize = &unsummarized[..unsummarized.len() - KEEP_RECENT_TURNS];
        let start_char = to_summarize[0].start_char;
        let end_char = to_summarize[to_summarize.len() - 1].end_char();

        let mut block = String::new();
        for turn in to_summarize {
            block.push_str(&format!("User: {}\n", turn.user.content));
            for call in &turn.tool_calls {
                block.push_str(&format!(
                    "Tool {}: {}\n",
                    call.tool_name,
                    call.output.to_string().chars().take(500).collect::<String>()
                ));
            }
            block.push_str(&format!("Assistant: {}\n\n", turn.assistant.content));
        }

        let summary = self
            .synthesize(conversation_uuid, 1, start_char, end_char, &block)
            .await?;
        self.store.append_summary(&summary).await?;
        tracing::debug!(
            conversation = conversation_uuid,
            start_char,
            end_char,
            "Created level-1 summary"
        );
        Ok(())
    }

    /// Promote level-L summaries into one level-(L+1) summary when their
    /// combined text volume crosses the threshold.
    async fn promote_level(&self, conversation_uuid: &str, level: usize) -> Result<(), MemoryError> {
        let current = self
            .store
            .get_summaries(conversation_uuid, &SummaryFilter::level(level))
            .await?;
        let higher = self
            .store
            .get_summaries(conversation_uuid, &SummaryFilter::level(level + 1))
            .await?;
        let promoted_until = higher.iter().map(|s| s.end_char).max().unwrap_or(0);

        let pending: Vec<&Summary> = current
            .iter()
            .filter(|s| s.start_char >= promoted_until)
            .collect();
        let pending_chars: usize = pending.iter().map(|s| s.text_chars()).sum();

        if pending_chars <= self.config.max_chars_before_summarize_summaries
            || pending.len() <= KEEP_RECENT_SUMMARIES
        {
            return Ok(());
        }

        let to_promote = &pending[..pending.len() - KEEP_RECENT_SUMMARIES];

        // Coverage check: the promoted ranges must be contiguous so the
        // new summary's range equals their union.
        for pair in to_promote.windows(2) {
            if pair[0].end_char != pair[1].start_char {
                return Err(MemoryError::SummaryPromotionFailed(format!(
                    "level {} ranges not contiguous at {}..{}",
                    level, pair[0].end_char, pair[1].start_char
                )));
            }
        }

        let start_char = to_promote[0].start_char;
        let end_char = to_promote[to_promote.len() - 1].end_char;

        let mut block = String::new();
        for summary in to_promote {
            block.push_str(&format!(
                "Summary [{}..{}):\n{}\nActions: {}\n\n",
                summary.start_char, summary.end_char, summary.conversational, summary.actions
            ));
        }

        let summary = self
            .synthesize(conversation_uuid, level + 1, start_char, end_char, &block)
            .await?;
        self.store.append_summary(&summary).await?;
        tracing::debug!(
            conversation = conversation_uuid,
            level = level + 1,
            start_char,
            end_char,
            "Promoted summaries"
        );
        Ok(())
    }

    fn schema() -> OutputSchema {
        OutputSchema::new(vec![
            SchemaField::string(
                "conversational",
                "a paragraph summarising the discussion in narrative form",
                true,
            ),
            SchemaField::string(
                "actions",
                "a paragraph listing what was done: searches, files read, conclusions",
                true,
            ),
            SchemaField::new(
                "key_findings",
                "the important facts established",
                false,
                SchemaNode::Array(Box::new(SchemaNode::String)),
            ),
            SchemaField::new(
                "files_mentioned",
                "file paths referenced",
                false,
                SchemaNode::Array(Box::new(SchemaNode::String)),
            ),
            SchemaField::new(
                "tools_used",
                "tools invoked",
                false,
                SchemaNode::Array(Box::new(SchemaNode::String)),
            ),
        ])
    }

    async fn synthesize(
        &self,
        conversation_uuid: &str,
        level: usize,
        start_char: usize,
        end_char: usize,
        block: &str,
    ) -> Result<Summary, MemoryError> {
        let task = if level == 1 {
            "Summarize this conversation segment."
        } else {
            "Condense these summaries into one higher-level summary."
        };
        let request = StructuredRequest::new(task, Self::schema()).with_input("segment", block);
        let outcome = self.executor.execute(&request).await?;
        let value = outcome.value;

        let strings = |key: &str| -> Vec<String> {
            value[key]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default()
        };

        let conversational = value["conversational"].as_str().unwrap_or("").to_string();
        let embedding = match &self.embedder {
            Some(embedder) => Some(
                embedder
                    .embed(&conversational, "summaryEmbeddings")
                    .await?,
            ),
            None => None,
        };

        Ok(Summary {
            uuid: uuid::Uuid::new_v4().to_string(),
            conversation_uuid: conversation_uuid.to_string(),
            level,
            start_char,
            end_char,
            conversational,
            actions: value["actions"].as_str().unwrap_or("").to_string(),
            key_findings: strings("key_findings"),
            files_mentioned: strings("files_mentioned"),
            tools_used: strings("tools_used"),
            embedding,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, StoredMessage};
    use crate::store::InMemoryConversationStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use ragforge_core::Role;
    use ragforge_llm::{CompletionBackend, CompletionProvider, LlmError};

    /// Backend that always emits a fixed, valid summary JSON.
    struct SummaryBackend {
        calls: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionBackend for SummaryBackend {
        async fn generate(&self, _prompt: &str, _request_id: &str) -> Result<String, LlmError> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(LlmError::GenProviderDown("down".to_string()));
            }
            Ok(r#"{"conversational": "we talked", "actions": "we searched",
                   "key_findings": ["f1"], "files_mentioned": ["src/lib.rs"],
                   "tools_used": ["search_entities"]}"#
                .to_string())
        }

        fn model_name(&self) -> &str {
            "mock"
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    fn summarizer(
        store: Arc<dyn ConversationStore>,
        config: SummarizerConfig,
        fail: bool,
    ) -> HierarchicalSummarizer {
        let backend = Arc::new(SummaryBackend {
            calls: Mutex::new(0),
            fail,
        });
        HierarchicalSummarizer::new(
            store,
            StructuredExecutor::new(CompletionProvider::new(backend)),
            config,
        )
    }

    fn turn(chars: usize) -> Turn {
        let half = chars / 2;
        Turn::new(
            StoredMessage::new(Role::User, "u".repeat(half)),
            Vec::new(),
            StoredMessage::new(Role::Assistant, "a".repeat(chars - half)),
        )
    }

    async fn seed_conversation(store: &InMemoryConversationStore, turns: usize, chars: usize) -> String {
        let conversation = Conversation::new("t");
        let uuid = conversation.uuid.clone();
        store.create_conversation(&conversation).await.unwrap();
        for _ in 0..turns {
            store.append_turn(&uuid, turn(chars)).await.unwrap();
        }
        uuid
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_threshold_creates_level_one() {
        let store = Arc::new(InMemoryConversationStore::new());
        // 6 turns of 120 chars with a 500-char threshold: the char
        // threshold fires; turns 1..4 are summarised, the last two stay.
        let uuid = seed_conversation(&store, 6, 120).await;
        let config = SummarizerConfig {
            summarize_every_n_chars: 500,
            max_turns_before_summarize: 5,
            ..Default::default()
        };

        let summarizer = summarizer(store.clone(), config, false);
        summarizer.run_once(&uuid).await.unwrap();

        let summaries = store.get_summaries(&uuid, &SummaryFilter::level(1)).await.unwrap();
        assert_eq!(summaries.len(), 1);
        // Covers the first four turns: [0, 480).
        assert_eq!(summaries[0].start_char, 0);
        assert_eq!(summaries[0].end_char, 480);
        assert_eq!(summaries[0].conversational, "we talked");
        assert_eq!(summaries[0].tools_used, vec!["search_entities"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_no_summary() {
        let store = Arc::new(InMemoryConversationStore::new());
        let uuid = seed_conversation(&store, 3, 50).await;
        let summarizer = summarizer(store.clone(), SummarizerConfig::default(), false);

        summarizer.run_once(&uuid).await.unwrap();
        let summaries = store.get_summaries(&uuid, &SummaryFilter::default()).await.unwrap();
        assert!(summaries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_summary_starts_after_first() {
        let store = Arc::new(InMemoryConversationStore::new());
        let uuid = seed_conversation(&store, 6, 120).await;
        let config = SummarizerConfig {
            summarize_every_n_chars: 500,
            max_turns_before_summarize: 5,
            ..Default::default()
        };
        let summarizer = summarizer(store.clone(), config, false);
        summarizer.run_once(&uuid).await.unwrap();

        // Four more turns of new material crosses the threshold again.
        for _ in 0..4 {
            store.append_turn(&uuid, turn(120)).await.unwrap();
        }
        summarizer.run_once(&uuid).await.unwrap();

        let summaries = store.get_summaries(&uuid, &SummaryFilter::level(1)).await.unwrap();
        assert_eq!(summaries.len(), 2);
        // Strictly after the previous same-level summary's range.
        assert_eq!(summaries[1].start_char, summaries[0].end_char);
        assert!(summaries[1].end_char > summaries[1].start_char);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_preserves_coverage() {
        let store = Arc::new(InMemoryConversationStore::new());
        let conversation = Conversation::new("t");
        let uuid = conversation.uuid.clone();
        store.create_conversation(&conversation).await.unwrap();

        // Seed three contiguous level-1 summaries with big text volumes.
        for i in 0..3 {
            let summary = Summary {
                uuid: format!("l1-{}", i),
                conversation_uuid: uuid.clone(),
                level: 1,
                start_char: i * 1000,
                end_char: (i + 1) * 1000,
                conversational: "c".repeat(6000),
                actions: "a".repeat(6000),
                key_findings: vec![],
                files_mentioned: vec![],
                tools_used: vec![],
                embedding: None,
                created_at: Utc::now(),
            };
            store.append_summary(&summary).await.unwrap();
        }

        let config = SummarizerConfig {
            max_chars_before_summarize_summaries: 10_000,
            summary_levels: 3,
            ..Default::default()
        };
        let summarizer = summarizer(store.clone(), config, false);
        summarizer.run_once(&uuid).await.unwrap();

        let level_two = store.get_summaries(&uuid, &SummaryFilter::level(2)).await.unwrap();
        assert_eq!(level_two.len(), 1);
        // Union of the two promoted ranges: [0, 2000). The newest level-1
        // summary stays unpromoted.
        assert_eq!(level_two[0].start_char, 0);
        assert_eq!(level_two[0].end_char, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_stops_at_max_level() {
        let store = Arc::new(InMemoryConversationStore::new());
        let conversation = Conversation::new("t");
        let uuid = conversation.uuid.clone();
        store.create_conversation(&conversation).await.unwrap();

        for i in 0..3 {
            let summary = Summary {
                uuid: format!("l2-{}", i),
                conversation_uuid: uuid.clone(),
                level: 2,
                start_char: i * 1000,
                end_char: (i + 1) * 1000,
                conversational: "c".repeat(6000),
                actions: "a".repeat(6000),
                key_findings: vec![],
                files_mentioned: vec![],
                tools_used: vec![],
                embedding: None,
                created_at: Utc::now(),
            };
            store.append_summary(&summary).await.unwrap();
        }

        // summary_levels = 2 means level 3 must never appear.
        let config = SummarizerConfig {
            summary_levels: 2,
            ..Default::default()
        };
        let summarizer = summarizer(store.clone(), config, false);
        summarizer.run_once(&uuid).await.unwrap();

        let level_three = store.get_summaries(&uuid, &SummaryFilter::level(3)).await.unwrap();
        assert!(level_three.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_tail_for_retry() {
        let store = Arc::new(InMemoryConversationStore::new());
        let uuid = seed_conversation(&store, 8, 120).await;
        let config = SummarizerConfig {
            summarize_every_n_chars: 500,
            ..Default::default()
        };

        // A failing model leaves no summary behind.
        let failing = summarizer(store.clone(), config.clone(), true);
        assert!(failing.run_once(&uuid).await.is_err());
        assert!(store
            .get_summaries(&uuid, &SummaryFilter::default())
            .await
            .unwrap()
            .is_empty());

        // The next pass with a healthy model picks the tail up.
        let healthy = summarizer(store.clone(), config, false);
        healthy.run_once(&uuid).await.unwrap();
        assert_eq!(
            store
                .get_summaries(&uuid, &SummaryFilter::level(1))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
