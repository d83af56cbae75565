//! LLM reranking
//!
//! Candidates are chunked into batches and judged by the model through the
//! structured executor, with at most `parallel` batches in flight. Scores
//! are merged with the vector scores per the configured policy and the
//! final ordering is by merged score regardless of arrival order.

use futures::stream::{self, StreamExt};
use serde_json::Value;

use ragforge_config::constants::retrieval as defaults;
use ragforge_core::{sort_results, ScoreBreakdown, ScoreMerging, SearchResult};
use ragforge_llm::{
    OutputFormat, OutputSchema, SchemaField, SchemaNode, StructuredExecutor, StructuredRequest,
};

use crate::RetrievalError;

/// Rerank configuration.
#[derive(Debug, Clone)]
pub struct RerankConfig {
    /// The query the model judges relevance against
    pub query: String,
    /// Weighted-merge weights (vector, llm)
    pub weights: (f32, f32),
    pub batch_size: usize,
    /// Maximum concurrent batches
    pub parallel: usize,
    pub score_merging: ScoreMerging,
    /// Drop merged results below this score
    pub min_score: Option<f32>,
    /// Keep at most this many results after merging
    pub top_k: Option<usize>,
}

impl RerankConfig {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            weights: defaults::RERANK_WEIGHTS,
            batch_size: defaults::RERANK_BATCH_SIZE,
            parallel: defaults::RERANK_PARALLEL,
            score_merging: ScoreMerging::Weighted,
            min_score: None,
            top_k: None,
        }
    }

    pub fn with_merging(mut self, score_merging: ScoreMerging) -> Self {
        self.score_merging = score_merging;
        self
    }
}

/// Merge one LLM score with the vector score per policy. Both inputs are
/// expected in [0, 1]; with weights summing to 1 the result stays there.
pub fn merge_scores(
    vector_score: f32,
    llm_score: f32,
    policy: ScoreMerging,
    weights: (f32, f32),
) -> f32 {
    match policy {
        ScoreMerging::Weighted => weights.0 * vector_score + weights.1 * llm_score,
        ScoreMerging::Multiplicative => vector_score * llm_score,
        ScoreMerging::LlmOverride => llm_score,
    }
}

/// LLM reranker over the structured executor.
pub struct LlmReranker {
    executor: StructuredExecutor,
}

impl LlmReranker {
    pub fn new(executor: StructuredExecutor) -> Self {
        Self { executor }
    }

    fn batch_schema() -> OutputSchema {
        OutputSchema::new(vec![SchemaField::new(
            "scores",
            "relevance judgement per entity",
            true,
            SchemaNode::Array(Box::new(SchemaNode::Object(vec![
                SchemaField::string("uuid", "entity uuid, copied exactly", true),
                SchemaField::number("score", "relevance in [0, 1]", true),
                SchemaField::string("reasoning", "one-line justification", false),
            ]))),
        )])
    }

    fn batch_prompt(query: &str, batch: &[SearchResult]) -> String {
        let mut prompt = format!(
            "Score each candidate's relevance to the query.\n\nQuery: {}\n\nCandidates:\n",
            query
        );
        for result in batch {
            let description = result
                .entity
                .field_str("description")
                .or_else(|| result.entity.field_str("content"))
                .unwrap_or("");
            let description: String = description.chars().take(400).collect();
            prompt.push_str(&format!(
                "- uuid: {} | type: {} | name: {} | {}\n",
                result.entity.uuid, result.entity.entity_type, result.entity.name, description
            ));
        }
        prompt
    }

    /// Rerank the working set. On a non-fatal model failure the caller
    /// keeps the original set (this function returns the error; the
    /// pipeline decides).
    pub async fn rerank(
        &self,
        mut results: Vec<SearchResult>,
        config: &RerankConfig,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if results.is_empty() {
            return Ok(results);
        }

        // Null vector scores merge as the batch's mean vector score.
        let scored: Vec<f32> = results.iter().filter_map(|r| r.score).collect();
        let mean_vector_score = if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f32>() / scored.len() as f32
        };

        let batches: Vec<Vec<SearchResult>> = results
            .chunks(config.batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();

        let executor = &self.executor;
        let query = &config.query;
        let judged: Vec<Result<Vec<(String, f32)>, RetrievalError>> = stream::iter(batches)
            .map(|batch| async move {
                let request = StructuredRequest::new(
                    Self::batch_prompt(query, &batch),
                    Self::batch_schema(),
                );
                let outcome = executor.execute(&request).await?;
                let scores = outcome.value["scores"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                Ok(scores
                    .iter()
                    .filter_map(|entry: &Value| {
                        let uuid = entry.get("uuid")?.as_str()?.to_string();
                        let score = entry.get("score")?.as_f64()? as f32;
                        Some((uuid, score.clamp(0.0, 1.0)))
                    })
                    .collect())
            })
            .buffer_unordered(config.parallel.max(1))
            .collect()
            .await;

        let mut llm_scores: std::collections::HashMap<String, f32> = std::collections::HashMap::new();
        for batch in judged {
            for (uuid, score) in batch? {
                llm_scores.insert(uuid, score);
            }
        }

        for result in results.iter_mut() {
            let Some(&llm_score) = llm_scores.get(&result.entity.uuid) else {
                continue;
            };
            let vector_score = result.score.unwrap_or(mean_vector_score);
            let merged = merge_scores(vector_score, llm_score, config.score_merging, config.weights);
            result.score = Some(merged);
            result.score_merging = Some(config.score_merging);
            let breakdown = result.score_breakdown.get_or_insert(ScoreBreakdown::default());
            breakdown.llm = Some(llm_score);
            if breakdown.vector.is_none() {
                breakdown.vector = Some(vector_score);
            }
        }

        sort_results(&mut results);

        if let Some(min_score) = config.min_score {
            results.retain(|r| r.score.map_or(false, |s| s >= min_score));
        }
        if let Some(top_k) = config.top_k {
            results.truncate(top_k);
        }

        Ok(results)
    }
}
