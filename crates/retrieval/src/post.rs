//! Search post-processor
//!
//! A strict pipeline over results coming out of the query pipeline:
//! (1) optional LLM rerank of the full candidate set, (2) optional keyword
//! boost, (3) final limit, (4) optional bounded relationship exploration,
//! (5) optional LLM summarization. A rerank failure is non-fatal and
//! leaves the candidate order untouched.

use std::sync::Arc;

use ragforge_core::SearchResult;

use crate::boost::{apply_keyword_boost, KeywordBoostConfig};
use crate::explore::{ExplorationGraph, ExploreConfig, GraphExplorer};
use crate::rerank::{LlmReranker, RerankConfig};
use crate::summarize::{ResultSummarizer, ResultSummary};
use crate::{is_fatal_cause, RetrievalError};

/// Which post-processing stages run, and how.
#[derive(Default)]
pub struct PostProcessConfig {
    pub rerank: Option<RerankConfig>,
    /// Keyword boosting runs when keywords are present
    pub boost: Option<KeywordBoostConfig>,
    pub limit: Option<usize>,
    pub explore: Option<ExploreConfig>,
    /// Summarize against this query when set
    pub summarize_query: Option<String>,
}

/// Post-processing output.
pub struct PostProcessed {
    pub results: Vec<SearchResult>,
    pub exploration: Option<ExplorationGraph>,
    pub summary: Option<ResultSummary>,
    /// True when a rerank was requested but failed non-fatally
    pub rerank_failed: bool,
}

/// Composes the post-processing stages.
pub struct PostProcessor {
    reranker: Option<Arc<LlmReranker>>,
    explorer: Option<Arc<GraphExplorer>>,
    summarizer: Option<Arc<ResultSummarizer>>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self {
            reranker: None,
            explorer: None,
            summarizer: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<LlmReranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_explorer(mut self, explorer: Arc<GraphExplorer>) -> Self {
        self.explorer = Some(explorer);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<ResultSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub async fn process(
        &self,
        mut results: Vec<SearchResult>,
        config: &PostProcessConfig,
    ) -> Result<PostProcessed, RetrievalError> {
        let mut rerank_failed = false;

        // (1) LLM rerank on the full candidate set.
        if let (Some(rerank_config), Some(reranker)) = (&config.rerank, &self.reranker) {
            match reranker.rerank(results.clone(), rerank_config).await {
                Ok(reranked) => results = reranked,
                Err(err) if is_fatal_cause(&err) => return Err(err),
                Err(err) => {
                    tracing::warn!(error = %err, "LLM rerank failed; keeping original order");
                    rerank_failed = true;
                }
            }
        }

        // (2) Keyword boost.
        if let Some(boost_config) = &config.boost {
            apply_keyword_boost(&mut results, boost_config);
        }

        // (3) Final limit.
        if let Some(limit) = config.limit {
            results.truncate(limit);
        }

        // (4) Relationship exploration around the surviving results.
        let exploration = match (&config.explore, &self.explorer) {
            (Some(explore_config), Some(explorer)) => {
                Some(explorer.explore(&results, explore_config).await?)
            }
            _ => None,
        };

        // (5) Summarization of the limited results.
        let summary = match (&config.summarize_query, &self.summarizer) {
            (Some(query), Some(summarizer)) => Some(summarizer.summarize(query, &results).await?),
            _ => None,
        };

        Ok(PostProcessed {
            results,
            exploration,
            summary,
            rerank_failed,
        })
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}
