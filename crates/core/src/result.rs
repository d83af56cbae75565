//! Search results and score tracking
//!
//! Every retrieval stage hands back a list of [`SearchResult`]s. Scores live
//! in `[0, 1]`; entities introduced by graph expansion carry no score and
//! sort after all scored entries.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// How an LLM rerank score is merged with the pre-existing vector score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreMerging {
    /// `w_vec * vec + w_llm * llm` (weights default to 0.3 / 0.7)
    #[default]
    Weighted,
    /// `vec * llm`
    Multiplicative,
    /// LLM score replaces the vector score
    LlmOverride,
}

/// Per-source score components, kept for diagnostics and merging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ScoreBreakdown {
    /// Cosine score from the vector index, if a semantic step ran
    pub vector: Option<f32>,
    /// LLM rerank score, if a rerank step ran
    pub llm: Option<f32>,
    /// Keyword boost added on top, if boosting ran
    pub boost: Option<f32>,
}

/// Annotation attached when a keyword boost fires on a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordBoost {
    /// The keyword that matched
    pub keyword: String,
    /// Similarity of the best field/token match, in `[0, 1]`
    pub similarity: f32,
    /// Score increase actually applied
    pub boost: f32,
}

/// A single retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub entity: Entity,
    /// `None` for entities introduced by expansion
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<ScoreBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_boost: Option<KeywordBoost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_merging: Option<ScoreMerging>,
}

impl SearchResult {
    /// A scored result with no breakdown yet.
    pub fn scored(entity: Entity, score: f32) -> Self {
        Self {
            entity,
            score: Some(score),
            score_breakdown: None,
            keyword_boost: None,
            score_merging: None,
        }
    }

    /// An unscored result (introduced by expansion).
    pub fn unscored(entity: Entity) -> Self {
        Self {
            entity,
            score: None,
            score_breakdown: None,
            keyword_boost: None,
            score_merging: None,
        }
    }

    /// Result of a semantic step: score plus vector breakdown.
    pub fn from_vector(entity: Entity, score: f32) -> Self {
        Self {
            entity,
            score: Some(score),
            score_breakdown: Some(ScoreBreakdown {
                vector: Some(score),
                ..Default::default()
            }),
            keyword_boost: None,
            score_merging: None,
        }
    }
}

/// Sort results score-descending. Entries with `score = None` sort last;
/// ties keep insertion order (stable sort).
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| match (a.score, b.score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(uuid: &str) -> Entity {
        Entity::new(uuid, "Scope", uuid)
    }

    #[test]
    fn test_sort_descending_nulls_last() {
        let mut results = vec![
            SearchResult::unscored(entity("a")),
            SearchResult::scored(entity("b"), 0.4),
            SearchResult::scored(entity("c"), 0.9),
            SearchResult::unscored(entity("d")),
            SearchResult::scored(entity("e"), 0.4),
        ];

        sort_results(&mut results);

        let order: Vec<&str> = results.iter().map(|r| r.entity.uuid.as_str()).collect();
        // c first, then the two 0.4s in insertion order, then the unscored
        // entries in insertion order.
        assert_eq!(order, vec!["c", "b", "e", "a", "d"]);
    }

    #[test]
    fn test_sort_is_non_increasing() {
        let mut results = vec![
            SearchResult::scored(entity("a"), 0.1),
            SearchResult::scored(entity("b"), 0.8),
            SearchResult::scored(entity("c"), 0.5),
        ];
        sort_results(&mut results);

        for pair in results.windows(2) {
            assert!(pair[0].score.unwrap() >= pair[1].score.unwrap());
        }
    }

    #[test]
    fn test_score_merging_serde() {
        let json = serde_json::to_string(&ScoreMerging::LlmOverride).unwrap();
        assert_eq!(json, "\"llm-override\"");
        let parsed: ScoreMerging = serde_json::from_str("\"multiplicative\"").unwrap();
        assert_eq!(parsed, ScoreMerging::Multiplicative);
    }
}
