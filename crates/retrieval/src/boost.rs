//! Keyword boosting
//!
//! After vector search, results whose canonical text fields match a
//! user-supplied keyword get a score bump: exact case-insensitive
//! substring matches count as similarity 1.0, otherwise fields are
//! tokenised and the best token-level Levenshtein similarity wins. The
//! boost is `similarity * boost_weight`, gated by `min_similarity`, and a
//! result takes the maximum boost across all fields and keywords.

use once_cell::sync::Lazy;
use regex::Regex;

use ragforge_config::constants::retrieval as defaults;
use ragforge_core::{sort_results, KeywordBoost, ScoreBreakdown, SearchResult};

/// Delimiters that split a field into comparable tokens.
static TOKEN_DELIMITERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s.\-_/\\:,;()\[\]{}]+").expect("valid delimiter class"));

/// The canonical text fields scanned for keyword matches, in order.
const BOOST_FIELDS: [&str; 5] = ["name", "file_path", "path", "title", "signature"];

/// Keyword boost configuration.
#[derive(Debug, Clone)]
pub struct KeywordBoostConfig {
    pub keywords: Vec<String>,
    /// Weight applied to the best similarity
    pub boost_weight: f32,
    /// Matches below this similarity are ignored
    pub min_similarity: f32,
}

impl Default for KeywordBoostConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            boost_weight: defaults::BOOST_WEIGHT,
            min_similarity: defaults::MIN_SIMILARITY,
        }
    }
}

impl KeywordBoostConfig {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords,
            ..Default::default()
        }
    }
}

/// Best similarity of `keyword` against one field value.
fn field_similarity(field_value: &str, keyword: &str) -> f32 {
    let value_lower = field_value.to_lowercase();
    let keyword_lower = keyword.to_lowercase();

    if value_lower.contains(&keyword_lower) {
        return 1.0;
    }

    TOKEN_DELIMITERS
        .split(&value_lower)
        .filter(|token| token.len() > defaults::MIN_TOKEN_LEN - 1)
        .map(|token| strsim::normalized_levenshtein(token, &keyword_lower) as f32)
        .fold(0.0, f32::max)
}

/// The candidate text fields of one result.
fn boostable_fields(result: &SearchResult) -> Vec<(&'static str, String)> {
    let mut fields = vec![("name", result.entity.name.clone())];
    for name in &BOOST_FIELDS[1..] {
        if let Some(value) = result.entity.field_str(name) {
            fields.push((name, value.to_string()));
        }
    }
    fields
}

/// Apply keyword boosting in place and re-sort descending. An empty
/// keyword list is a no-op.
pub fn apply_keyword_boost(results: &mut Vec<SearchResult>, config: &KeywordBoostConfig) {
    if config.keywords.is_empty() {
        return;
    }

    for result in results.iter_mut() {
        let mut best: Option<(String, f32)> = None;
        for (_, value) in boostable_fields(result) {
            for keyword in &config.keywords {
                let similarity = field_similarity(&value, keyword);
                if similarity >= config.min_similarity
                    && best.as_ref().map_or(true, |(_, s)| similarity > *s)
                {
                    best = Some((keyword.clone(), similarity));
                }
            }
        }

        if let Some((keyword, similarity)) = best {
            let boost = similarity * config.boost_weight;
            result.score = Some(result.score.unwrap_or(0.0) + boost);
            result.keyword_boost = Some(KeywordBoost {
                keyword,
                similarity,
                boost,
            });
            let breakdown = result.score_breakdown.get_or_insert(ScoreBreakdown::default());
            breakdown.boost = Some(boost);
        }
    }

    sort_results(results);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_core::Entity;

    fn result(name: &str, score: f32) -> SearchResult {
        SearchResult::scored(Entity::new(name, "Scope", name), score)
    }

    #[test]
    fn test_exact_substring_full_boost_and_reorder() {
        // AuthService gets the full 0.15 for an exact match; authValidate's
        // best token similarity against "AuthService" is below 0.6 so it
        // stays put; loginUser never matches.
        let mut results = vec![
            result("AuthService", 0.60),
            result("authValidate", 0.55),
            result("loginUser", 0.80),
        ];
        let config = KeywordBoostConfig::new(vec!["AuthService".to_string()]);
        apply_keyword_boost(&mut results, &config);

        let order: Vec<&str> = results.iter().map(|r| r.entity.name.as_str()).collect();
        assert_eq!(order, vec!["loginUser", "AuthService", "authValidate"]);

        let boosted = &results[1];
        assert_eq!(boosted.score, Some(0.75));
        let annotation = boosted.keyword_boost.as_ref().unwrap();
        assert_eq!(annotation.similarity, 1.0);
        assert!((annotation.boost - 0.15).abs() < 1e-6);

        assert!(results[2].keyword_boost.is_none());
        assert_eq!(results[2].score, Some(0.55));
    }

    #[test]
    fn test_boost_never_exceeds_weight() {
        let mut results = vec![result("parse_tree_builder", 0.5)];
        let config = KeywordBoostConfig {
            keywords: vec!["parse".to_string(), "tree".to_string()],
            boost_weight: 0.3,
            min_similarity: 0.5,
        };
        apply_keyword_boost(&mut results, &config);

        let boost = results[0].keyword_boost.as_ref().unwrap().boost;
        assert!(boost <= 0.3 + 1e-6);
    }

    #[test]
    fn test_empty_keywords_is_noop() {
        let mut results = vec![result("anything", 0.4)];
        apply_keyword_boost(&mut results, &KeywordBoostConfig::default());
        assert!(results[0].keyword_boost.is_none());
        assert_eq!(results[0].score, Some(0.4));
    }

    #[test]
    fn test_tokenisation_matches_path_segments() {
        let mut results = vec![SearchResult::scored(
            Entity::new("u1", "File", "handler")
                .with_field("file_path", serde_json::json!("src/auth/login_handler.rs")),
            0.5,
        )];
        let config = KeywordBoostConfig::new(vec!["login_handler".to_string()]);
        apply_keyword_boost(&mut results, &config);

        // "login_handler" appears verbatim in the path (substring match).
        assert_eq!(results[0].keyword_boost.as_ref().unwrap().similarity, 1.0);
    }

    #[test]
    fn test_short_tokens_ignored() {
        // Tokens of length <= 2 never enter the Levenshtein comparison, so
        // a two-character field cannot produce a fuzzy match.
        let mut results = vec![result("ab", 0.5)];
        let config = KeywordBoostConfig {
            keywords: vec!["abc".to_string()],
            min_similarity: 0.5,
            ..Default::default()
        };
        apply_keyword_boost(&mut results, &config);
        assert!(results[0].keyword_boost.is_none());
    }

    #[test]
    fn test_unscored_result_gains_boost_as_score() {
        let mut results = vec![SearchResult::unscored(Entity::new(
            "u1",
            "Scope",
            "AuthService",
        ))];
        let config = KeywordBoostConfig::new(vec!["AuthService".to_string()]);
        apply_keyword_boost(&mut results, &config);
        assert_eq!(results[0].score, Some(0.15));
    }
}
