//! Query parameters
//!
//! Everything sent to the store is parameterised; query text never embeds
//! caller data. [`ParamValue`] is the narrow set of types the adapter
//! forwards, with integers coerced to the store's native `i64` and vectors
//! widened to float lists.

use std::collections::HashMap;

use serde_json::Value;

/// Coerce any unsigned count (top-k, limits, depths) into the store's
/// native integer type.
pub fn coerce_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A parameter value bound into a Cypher query.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    StringList(Vec<String>),
    /// Embedding vectors; widened to f64 on the wire
    FloatList(Vec<f32>),
    Null,
}

impl ParamValue {
    /// Convert a JSON value from config/tool input into a parameter.
    /// Objects and nested arrays are rejected by returning `Null`; callers
    /// validate shapes before binding.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => ParamValue::String(s.clone()),
            Value::Bool(b) => ParamValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Int(i)
                } else {
                    ParamValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::Array(items) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
                match strings {
                    Some(list) => ParamValue::StringList(list),
                    None => ParamValue::Null,
                }
            }
            _ => ParamValue::Null,
        }
    }

    /// Bind this parameter onto a driver query.
    pub fn apply(self, query: neo4rs::Query, key: &str) -> neo4rs::Query {
        match self {
            ParamValue::String(v) => query.param(key, v),
            ParamValue::Int(v) => query.param(key, v),
            ParamValue::Float(v) => query.param(key, v),
            ParamValue::Bool(v) => query.param(key, v),
            ParamValue::StringList(v) => query.param(key, v),
            ParamValue::FloatList(v) => {
                let widened: Vec<f64> = v.into_iter().map(|f| f as f64).collect();
                query.param(key, widened)
            }
            ParamValue::Null => query.param(key, neo4rs::BoltType::Null(neo4rs::BoltNull)),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(coerce_int(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::StringList(v)
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(v: Vec<f32>) -> Self {
        ParamValue::FloatList(v)
    }
}

/// Named parameter map.
pub type Params = HashMap<String, ParamValue>;

/// Build a params map from pairs.
pub fn params(pairs: Vec<(&str, ParamValue)>) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_int_counts() {
        assert_eq!(coerce_int(10), 10i64);
        assert_eq!(coerce_int(0), 0i64);
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(
            ParamValue::from_json(&json!("x")),
            ParamValue::String("x".to_string())
        );
        assert_eq!(ParamValue::from_json(&json!(3)), ParamValue::Int(3));
        assert_eq!(ParamValue::from_json(&json!(1.5)), ParamValue::Float(1.5));
        assert_eq!(ParamValue::from_json(&json!(true)), ParamValue::Bool(true));
    }

    #[test]
    fn test_from_json_rejects_objects() {
        assert_eq!(ParamValue::from_json(&json!({"a": 1})), ParamValue::Null);
        assert_eq!(ParamValue::from_json(&json!([1, 2])), ParamValue::Null);
        assert_eq!(
            ParamValue::from_json(&json!(["a", "b"])),
            ParamValue::StringList(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_usize_coercion_via_from() {
        let v: ParamValue = 25usize.into();
        assert_eq!(v, ParamValue::Int(25));
    }
}
