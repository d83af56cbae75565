//! Environment layering
//!
//! Variables resolve with priority local `.env` files > process env, with
//! one exception: provider secrets (names matching `api[_-]?key|token|secret`,
//! case-insensitive) are read only from local files, never from the process
//! environment. `.env.local` overrides `.env`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

static SECRET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)api[_-]?key|token|secret").expect("valid secret-name pattern"));

/// A resolved environment layer.
#[derive(Debug, Clone, Default)]
pub struct EnvLayer {
    local: HashMap<String, String>,
}

impl EnvLayer {
    /// Load `.env` then `.env.local` from the given directory. Missing
    /// files are fine; malformed lines are skipped with a warning.
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let mut local = HashMap::new();
        for file in [".env", ".env.local"] {
            let path = dir.join(file);
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            for (lineno, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match line.split_once('=') {
                    Some((key, value)) => {
                        let value = value.trim().trim_matches('"').trim_matches('\'');
                        local.insert(key.trim().to_string(), value.to_string());
                    }
                    None => {
                        tracing::warn!(file = %path.display(), line = lineno + 1, "Skipping malformed env line");
                    }
                }
            }
        }
        Self { local }
    }

    /// Build from explicit pairs (tests).
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            local: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Resolve a variable: local files first, then the process environment
    /// unless the name looks like a secret.
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.local.get(name) {
            return Some(value.clone());
        }
        if SECRET_NAME.is_match(name) {
            return None;
        }
        std::env::var(name).ok()
    }

    /// Resolve with a fallback default.
    pub fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    /// Boolean flag: "1", "true", "yes" (case-insensitive) are truthy.
    pub fn flag(&self, name: &str) -> bool {
        self.get(name)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }
}

/// Graph store connection settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct GraphStoreEnv {
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl GraphStoreEnv {
    pub fn from_layer(layer: &EnvLayer) -> Self {
        Self {
            uri: layer.get_or("NEO4J_URI", "bolt://localhost:7687"),
            username: layer.get_or("NEO4J_USERNAME", "neo4j"),
            password: layer.get_or("NEO4J_PASSWORD", ""),
            database: layer.get_or("NEO4J_DATABASE", "neo4j"),
        }
    }
}
