//! Embedding providers
//!
//! Text goes in, a fixed-dimension cosine-normalised vector comes out. The
//! dimension is pinned by the index configuration; a provider returning a
//! vector of any other length is a fatal error, not something to paper
//! over.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::rate_limit::is_rate_limit_message;
use crate::LlmError;

/// Which HTTP shape the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingApiStyle {
    /// POST /embeddings with `{model, input: [..]}`
    OpenAi,
    /// POST /api/embeddings with `{model, prompt}` per text
    Ollama,
}

/// Embedding provider configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Expected vector dimension; responses are checked against this
    pub dimension: usize,
    pub style: EmbeddingApiStyle,
    pub timeout: Duration,
    /// Attempts per text on retriable failures
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            api_key: String::new(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            style: EmbeddingApiStyle::Ollama,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
        }
    }
}

/// Embedding provider trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text for the named index.
    async fn embed(&self, text: &str, index_name: &str) -> Result<Vec<f32>, LlmError>;

    /// Embed a batch, preserving order.
    async fn embed_batch(
        &self,
        texts: &[String],
        index_name: &str,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, index_name).await?);
        }
        Ok(vectors)
    }

    /// The fixed dimension this provider produces.
    fn dimension(&self) -> usize;
}

/// HTTP embedding provider.
pub struct HttpEmbeddingProvider {
    config: EmbeddingConfig,
    client: Client,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn check_dimension(&self, vector: Vec<f32>) -> Result<Vec<f32>, LlmError> {
        if vector.len() != self.config.dimension {
            return Err(LlmError::EmbedDimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }

    fn classify_failure(status: reqwest::StatusCode, body: &str) -> LlmError {
        if status.as_u16() == 429 || is_rate_limit_message(body) {
            LlmError::EmbedRateLimited {
                remaining_attempts: 0,
            }
        } else if body.to_lowercase().contains("too large")
            || body.to_lowercase().contains("maximum context")
        {
            LlmError::EmbedInputTooLarge(body.to_string())
        } else {
            LlmError::EmbedProviderDown(format!("HTTP {}: {}", status, body))
        }
    }

    async fn request_once(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let (url, body) = match self.config.style {
            EmbeddingApiStyle::OpenAi => (
                format!("{}/embeddings", self.config.endpoint.trim_end_matches('/')),
                serde_json::to_value(OpenAiEmbedRequest {
                    model: self.config.model.clone(),
                    input: vec![text.to_string()],
                })
                .expect("static request shape"),
            ),
            EmbeddingApiStyle::Ollama => (
                format!(
                    "{}/api/embeddings",
                    self.config.endpoint.trim_end_matches('/')
                ),
                serde_json::to_value(OllamaEmbedRequest {
                    model: self.config.model.clone(),
                    prompt: text.to_string(),
                })
                .expect("static request shape"),
            ),
        };

        let mut request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::EmbedProviderDown(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &body));
        }

        let vector = match self.config.style {
            EmbeddingApiStyle::OpenAi => {
                let parsed: OpenAiEmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::EmbedProviderDown(e.to_string()))?;
                parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| {
                        LlmError::EmbedProviderDown("Empty embedding response".to_string())
                    })?
            }
            EmbeddingApiStyle::Ollama => {
                let parsed: OllamaEmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::EmbedProviderDown(e.to_string()))?;
                parsed.embedding
            }
        };

        self.check_dimension(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str, index_name: &str) -> Result<Vec<f32>, LlmError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut backoff = Duration::from_millis(500);
        for attempt in 1..=attempts {
            match self.request_once(text).await {
                Ok(vector) => return Ok(vector),
                Err(LlmError::EmbedRateLimited { .. }) if attempt < attempts => {
                    tracing::warn!(
                        index = index_name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Embedding rate limited; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(LlmError::EmbedRateLimited { .. }) => {
                    return Err(LlmError::EmbedRateLimited {
                        remaining_attempts: 0,
                    });
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("retry loop always returns")
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

/// Wraps any provider with an in-process cache keyed by
/// `(index_name, text hash)`. Last writer wins; the cache is bounded by
/// simple eviction of an arbitrary entry once full.
pub struct CachedEmbedder<P> {
    inner: Arc<P>,
    cache: Mutex<HashMap<(String, u64), Vec<f32>>>,
    capacity: usize,
}

impl<P: EmbeddingProvider> CachedEmbedder<P> {
    pub fn new(inner: Arc<P>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn key(index_name: &str, text: &str) -> (String, u64) {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        (index_name.to_string(), hasher.finish())
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedder<P> {
    async fn embed(&self, text: &str, index_name: &str) -> Result<Vec<f32>, LlmError> {
        let key = Self::key(index_name, text);
        if let Some(vector) = self.cache.lock().get(&key) {
            return Ok(vector.clone());
        }

        let vector = self.inner.embed(text, index_name).await?;

        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity {
            if let Some(evict) = cache.keys().next().cloned() {
                cache.remove(&evict);
            }
        }
        cache.insert(key, vector.clone());
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

// API types

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder {
        dimension: usize,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, text: &str, _index_name: &str) -> Result<Vec<f32>, LlmError> {
            *self.calls.lock() += 1;
            Ok(vec![text.len() as f32; self.dimension])
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    #[tokio::test]
    async fn test_cache_hits_skip_provider() {
        let inner = Arc::new(FixedEmbedder {
            dimension: 4,
            calls: Mutex::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone(), 16);

        let a = cached.embed("hello", "idx").await.unwrap();
        let b = cached.embed("hello", "idx").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(*inner.calls.lock(), 1);

        // Different index name is a different cache entry.
        cached.embed("hello", "other").await.unwrap();
        assert_eq!(*inner.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_cache_eviction_bounds_size() {
        let inner = Arc::new(FixedEmbedder {
            dimension: 2,
            calls: Mutex::new(0),
        });
        let cached = CachedEmbedder::new(inner, 2);

        cached.embed("a", "idx").await.unwrap();
        cached.embed("b", "idx").await.unwrap();
        cached.embed("c", "idx").await.unwrap();
        assert!(cached.cached_len() <= 2);
    }

    #[test]
    fn test_classify_failure() {
        let err = HttpEmbeddingProvider::classify_failure(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "429",
        );
        assert!(matches!(err, LlmError::EmbedRateLimited { .. }));

        let err = HttpEmbeddingProvider::classify_failure(
            reqwest::StatusCode::BAD_REQUEST,
            "input is too large for model",
        );
        assert!(matches!(err, LlmError::EmbedInputTooLarge(_)));

        let err =
            HttpEmbeddingProvider::classify_failure(reqwest::StatusCode::BAD_GATEWAY, "boom");
        assert!(matches!(err, LlmError::EmbedProviderDown(_)));
    }

    #[test]
    fn test_dimension_check() {
        let provider = HttpEmbeddingProvider::new(EmbeddingConfig {
            dimension: 3,
            ..Default::default()
        })
        .unwrap();

        assert!(provider.check_dimension(vec![0.0; 3]).is_ok());
        assert!(matches!(
            provider.check_dimension(vec![0.0; 4]),
            Err(LlmError::EmbedDimensionMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }
}
