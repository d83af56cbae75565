//! Configuration for RagForge
//!
//! Two layers:
//! - the declarative YAML document ([`RagForgeConfig`]) describing the
//!   entity catalog, embeddings, reranking strategies and optional source
//!   ingestion section; unknown keys are ignored, missing sections disable
//!   the corresponding subsystem;
//! - environment layering ([`env`]) where provider secrets are read only
//!   from local `.env` files and everything else resolves local > process.

pub mod constants;
pub mod env;
pub mod settings;

pub use env::{EnvLayer, GraphStoreEnv};
pub use settings::{
    EmbeddingDefaults, EmbeddingsConfig, EntityConfig, GenerationConfig, RagForgeConfig,
    RerankStrategyConfig, RerankingConfig, SourceConfig, VectorIndexConfig,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ragforge_core::Error {
    fn from(err: ConfigError) -> Self {
        ragforge_core::Error::Config(err.to_string())
    }
}
