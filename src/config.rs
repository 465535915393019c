//! Configuration for the ingestion and retrieval pipeline
//!
//! Everything is read from environment variables (§6): a single typed
//! struct built once at startup and validated before anything else runs.

use crate::error::{AppError, Result};

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub wiki: WikiConfig,
    pub embedding: EmbeddingConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub chunker: ChunkerConfig,
    pub search: SearchConfig,
    pub log_level: String,
}

/// Wiki API connection settings
#[derive(Debug, Clone)]
pub struct WikiConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
}

/// Embedding provider settings
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
}

impl EmbeddingConfig {
    /// Vector dimension implied by the configured model (§3: one of {1536, 3072})
    pub fn dimension(&self) -> usize {
        if self.model.contains("small") {
            1536
        } else {
            3072
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Sync orchestrator settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval_minutes: u64,
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            batch_size: 50,
        }
    }
}

/// Chunker settings (§4.3)
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub target_tokens: usize,
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_tokens: 750,
            min_tokens: 100,
            max_tokens: 1000,
            overlap_tokens: 100,
        }
    }
}

/// Retrieval (search) settings
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub top_k: usize,
    pub max_pages: usize,
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 30,
            max_pages: 12,
            min_score: 0.3,
        }
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| AppError::Config(format!("missing required env var: {name}")))
}

fn optional_env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from the process environment, loading a local
    /// `.env` file first if one is present (non-production convenience).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let wiki = WikiConfig {
            base_url: required_env("WIKI_BASE_URL")?,
            email: required_env("WIKI_EMAIL")?,
            api_token: required_env("WIKI_API_TOKEN")?,
        };

        let embedding = EmbeddingConfig {
            api_key: required_env("EMBEDDING_API_KEY")?,
            model: optional_env("EMBEDDING_MODEL", "text-embedding-3-small"),
        };

        let database = DatabaseConfig {
            url: required_env("DATABASE_URL")?,
            max_connections: optional_env_parsed("DATABASE_MAX_CONNECTIONS", 10),
        };

        let sync = SyncConfig {
            interval_minutes: optional_env_parsed("SYNC_INTERVAL_MINUTES", 60),
            batch_size: optional_env_parsed("SYNC_BATCH_SIZE", 50),
        };

        let chunker = ChunkerConfig {
            target_tokens: optional_env_parsed("CHUNK_TARGET_TOKENS", 750),
            min_tokens: optional_env_parsed("CHUNK_MIN_TOKENS", 100),
            max_tokens: optional_env_parsed("CHUNK_MAX_TOKENS", 1000),
            overlap_tokens: optional_env_parsed("CHUNK_OVERLAP_TOKENS", 100),
        };

        let search = SearchConfig {
            top_k: optional_env_parsed("SEARCH_TOP_K", 30),
            max_pages: optional_env_parsed("SEARCH_MAX_PAGES", 12),
            min_score: optional_env_parsed("SEARCH_MIN_SCORE", 0.3),
        };

        let log_level = optional_env("LOG_LEVEL", "info");

        let config = Self {
            wiki,
            embedding,
            database,
            sync,
            chunker,
            search,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants not already enforced by required-env lookups
    pub fn validate(&self) -> Result<()> {
        if !self.wiki.base_url.starts_with("http") {
            return Err(AppError::Config(format!(
                "invalid WIKI_BASE_URL: {}",
                self.wiki.base_url
            )));
        }
        if self.chunker.min_tokens == 0 || self.chunker.min_tokens > self.chunker.max_tokens {
            return Err(AppError::Config(
                "CHUNK_MIN_TOKENS must be > 0 and <= CHUNK_MAX_TOKENS".to_string(),
            ));
        }
        if self.chunker.target_tokens > self.chunker.max_tokens {
            return Err(AppError::Config(
                "CHUNK_TARGET_TOKENS must be <= CHUNK_MAX_TOKENS".to_string(),
            ));
        }
        if self.search.min_score < 0.0 {
            return Err(AppError::Config(
                "SEARCH_MIN_SCORE must be >= 0.0".to_string(),
            ));
        }
        Ok(())
    }
}
