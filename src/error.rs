//! Error handling for the ingestion and retrieval pipeline

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;

/// Top-level error type for the pipeline
#[derive(Error, Debug)]
pub enum AppError {
    #[error("wiki client error: {0}")]
    Wiki(#[from] WikiError),

    #[error("normalization error: {0}")]
    Normalize(String),

    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors from the wiki client (C1)
#[derive(Error, Debug)]
pub enum WikiError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream server error: {status}")]
    ServerError { status: u16 },

    #[error("request rejected: {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("pagination failed: {0}")]
    PaginationFailed(String),

    #[error("page parse failed: {0}")]
    PageParseFailed(String),

    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors from the embedder (C4)
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("rate limited")]
    RateLimited,

    #[error("upstream server error: {status}")]
    ServerError { status: u16 },

    #[error("request rejected: {0}")]
    ClientError(String),

    #[error("response length {actual} did not match input length {expected}")]
    MisalignedBatch { expected: usize, actual: usize },

    #[error("retry budget exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors from the store (C5)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// Whether the caller may retry this error (transient-upstream, §7)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Wiki(WikiError::RateLimited { .. })
                | AppError::Wiki(WikiError::ServerError { .. })
                | AppError::Wiki(WikiError::ConnectionFailed(_))
                | AppError::Embed(EmbedError::RateLimited)
                | AppError::Embed(EmbedError::ServerError { .. })
                | AppError::Http(_)
        )
    }

    /// Coarse category for logging/metrics, mirroring the taxonomy in §7
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Wiki(_) => "wiki",
            AppError::Normalize(_) => "normalize",
            AppError::Embed(_) => "embed",
            AppError::Store(_) => "store",
            AppError::Sync(_) => "sync",
            AppError::Config(_) => "config",
            AppError::Http(_) => "http",
            AppError::Database(_) => "database",
            AppError::Serialization(_) => "serialization",
            AppError::NotFound(_) => "not_found",
        }
    }
}
