//! Confluence RAG: an ingestion and retrieval pipeline for a
//! retrieval-augmented question-answering service over a Confluence-shaped
//! wiki.
//!
//! The pipeline consumes a paginated wiki API, normalizes storage-format
//! HTML into chunked, embedded text, persists it alongside its link graph in
//! PostgreSQL + `pgvector`, keeps it in sync on a schedule, and exposes a
//! small retrieval surface (`search`, `get_pages`, `expand`) to an external
//! conversational agent.
//!
//! # Example
//!
//! ```rust,no_run
//! use confluence_rag::config::AppConfig;
//! use confluence_rag::context::AppContext;
//! use confluence_rag::embed::OpenAiEmbedder;
//! use confluence_rag::store::PostgresStore;
//! use confluence_rag::wiki::HttpWikiClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let wiki = Arc::new(HttpWikiClient::new(
//!         config.wiki.base_url.clone(),
//!         config.wiki.email.clone(),
//!         config.wiki.api_token.clone(),
//!     ));
//!     let embedder = Arc::new(OpenAiEmbedder::new(
//!         config.embedding.api_key.clone(),
//!         config.embedding.model.clone(),
//!         config.embedding.dimension(),
//!     ));
//!     let store = Arc::new(
//!         PostgresStore::connect(&config.database.url, config.database.max_connections, config.embedding.dimension())
//!             .await?,
//!     );
//!     let context = AppContext::new(config, wiki, embedder, store);
//!     let stats = context.sync_orchestrator.run_full().await?;
//!     println!("synced {} pages", stats.pages_synced);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod chunk;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod retrieval;
pub mod store;
pub mod sync;
pub mod text;
pub mod wiki;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::{AppError, Result};
pub use retrieval::RetrievalApi;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
