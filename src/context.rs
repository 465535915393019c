//! Server-wide context, replacing the module-level singleton globals the
//! teacher's earlier architecture favored with one explicit, `Arc`-backed
//! struct constructed at startup and threaded through every component.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::embed::Embedder;
use crate::retrieval::RetrievalApi;
use crate::store::Store;
use crate::sync::SyncOrchestrator;
use crate::wiki::WikiClient;

/// Shared application state. Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub wiki: Arc<dyn WikiClient>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn Store>,
    pub retrieval: Arc<RetrievalApi>,
    pub sync_orchestrator: Arc<SyncOrchestrator>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        wiki: Arc<dyn WikiClient>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
    ) -> Self {
        let retrieval = Arc::new(RetrievalApi::new(
            embedder.clone(),
            store.clone(),
            config.wiki.base_url.clone(),
            config.search,
        ));
        let sync_orchestrator = Arc::new(SyncOrchestrator::new(
            wiki.clone(),
            embedder.clone(),
            store.clone(),
            config.chunker,
        ));

        Self {
            config: Arc::new(config),
            wiki,
            embedder,
            store,
            retrieval,
            sync_orchestrator,
        }
    }
}
