//! Sync Orchestrator (C6): full and incremental ingestion runs
//!
//! The Process-Page procedure normalizes, upserts, replaces links and
//! chunks, and commits in one transaction per page, isolating failures to
//! that page so a single bad page cannot abort the run (§7, Per-item).

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_text, Tokenizer};
use crate::config::{ChunkerConfig, SyncConfig};
use crate::embed::Embedder;
use crate::store::models::{Chunk, Page, SyncState};
use crate::store::Store;
use crate::text::{extract_links, to_text};
use crate::wiki::WikiClient;

/// Outcome of one sync run, surfaced to callers and logs
#[derive(Debug, Clone, Default)]
pub struct SyncRunStats {
    pub pages_synced: i64,
    pub pages_skipped: i64,
    pub pages_failed: i64,
    pub chunks_created: i64,
    pub spaces_synced: i64,
}

pub struct SyncOrchestrator {
    wiki: Arc<dyn WikiClient>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    chunker_config: ChunkerConfig,
    tokenizer: Tokenizer,
}

impl SyncOrchestrator {
    pub fn new(
        wiki: Arc<dyn WikiClient>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
        chunker_config: ChunkerConfig,
    ) -> Self {
        Self {
            wiki,
            embedder,
            store,
            chunker_config,
            tokenizer: Tokenizer::new(),
        }
    }

    /// Enumerate every space and every page within it. A space whose page
    /// listing fails is recorded and skipped; the run continues with the
    /// remaining spaces (§4.6, per-space isolation).
    pub async fn run_full(&self) -> crate::error::Result<SyncRunStats> {
        let run_started_at = Utc::now();
        let mut stats = SyncRunStats::default();
        let mut last_error: Option<String> = None;

        let spaces = match self.wiki.list_spaces().await {
            Ok(spaces) => spaces,
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "failed to list spaces, aborting full sync");
                self.store
                    .commit_sync_state(run_started_at, "failed", Some(&message), 0, 0, 0)
                    .await?;
                return Err(err);
            }
        };

        for space in &spaces {
            stats.spaces_synced += 1;
            let mut cursor = None;
            loop {
                let listing = match self.wiki.list_pages(&space.key, cursor.as_deref()).await {
                    Ok(listing) => listing,
                    Err(err) => {
                        warn!(space_key = %space.key, error = %err, "failed to list pages for space, continuing with other spaces");
                        last_error = Some(format!("space {}: {err}", space.key));
                        break;
                    }
                };
                for page in listing.pages {
                    self.process_page(page, &mut stats).await;
                }
                match listing.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }

        let status = if last_error.is_some() { "partial" } else { "success" };
        self.store
            .commit_sync_state(
                run_started_at,
                status,
                last_error.as_deref(),
                stats.pages_synced,
                stats.chunks_created,
                stats.spaces_synced,
            )
            .await?;

        Ok(stats)
    }

    /// Filter by `lastModified >= last_run_at`; falls back to a full sync
    /// when no watermark exists yet. A pagination failure stops the run
    /// early (there's nothing else to fall back to within one run) but
    /// still commits whatever was synced before the failure, with the
    /// error recorded against the watermark.
    pub async fn run_incremental(&self) -> crate::error::Result<SyncRunStats> {
        let sync_state: SyncState = self.store.get_or_init_sync_state().await?;

        let Some(since) = sync_state.last_run_at else {
            return self.run_full().await;
        };

        let run_started_at = Utc::now();
        let mut stats = SyncRunStats::default();
        let mut last_error: Option<String> = None;

        let mut cursor = None;
        loop {
            let listing = match self.wiki.list_updated_pages(since, cursor.as_deref()).await {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(error = %err, "failed to list updated pages, stopping incremental sync early");
                    last_error = Some(err.to_string());
                    break;
                }
            };
            for page in listing.pages {
                self.process_page(page, &mut stats).await;
            }
            match listing.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        // Watermark advances to the run's *start* timestamp, not completion
        // time, so pages modified mid-run are not silently skipped next time.
        let status = if last_error.is_some() { "partial" } else { "success" };
        self.store
            .commit_sync_state(
                run_started_at,
                status,
                last_error.as_deref(),
                stats.pages_synced,
                stats.chunks_created,
                stats.spaces_synced,
            )
            .await?;

        Ok(stats)
    }

    /// Process a single wiki page end to end; any failure is logged and
    /// isolated to this page, never aborting the run.
    async fn process_page(&self, wiki_page: crate::wiki::WikiPage, stats: &mut SyncRunStats) {
        match self.process_page_inner(&wiki_page).await {
            Ok(Some(chunks_created)) => {
                stats.pages_synced += 1;
                stats.chunks_created += chunks_created;
            }
            Ok(None) => {
                stats.pages_skipped += 1;
            }
            Err(err) => {
                stats.pages_failed += 1;
                warn!(page_id = %wiki_page.id, error = %err, "failed to process page, skipping");
            }
        }
    }

    async fn process_page_inner(&self, wiki_page: &crate::wiki::WikiPage) -> crate::error::Result<Option<i64>> {
        // Cheap pre-check: skip a stale page before spending anything on
        // normalization, chunking, or embedding calls.
        if let Some(stored_version) = self.store.stored_page_version(&wiki_page.id).await? {
            if wiki_page.version <= stored_version {
                info!(page_id = %wiki_page.id, "page version not newer, skipping chunk/embed work");
                return Ok(None);
            }
        }

        let body_text = to_text(&wiki_page.body_storage, true);
        let links = extract_links(&wiki_page.body_storage, "", &wiki_page.id);

        let page = Page {
            id: wiki_page.id.clone(),
            space_key: wiki_page.space_key.clone(),
            title: wiki_page.title.clone(),
            body_text: body_text.clone(),
            version: wiki_page.version,
            last_modified: wiki_page.last_modified,
            synced_at: Utc::now(),
        };

        let text_chunks = chunk_text(&body_text, &self.tokenizer, &self.chunker_config);
        let texts: Vec<String> = text_chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let chunks: Vec<Chunk> = text_chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text_chunk, embedding)| Chunk {
                id: Uuid::new_v4(),
                page_id: page.id.clone(),
                chunk_index: text_chunk.chunk_index as i32,
                text: text_chunk.text,
                heading_path: text_chunk
                    .heading_path
                    .map(|path| serde_json::to_value(path).unwrap_or(serde_json::Value::Null)),
                token_count: text_chunk.token_count as i32,
                embedding: pgvector::Vector::from(embedding),
            })
            .collect();

        let chunk_count = chunks.len() as i64;

        // Page upsert, link replace, and chunk replace land in one
        // transaction (§4.5); re-checks the version, so a racing writer
        // between the pre-check above and here still can't corrupt state.
        let outcome = self.store.commit_page(&page, &links, &chunks).await?;
        if matches!(outcome, crate::store::models::UpsertOutcome::Skipped) {
            info!(page_id = %page.id, "page version not newer at commit time, skipping");
            return Ok(None);
        }

        Ok(Some(chunk_count))
    }
}

/// Spawn a background task that runs `run_incremental` on a fixed interval
/// until `shutdown` fires. Mirrors the recurring-timer generalization of the
/// teacher's per-call rate-limit gate (`src/workflow.rs`'s `RateLimitedApiStep`).
pub fn spawn_scheduled_sync(
    orchestrator: Arc<SyncOrchestrator>,
    sync_config: SyncConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            sync_config.interval_minutes * 60,
        ));
        interval.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("starting scheduled incremental sync");
                    match orchestrator.run_incremental().await {
                        Ok(stats) => info!(?stats, "scheduled sync completed"),
                        Err(err) => warn!(error = %err, "scheduled sync run failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduled sync task shutting down");
                    break;
                }
            }
        }
    })
}
