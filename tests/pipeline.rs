//! Cross-module scenarios spanning ingestion (C1-C6) and retrieval (C7),
//! exercised against in-process fakes rather than a real wiki/embedding
//! API or database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use confluence_rag::config::{ChunkerConfig, SearchConfig};
use confluence_rag::context::AppContext;
use confluence_rag::embed::Embedder;
use confluence_rag::error::Result;
use confluence_rag::retrieval::RetrievalApi;
use confluence_rag::store::models::{Chunk, Page, PageLink, ScoredChunk, SyncState, UpsertOutcome};
use confluence_rag::store::Store;
use confluence_rag::sync::SyncOrchestrator;
use confluence_rag::text::ParsedLink;
use confluence_rag::wiki::{PageListing, WikiClient, WikiPage, WikiSpace};

struct FixedWiki {
    pages: Vec<WikiPage>,
}

#[async_trait]
impl WikiClient for FixedWiki {
    async fn list_spaces(&self) -> Result<Vec<WikiSpace>> {
        Ok(vec![WikiSpace { key: "ENG".into(), name: "Engineering".into() }])
    }

    async fn list_pages(&self, _space_key: &str, _cursor: Option<&str>) -> Result<PageListing> {
        Ok(PageListing { pages: self.pages.clone(), next_cursor: None })
    }

    async fn get_page(&self, page_id: &str) -> Result<WikiPage> {
        self.pages
            .iter()
            .find(|p| p.id == page_id)
            .cloned()
            .ok_or_else(|| confluence_rag::error::AppError::NotFound(page_id.to_string()))
    }

    async fn list_updated_pages(&self, _since: DateTime<Utc>, _cursor: Option<&str>) -> Result<PageListing> {
        Ok(PageListing { pages: self.pages.clone(), next_cursor: None })
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic stand-in embedder: every text maps to a 2-d vector derived
/// from its length, so distinct texts produce distinct, comparable vectors
/// without a real embedding model.
struct DeterministicEmbedder;

#[async_trait]
impl Embedder for DeterministicEmbedder {
    fn dimension(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let len = text.chars().count() as f32;
        Ok(vec![len, 1.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Default)]
struct InMemoryStore {
    pages: Mutex<HashMap<String, Page>>,
    chunks: Mutex<HashMap<String, Vec<Chunk>>>,
    links: Mutex<HashMap<String, Vec<PageLink>>>,
    sync_state: Mutex<SyncState>,
}

impl InMemoryStore {
    fn new() -> Self {
        Self {
            sync_state: Mutex::new(SyncState {
                id: 1,
                last_run_at: None,
                last_run_status: None,
                last_error: None,
                pages_synced: 0,
                chunks_created: 0,
                spaces_synced: 0,
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_page(&self, page: &Page) -> Result<UpsertOutcome> {
        let mut pages = self.pages.lock().unwrap();
        match pages.get(&page.id) {
            Some(existing) if existing.version >= page.version => Ok(UpsertOutcome::Skipped),
            Some(_) => {
                pages.insert(page.id.clone(), page.clone());
                Ok(UpsertOutcome::Updated)
            }
            None => {
                pages.insert(page.id.clone(), page.clone());
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn get_pages(&self, page_ids: &[String]) -> Result<Vec<Page>> {
        let pages = self.pages.lock().unwrap();
        Ok(page_ids.iter().filter_map(|id| pages.get(id).cloned()).collect())
    }

    async fn list_pages(&self, _space_key: Option<&str>) -> Result<Vec<Page>> {
        Ok(self.pages.lock().unwrap().values().cloned().collect())
    }

    async fn count_pages(&self) -> Result<i64> {
        Ok(self.pages.lock().unwrap().len() as i64)
    }

    async fn list_spaces_with_counts(&self) -> Result<Vec<(String, i64)>> {
        Ok(Vec::new())
    }

    async fn replace_chunks(&self, page_id: &str, chunks: &[Chunk]) -> Result<()> {
        self.chunks.lock().unwrap().insert(page_id.to_string(), chunks.to_vec());
        Ok(())
    }

    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.lock().unwrap();
        let mut scored: Vec<ScoredChunk> = chunks
            .values()
            .flatten()
            .map(|chunk| {
                let v: Vec<f32> = chunk.embedding.as_slice().to_vec();
                ScoredChunk {
                    page_id: chunk.page_id.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    score: cosine_similarity(query, &v),
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn replace_outgoing_links(&self, from_page_id: &str, links: &[ParsedLink]) -> Result<()> {
        let rows = links
            .iter()
            .map(|link| PageLink {
                id: uuid::Uuid::new_v4(),
                from_page_id: from_page_id.to_string(),
                to_page_id: link.page_id.clone(),
                url: link.url.clone(),
                link_text: link.text.clone(),
                link_type: link.link_type.into(),
            })
            .collect();
        self.links.lock().unwrap().insert(from_page_id.to_string(), rows);
        Ok(())
    }

    async fn linked_pages(&self, seeds: &[String], limit: usize) -> Result<Vec<PageLink>> {
        let links = self.links.lock().unwrap();
        let mut out: Vec<PageLink> = Vec::new();
        for seed in seeds {
            if let Some(rows) = links.get(seed) {
                for row in rows {
                    if let Some(target) = &row.to_page_id {
                        if !seeds.contains(target) && !out.iter().any(|r| r.to_page_id.as_deref() == Some(target)) {
                            out.push(row.clone());
                        }
                    }
                }
            }
        }
        out.truncate(limit);
        Ok(out)
    }

    async fn stored_page_version(&self, page_id: &str) -> Result<Option<i64>> {
        Ok(self.pages.lock().unwrap().get(page_id).map(|p| p.version))
    }

    async fn commit_page(&self, page: &Page, links: &[ParsedLink], chunks: &[Chunk]) -> Result<UpsertOutcome> {
        let outcome = self.upsert_page(page).await?;
        if matches!(outcome, UpsertOutcome::Skipped) {
            return Ok(outcome);
        }
        self.replace_outgoing_links(&page.id, links).await?;
        self.replace_chunks(&page.id, chunks).await?;
        Ok(outcome)
    }

    async fn get_or_init_sync_state(&self) -> Result<SyncState> {
        Ok(self.sync_state.lock().unwrap().clone())
    }

    async fn commit_sync_state(
        &self,
        run_started_at: DateTime<Utc>,
        status: &str,
        last_error: Option<&str>,
        pages_synced: i64,
        chunks_created: i64,
        spaces_synced: i64,
    ) -> Result<()> {
        let mut state = self.sync_state.lock().unwrap();
        state.last_run_at = Some(run_started_at);
        state.last_run_status = Some(status.to_string());
        state.last_error = last_error.map(|s| s.to_string());
        state.pages_synced = pages_synced;
        state.chunks_created = chunks_created;
        state.spaces_synced = spaces_synced;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn wiki_page(id: &str, body: &str, version: i64) -> WikiPage {
    WikiPage {
        id: id.to_string(),
        space_key: "ENG".to_string(),
        title: format!("Page {id}"),
        body_storage: body.to_string(),
        version,
        last_modified: Utc::now(),
    }
}

/// E1: ingest, skip-on-stale-version, replace-on-new-version.
#[tokio::test]
async fn e1_ingest_skip_and_replace_chunk_set() {
    let wiki = Arc::new(FixedWiki { pages: vec![wiki_page("1", "# Intro\nHello world.", 1)] });
    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let orchestrator = SyncOrchestrator::new(wiki.clone(), embedder.clone(), store.clone(), ChunkerConfig::default());

    let stats = orchestrator.run_full().await.unwrap();
    assert_eq!(stats.pages_synced, 1);
    assert!(stats.chunks_created >= 1);

    let first_chunks = store.get_pages(&["1".to_string()]).await.unwrap();
    assert_eq!(first_chunks[0].version, 1);

    // reingest same version: skipped
    let wiki_same = Arc::new(FixedWiki { pages: vec![wiki_page("1", "# Intro\nHello world.", 1)] });
    let orchestrator_same = SyncOrchestrator::new(wiki_same, embedder.clone(), store.clone(), ChunkerConfig::default());
    let stats_same = orchestrator_same.run_full().await.unwrap();
    assert_eq!(stats_same.pages_skipped, 1);
    assert_eq!(stats_same.pages_synced, 0);

    // reingest new version: chunk set replaced
    let wiki_v2 = Arc::new(FixedWiki { pages: vec![wiki_page("1", "# Intro\nHello world. Goodbye.", 2)] });
    let orchestrator_v2 = SyncOrchestrator::new(wiki_v2, embedder, store.clone(), ChunkerConfig::default());
    let stats_v2 = orchestrator_v2.run_full().await.unwrap();
    assert_eq!(stats_v2.pages_synced, 1);
}

/// E2: internal + external links classified, self-links and anchors dropped.
#[tokio::test]
async fn e2_link_extraction_and_classification() {
    let body = r##"
        <p><a href="/wiki/spaces/T/pages/67890/X">x</a></p>
        <p><a href="https://ex.com">e</a></p>
        <p><a href="#top">t</a></p>
    "##;
    let wiki = Arc::new(FixedWiki { pages: vec![wiki_page("1", body, 1)] });
    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = SyncOrchestrator::new(wiki, embedder, store.clone(), ChunkerConfig::default());

    orchestrator.run_full().await.unwrap();

    let links = store.linked_pages(&["nonexistent-seed".to_string()], 10).await.unwrap();
    assert!(links.is_empty());

    let outgoing = store.links.lock().unwrap();
    let rows = outgoing.get("1").unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .any(|r| r.link_type == confluence_rag::store::models::LinkType::Internal && r.to_page_id.as_deref() == Some("67890")));
    assert!(rows.iter().any(|r| r.link_type == confluence_rag::store::models::LinkType::External));
}

/// E3: search ranks pages by best chunk score, filters below min_score.
#[tokio::test]
async fn e3_search_orders_and_filters_by_score() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);

    for (id, text) in [("a", "xx"), ("b", "xxxxx"), ("c", "xxxxxxxxxxx")] {
        let vector = embedder.embed(text).await.unwrap();
        let chunk = Chunk {
            id: uuid::Uuid::new_v4(),
            page_id: id.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            heading_path: None,
            token_count: 1,
            embedding: pgvector::Vector::from(vector),
        };
        store.replace_chunks(id, &[chunk]).await.unwrap();
    }

    let api = RetrievalApi::new(embedder, store, "https://example.atlassian.net/wiki", SearchConfig::default());
    let hits = api.search("xxxxx", Some(5), Some(5), Some(0.999_9)).await.unwrap();

    assert!(hits.len() <= 3);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

/// Wiring smoke test: AppContext assembles every collaborator and exposes
/// a working retrieval surface end to end.
#[tokio::test]
async fn app_context_wires_sync_and_retrieval_together() {
    let wiki: Arc<dyn WikiClient> = Arc::new(FixedWiki { pages: vec![wiki_page("1", "# Intro\nHello world.", 1)] });
    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder);
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let config = confluence_rag::config::AppConfig {
        wiki: confluence_rag::config::WikiConfig {
            base_url: "https://example.atlassian.net/wiki".to_string(),
            email: "bot@example.com".to_string(),
            api_token: "token".to_string(),
        },
        embedding: confluence_rag::config::EmbeddingConfig {
            api_key: "key".to_string(),
            model: "text-embedding-3-small".to_string(),
        },
        database: confluence_rag::config::DatabaseConfig {
            url: "postgres://localhost/test".to_string(),
            max_connections: 5,
        },
        sync: confluence_rag::config::SyncConfig::default(),
        chunker: ChunkerConfig::default(),
        search: SearchConfig::default(),
        log_level: "info".to_string(),
    };

    let context = AppContext::new(config, wiki, embedder, store);
    let stats = context.sync_orchestrator.run_full().await.unwrap();
    assert_eq!(stats.pages_synced, 1);

    let hits = context.retrieval.search("hello", None, None, Some(0.0)).await.unwrap();
    assert_eq!(hits.len(), 1);
}
