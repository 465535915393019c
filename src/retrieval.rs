//! Retrieval API (C7): the three operations the conversational agent calls
//! against the synced knowledge base.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::store::models::{LinkType, Page};
use crate::store::Store;

const SNIPPET_MAX_CHARS: usize = 300;
const SNIPPETS_PER_PAGE: usize = 3;
const BODY_TRUNCATE_CHARS: usize = 3000;
const BODY_TRUNCATE_MARKER: &str = "\n\n[... truncated ...]";

/// One page's worth of matched snippets, ranked by best snippet score.
/// Carries enough page metadata (`title`, `url`) for the agent to cite it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchHit {
    pub page_id: String,
    pub space_key: String,
    pub title: String,
    pub url: String,
    pub score: f32,
    pub chunk_count: usize,
    pub snippets: Vec<String>,
}

/// A page returned by `get_pages`, body possibly truncated
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PageResult {
    pub page_id: String,
    pub space_key: String,
    pub title: String,
    pub url: String,
    pub body_text: String,
}

/// A page reachable from the seed set, for `expand`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExpandedPage {
    pub page_id: String,
    pub space_key: String,
    pub title: String,
    pub url: String,
    pub link_type: LinkType,
}

/// Implements `search`, `get_pages`, `expand` over the synced store (C7)
pub struct RetrievalApi {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    wiki_base_url: String,
    defaults: SearchConfig,
}

impl RetrievalApi {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
        wiki_base_url: impl Into<String>,
        defaults: SearchConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            wiki_base_url: wiki_base_url.into(),
            defaults,
        }
    }

    /// Embed `query`, find the nearest chunks, group by page taking the
    /// max score per page, truncate snippets, sort pages by score desc,
    /// limited to `max_pages`.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        max_pages: Option<usize>,
        min_score: Option<f32>,
    ) -> crate::error::Result<Vec<SearchHit>> {
        let top_k = top_k.unwrap_or(self.defaults.top_k);
        let max_pages = max_pages.unwrap_or(self.defaults.max_pages);
        let min_score = min_score.unwrap_or(self.defaults.min_score);

        let query_vector = self.embedder.embed(query).await?;
        let scored = self.store.vector_search(&query_vector, top_k).await?;

        let mut by_page: HashMap<String, Vec<(f32, String)>> = HashMap::new();
        for chunk in scored {
            if chunk.score < min_score {
                continue;
            }
            by_page
                .entry(chunk.page_id)
                .or_default()
                .push((chunk.score, chunk.text));
        }

        let page_ids: Vec<String> = by_page.keys().cloned().collect();
        let pages_by_id = self.pages_by_id(&page_ids).await?;

        let mut hits: Vec<SearchHit> = by_page
            .into_iter()
            .filter_map(|(page_id, mut chunks)| {
                let page = pages_by_id.get(&page_id)?;
                chunks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
                let best_score = chunks[0].0;
                let chunk_count = chunks.len();
                let snippets = chunks
                    .into_iter()
                    .take(SNIPPETS_PER_PAGE)
                    .map(|(_, text)| truncate_snippet(&text))
                    .collect();
                Some(SearchHit {
                    page_id: page.id.clone(),
                    space_key: page.space_key.clone(),
                    title: page.title.clone(),
                    url: self.page_url(page),
                    score: best_score,
                    chunk_count,
                    snippets,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(max_pages);
        Ok(hits)
    }

    /// Fetch up to 5 pages by id, with bodies truncated to ~3000 chars.
    pub async fn get_pages(&self, page_ids: &[String]) -> crate::error::Result<Vec<PageResult>> {
        let ids: Vec<String> = page_ids.iter().take(5).cloned().collect();
        let pages = self.store.get_pages(&ids).await?;
        Ok(pages
            .into_iter()
            .map(|page| PageResult {
                page_id: page.id.clone(),
                space_key: page.space_key.clone(),
                title: page.title.clone(),
                url: self.page_url(&page),
                body_text: truncate_body(&page.body_text),
            })
            .collect())
    }

    /// Distinct internal link targets reachable from `seeds`, excluding the seeds.
    pub async fn expand(&self, seeds: &[String], limit: Option<usize>) -> crate::error::Result<Vec<ExpandedPage>> {
        let limit = limit.unwrap_or(20);
        let links = self.store.linked_pages(seeds, limit).await?;

        let target_ids: Vec<String> = links.iter().filter_map(|l| l.to_page_id.clone()).collect();
        let pages_by_id = self.pages_by_id(&target_ids).await?;

        Ok(links
            .into_iter()
            .filter_map(|link| {
                let page = pages_by_id.get(link.to_page_id.as_ref()?)?;
                Some(ExpandedPage {
                    page_id: page.id.clone(),
                    space_key: page.space_key.clone(),
                    title: page.title.clone(),
                    url: self.page_url(page),
                    link_type: link.link_type,
                })
            })
            .collect())
    }

    async fn pages_by_id(&self, page_ids: &[String]) -> crate::error::Result<HashMap<String, Page>> {
        let pages = self.store.get_pages(page_ids).await?;
        Ok(pages.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    fn page_url(&self, page: &Page) -> String {
        format!("{}/spaces/{}/pages/{}", self.wiki_base_url, page.space_key, page.id)
    }
}

fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        text.to_string()
    } else {
        text.chars().take(SNIPPET_MAX_CHARS).collect()
    }
}

fn truncate_body(text: &str) -> String {
    if text.chars().count() <= BODY_TRUNCATE_CHARS {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(BODY_TRUNCATE_CHARS).collect();
        truncated.push_str(BODY_TRUNCATE_MARKER);
        truncated
    }
}
