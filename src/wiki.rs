//! Wiki Client (C1): paginated consumption of a Confluence-shaped wiki API
//!
//! Mirrors the teacher's `LlmClient` trait / `OllamaClient` split
//! (`src/llm.rs`): callers depend on the `WikiClient` trait, never directly
//! on `reqwest`, so the orchestrator and tests can swap in `MockWikiClient`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, WikiError};

const MIN_REQUEST_SPACING: Duration = Duration::from_millis(100);
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// A wiki space
#[derive(Debug, Clone, Deserialize)]
pub struct WikiSpace {
    pub key: String,
    pub name: String,
}

/// A single page as returned by the wiki API, storage-format body included
#[derive(Debug, Clone, Deserialize)]
pub struct WikiPage {
    pub id: String,
    pub space_key: String,
    pub title: String,
    pub body_storage: String,
    pub version: i64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone)]
pub struct PageListing {
    pub pages: Vec<WikiPage>,
    pub next_cursor: Option<String>,
}

/// Contract for retrieving content from the upstream wiki (C1)
#[async_trait]
pub trait WikiClient: Send + Sync {
    /// List every space visible to the configured account
    async fn list_spaces(&self) -> Result<Vec<WikiSpace>>;

    /// List one page of pages in a space, optionally following a cursor
    async fn list_pages(&self, space_key: &str, cursor: Option<&str>) -> Result<PageListing>;

    /// Fetch a single page by id, storage-format body included
    async fn get_page(&self, page_id: &str) -> Result<WikiPage>;

    /// List pages across all spaces modified at or after `since` (CQL fallback)
    async fn list_updated_pages(
        &self,
        since: chrono::DateTime<chrono::Utc>,
        cursor: Option<&str>,
    ) -> Result<PageListing>;

    /// Lightweight upstream reachability check
    async fn health(&self) -> Result<()>;
}

/// Real HTTP implementation of [`WikiClient`] using HTTP Basic auth
pub struct HttpWikiClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    api_token: String,
}

impl HttpWikiClient {
    pub fn new(base_url: impl Into<String>, email: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            email: email.into(),
            api_token: api_token.into(),
        }
    }

    /// Perform a GET with retry/backoff per §4.1:
    /// - 429: honor `Retry-After`, retry without spending an attempt
    /// - 5xx/transport: exponential backoff `2^attempt`s, up to 3 attempts
    /// - other 4xx: fail immediately, no retry
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(MIN_REQUEST_SPACING).await;

            let response = self
                .client
                .get(url)
                .basic_auth(&self.email, Some(&self.api_token))
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        return Err(WikiError::RetriesExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        }
                        .into());
                    }
                    attempt += 1;
                    backoff_sleep(attempt).await;
                    continue;
                }
            };

            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            if status.is_server_error() {
                if attempt >= MAX_RETRY_ATTEMPTS {
                    return Err(WikiError::RetriesExhausted {
                        attempts: attempt,
                        last_error: format!("server error: {status}"),
                    }
                    .into());
                }
                attempt += 1;
                backoff_sleep(attempt).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(WikiError::ClientError {
                status: status.as_u16(),
                body,
            }
            .into());
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    tokio::time::sleep(Duration::from_secs(2u64.saturating_pow(attempt))).await;
}

#[derive(Debug, Deserialize)]
struct SpacesResponse {
    results: Vec<WikiSpace>,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    results: Vec<RawPage>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    id: String,
    #[serde(rename = "spaceKey")]
    space_key: String,
    title: String,
    #[serde(rename = "bodyStorage")]
    body_storage: String,
    version: i64,
    #[serde(rename = "lastModified")]
    last_modified: chrono::DateTime<chrono::Utc>,
}

impl From<RawPage> for WikiPage {
    fn from(raw: RawPage) -> Self {
        Self {
            id: raw.id,
            space_key: raw.space_key,
            title: raw.title,
            body_storage: raw.body_storage,
            version: raw.version,
            last_modified: raw.last_modified,
        }
    }
}

#[async_trait]
impl WikiClient for HttpWikiClient {
    async fn list_spaces(&self) -> Result<Vec<WikiSpace>> {
        let url = format!("{}/rest/api/space", self.base_url);
        let response = self.get_with_retry(&url).await?;
        let parsed: SpacesResponse = response
            .json()
            .await
            .map_err(|e| WikiError::PaginationFailed(e.to_string()))?;
        Ok(parsed.results)
    }

    async fn list_pages(&self, space_key: &str, cursor: Option<&str>) -> Result<PageListing> {
        let mut url = format!(
            "{}/rest/api/space/{}/content/page?expand=body.storage,version",
            self.base_url, space_key
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={cursor}"));
        }
        let response = self.get_with_retry(&url).await?;
        let parsed: PagesResponse = response
            .json()
            .await
            .map_err(|e| WikiError::PaginationFailed(e.to_string()))?;
        Ok(PageListing {
            pages: parsed.results.into_iter().map(Into::into).collect(),
            next_cursor: parsed.next_cursor,
        })
    }

    async fn get_page(&self, page_id: &str) -> Result<WikiPage> {
        let url = format!(
            "{}/rest/api/content/{}?expand=body.storage,version",
            self.base_url, page_id
        );
        let response = self.get_with_retry(&url).await?;
        let raw: RawPage = response
            .json()
            .await
            .map_err(|e| WikiError::PageParseFailed(e.to_string()))?;
        Ok(raw.into())
    }

    async fn list_updated_pages(
        &self,
        since: chrono::DateTime<chrono::Utc>,
        cursor: Option<&str>,
    ) -> Result<PageListing> {
        let cql = format!(
            "type = \"page\" and lastModified >= \"{}\"",
            since.format("%Y-%m-%d %H:%M")
        );
        let mut url = format!(
            "{}/rest/api/content/search?cql={}&expand=body.storage,version",
            self.base_url,
            urlencoding_escape(&cql)
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={cursor}"));
        }
        let response = self.get_with_retry(&url).await?;
        let parsed: PagesResponse = response
            .json()
            .await
            .map_err(|e| WikiError::PaginationFailed(e.to_string()))?;
        Ok(PageListing {
            pages: parsed.results.into_iter().map(Into::into).collect(),
            next_cursor: parsed.next_cursor,
        })
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/rest/api/space?limit=1", self.base_url);
        self.get_with_retry(&url).await?;
        Ok(())
    }
}

fn urlencoding_escape(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mockall::mock! {
    pub WikiClientTestDouble {}

    #[async_trait]
    impl WikiClient for WikiClientTestDouble {
        async fn list_spaces(&self) -> Result<Vec<WikiSpace>>;
        async fn list_pages<'a, 'b, 'c>(&'a self, space_key: &'b str, cursor: Option<&'c str>) -> Result<PageListing>;
        async fn get_page(&self, page_id: &str) -> Result<WikiPage>;
        async fn list_updated_pages<'a, 'b>(
            &'a self,
            since: chrono::DateTime<chrono::Utc>,
            cursor: Option<&'b str>,
        ) -> Result<PageListing>;
        async fn health(&self) -> Result<()>;
    }
}

#[cfg(test)]
pub use MockWikiClientTestDouble as MockWikiClient;

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/space"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/space"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"key": "ENG", "name": "Engineering"}]
            })))
            .mount(&server)
            .await;

        let client = HttpWikiClient::new(server.uri(), "bot@example.com", "token");
        let spaces = client.list_spaces().await.unwrap();
        assert_eq!(spaces.len(), 1);
        assert_eq!(spaces[0].key, "ENG");
    }

    #[tokio::test]
    async fn fails_fast_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/space"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpWikiClient::new(server.uri(), "bot@example.com", "token");
        let result = client.list_spaces().await;
        assert!(matches!(
            result,
            Err(crate::error::AppError::Wiki(WikiError::ClientError { status: 404, .. }))
        ));
    }

    #[tokio::test]
    async fn honors_retry_after_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/space"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "1"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/api/space"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": []
            })))
            .mount(&server)
            .await;

        let client = HttpWikiClient::new(server.uri(), "bot@example.com", "token");
        let spaces = client.list_spaces().await.unwrap();
        assert!(spaces.is_empty());
    }
}
