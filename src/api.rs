//! HTTP surface for the ingestion and retrieval pipeline
//!
//! Hosts the three retrieval operations (C7) plus the operational endpoints
//! (health, config read-back, on-demand sync trigger) behind one `axum`
//! router, following the teacher's `AppState` / `ApiError` / `utoipa`
//! conventions (`src/api.rs`).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{OpenApi, ToSchema};

use crate::context::AppContext;
use crate::error::AppError;

/// Wraps [`AppError`] so handlers can return it directly via `?`
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            AppError::Config(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Wiki(_) | AppError::Embed(_) => {
                (StatusCode::BAD_GATEWAY, self.0.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigResponse {
    pub wiki_base_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub sync_interval_minutes: u64,
    pub search_top_k: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GetPagesRequest {
    pub page_ids: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExpandRequest {
    pub seeds: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncTriggerResponse {
    pub pages_synced: i64,
    pub pages_skipped: i64,
    pub pages_failed: i64,
    pub chunks_created: i64,
}

/// Build the application router. Callers own binding/serving via
/// [`start_server`] or their own `axum::serve` call.
pub fn create_router(context: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/api/retrieval/search", post(search_handler))
        .route("/api/retrieval/pages", post(get_pages_handler))
        .route("/api/retrieval/expand", post(expand_handler))
        .route("/api/sync/trigger", post(sync_trigger_handler))
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(context)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

#[utoipa::path(get, path = "/api/config", responses((status = 200, body = ConfigResponse)))]
async fn config_handler(State(context): State<AppContext>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        wiki_base_url: context.config.wiki.base_url.clone(),
        embedding_model: context.config.embedding.model.clone(),
        embedding_dimension: context.config.embedding.dimension(),
        sync_interval_minutes: context.config.sync.interval_minutes,
        search_top_k: context.config.search.top_k,
    })
}

#[utoipa::path(
    post,
    path = "/api/retrieval/search",
    request_body = SearchRequest,
    responses((status = 200, body = [crate::retrieval::SearchHit]))
)]
async fn search_handler(
    State(context): State<AppContext>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<Vec<crate::retrieval::SearchHit>>> {
    let hits = context
        .retrieval
        .search(&request.query, request.top_k, request.max_pages, request.min_score)
        .await?;
    Ok(Json(hits))
}

#[utoipa::path(
    post,
    path = "/api/retrieval/pages",
    request_body = GetPagesRequest,
    responses((status = 200, body = [crate::retrieval::PageResult]))
)]
async fn get_pages_handler(
    State(context): State<AppContext>,
    Json(request): Json<GetPagesRequest>,
) -> ApiResult<Json<Vec<crate::retrieval::PageResult>>> {
    let pages = context.retrieval.get_pages(&request.page_ids).await?;
    Ok(Json(pages))
}

#[utoipa::path(
    post,
    path = "/api/retrieval/expand",
    request_body = ExpandRequest,
    responses((status = 200, body = [crate::retrieval::ExpandedPage]))
)]
async fn expand_handler(
    State(context): State<AppContext>,
    Json(request): Json<ExpandRequest>,
) -> ApiResult<Json<Vec<crate::retrieval::ExpandedPage>>> {
    let expanded = context.retrieval.expand(&request.seeds, request.limit).await?;
    Ok(Json(expanded))
}

#[utoipa::path(post, path = "/api/sync/trigger", responses((status = 200, body = SyncTriggerResponse)))]
async fn sync_trigger_handler(State(context): State<AppContext>) -> ApiResult<Json<SyncTriggerResponse>> {
    let stats = context.sync_orchestrator.run_incremental().await?;
    Ok(Json(SyncTriggerResponse {
        pages_synced: stats.pages_synced,
        pages_skipped: stats.pages_skipped,
        pages_failed: stats.pages_failed,
        chunks_created: stats.chunks_created,
    }))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        config_handler,
        search_handler,
        get_pages_handler,
        expand_handler,
        sync_trigger_handler,
    ),
    components(schemas(
        HealthResponse,
        ConfigResponse,
        ErrorResponse,
        SearchRequest,
        GetPagesRequest,
        ExpandRequest,
        SyncTriggerResponse,
        crate::retrieval::SearchHit,
        crate::retrieval::PageResult,
        crate::retrieval::ExpandedPage,
        crate::store::models::LinkType,
    )),
    tags(
        (name = "health", description = "Health and operational endpoints"),
        (name = "retrieval", description = "Search, page lookup, and link expansion"),
    ),
    info(
        title = "Confluence RAG Retrieval API",
        version = "0.1.0",
        description = "Ingestion and retrieval pipeline for a retrieval-augmented question-answering service over a Confluence-shaped wiki",
    )
)]
struct ApiDoc;

/// Bind and serve the router until the process is signaled to stop.
pub async fn start_server(context: AppContext, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    info!(%addr, "starting HTTP server");

    let app = create_router(context);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("ok"));
    }

    #[test]
    fn search_request_deserializes_with_defaults() {
        let request: SearchRequest = serde_json::from_str(r#"{"query": "deploy process"}"#).unwrap();
        assert_eq!(request.query, "deploy process");
        assert!(request.top_k.is_none());
    }
}
