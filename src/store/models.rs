//! Row types for the Store (C5), plus the agent-side tables named in §6 as
//! external collaborators. The agent loop itself stays out of scope; these
//! structs exist so the schema migration is complete and self-consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A wiki page mirrored into the store
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub space_key: String,
    pub title: String,
    pub body_text: String,
    pub version: i64,
    pub last_modified: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// One chunk of a page's body, with its embedding (C3 + C4 output, C5 storage)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Chunk {
    pub id: Uuid,
    pub page_id: String,
    pub chunk_index: i32,
    pub text: String,
    pub heading_path: Option<serde_json::Value>,
    pub token_count: i32,
    pub embedding: pgvector::Vector,
}

/// A result row from a cosine-similarity search, joined against its chunk
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub page_id: String,
    pub chunk_index: i32,
    pub text: String,
    pub score: f32,
}

/// A directed link edge extracted from a page body
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, ToSchema)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum LinkType {
    Internal,
    External,
    Attachment,
}

impl From<crate::text::LinkType> for LinkType {
    fn from(value: crate::text::LinkType) -> Self {
        match value {
            crate::text::LinkType::Internal => LinkType::Internal,
            crate::text::LinkType::External => LinkType::External,
            crate::text::LinkType::Attachment => LinkType::Attachment,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageLink {
    pub id: Uuid,
    pub from_page_id: String,
    pub to_page_id: Option<String>,
    pub url: String,
    pub link_text: String,
    pub link_type: LinkType,
}

/// Sync watermark/bookkeeping row (one per logical sync run tracker)
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct SyncState {
    pub id: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_error: Option<String>,
    pub pages_synced: i64,
    pub chunks_created: i64,
    pub spaces_synced: i64,
}

/// Outcome of upserting a single page, used by the orchestrator's stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Skipped,
}

/// Agent-side tables (interface-only, per SPEC_FULL §3 ambient additions)

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageStat {
    pub id: Uuid,
    pub session_id: Uuid,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppSetting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageFeedback {
    pub id: Uuid,
    pub message_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
}
