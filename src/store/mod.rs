//! Store (C5): relational + vector persistence over PostgreSQL + `pgvector`.
//!
//! Generalizes the teacher's `SqliteMemoryStore` (`src/memory.rs`) — same
//! pool-owning-struct shape, same `CREATE TABLE IF NOT EXISTS` migration
//! style — onto a real vector-typed column and cosine operator, since the
//! spec requires genuine ANN search that SQLite cannot provide.

pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{Result, StoreError};
use crate::text::ParsedLink;
use models::{Chunk, LinkType, Page, PageLink, ScoredChunk, SyncState, UpsertOutcome};

/// Contract for the persistence layer (C5)
#[async_trait]
pub trait Store: Send + Sync {
    /// Version-monotonic page upsert: a `version <= stored.version` is a no-op.
    async fn upsert_page(&self, page: &Page) -> Result<UpsertOutcome>;

    async fn get_pages(&self, page_ids: &[String]) -> Result<Vec<Page>>;

    async fn list_pages(&self, space_key: Option<&str>) -> Result<Vec<Page>>;

    async fn count_pages(&self) -> Result<i64>;

    async fn list_spaces_with_counts(&self) -> Result<Vec<(String, i64)>>;

    /// Atomically replace all chunks for a page (delete-then-insert, one transaction)
    async fn replace_chunks(&self, page_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Cosine nearest-neighbor search over chunk embeddings
    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Atomically replace all outgoing links for a page
    async fn replace_outgoing_links(&self, from_page_id: &str, links: &[ParsedLink]) -> Result<()>;

    /// Distinct link targets reachable from any of `seeds`, excluding `seeds` itself
    async fn linked_pages(&self, seeds: &[String], limit: usize) -> Result<Vec<PageLink>>;

    /// Cheap pre-check so a stale page never pays for chunking/embedding work
    /// it's about to throw away.
    async fn stored_page_version(&self, page_id: &str) -> Result<Option<i64>>;

    /// Commit a page's upsert, outgoing links, and chunk set as one
    /// transaction: the version check, the link replace, and the chunk
    /// replace land together or not at all. Re-checks the version inside
    /// the transaction, so a concurrent writer still can't race this into
    /// an inconsistent state even if `stored_page_version` was stale.
    async fn commit_page(&self, page: &Page, links: &[ParsedLink], chunks: &[Chunk]) -> Result<UpsertOutcome>;

    async fn get_or_init_sync_state(&self) -> Result<SyncState>;

    async fn commit_sync_state(
        &self,
        run_started_at: DateTime<Utc>,
        status: &str,
        last_error: Option<&str>,
        pages_synced: i64,
        chunks_created: i64,
        spaces_synced: i64,
    ) -> Result<()>;
}

/// Real implementation of [`Store`] backed by a PostgreSQL connection pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32, embedding_dimension: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate(embedding_dimension).await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Embedded SQL DDL, run once at startup, mirroring the teacher's
    /// `CREATE TABLE IF NOT EXISTS` migration style.
    async fn migrate(&self, embedding_dimension: usize) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                space_key TEXT NOT NULL,
                title TEXT NOT NULL,
                body_text TEXT NOT NULL,
                version BIGINT NOT NULL,
                last_modified TIMESTAMPTZ NOT NULL,
                synced_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let create_chunks = format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id UUID PRIMARY KEY,
                page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                chunk_index INT NOT NULL,
                text TEXT NOT NULL,
                heading_path JSONB,
                token_count INT NOT NULL,
                embedding VECTOR({embedding_dimension}) NOT NULL
            )
            "#
        );
        sqlx::query(&create_chunks).execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS chunks_page_id_idx ON chunks(page_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS chunks_embedding_ivf_idx
            ON chunks USING ivfflat (embedding vector_cosine_ops)
            WITH (lists = 100)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_links (
                id UUID PRIMARY KEY,
                from_page_id TEXT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                to_page_id TEXT,
                url TEXT NOT NULL,
                link_text TEXT NOT NULL,
                link_type TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS page_links_from_idx ON page_links(from_page_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS page_links_to_idx ON page_links(to_page_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                id INT PRIMARY KEY DEFAULT 1,
                last_run_at TIMESTAMPTZ,
                last_run_status TEXT,
                last_error TEXT,
                pages_synced BIGINT NOT NULL DEFAULT 0,
                chunks_created BIGINT NOT NULL DEFAULT 0,
                spaces_synced BIGINT NOT NULL DEFAULT 0,
                CHECK (id = 1)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id UUID PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                title TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_stats (
                id UUID PRIMARY KEY,
                session_id UUID NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                prompt_tokens BIGINT NOT NULL,
                completion_tokens BIGINT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_feedback (
                id UUID PRIMARY KEY,
                message_id UUID NOT NULL REFERENCES chat_messages(id) ON DELETE CASCADE,
                rating INT NOT NULL,
                comment TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_page(&self, page: &Page) -> Result<UpsertOutcome> {
        let existing_version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM pages WHERE id = $1")
                .bind(&page.id)
                .fetch_optional(&self.pool)
                .await?;

        match existing_version {
            Some(stored_version) if page.version <= stored_version => Ok(UpsertOutcome::Skipped),
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE pages SET space_key = $2, title = $3, body_text = $4,
                        version = $5, last_modified = $6, synced_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(&page.id)
                .bind(&page.space_key)
                .bind(&page.title)
                .bind(&page.body_text)
                .bind(page.version)
                .bind(page.last_modified)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO pages (id, space_key, title, body_text, version, last_modified, synced_at)
                    VALUES ($1, $2, $3, $4, $5, $6, now())
                    "#,
                )
                .bind(&page.id)
                .bind(&page.space_key)
                .bind(&page.title)
                .bind(&page.body_text)
                .bind(page.version)
                .bind(page.last_modified)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn get_pages(&self, page_ids: &[String]) -> Result<Vec<Page>> {
        let pages = sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE id = ANY($1)")
            .bind(page_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(pages)
    }

    async fn list_pages(&self, space_key: Option<&str>) -> Result<Vec<Page>> {
        let pages = match space_key {
            Some(key) => {
                sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE space_key = $1")
                    .bind(key)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as::<_, Page>("SELECT * FROM pages")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(pages)
    }

    async fn count_pages(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_spaces_with_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT space_key, count(*) as cnt FROM pages GROUP BY space_key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("space_key"), row.get("cnt")))
            .collect())
    }

    async fn replace_chunks(&self, page_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE page_id = $1")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, page_id, chunk_index, text, heading_path, token_count, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(chunk.id)
            .bind(&chunk.page_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.heading_path)
            .bind(chunk.token_count)
            .bind(&chunk.embedding)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let query_vector = pgvector::Vector::from(query.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT page_id, chunk_index, text, 1 - (embedding <=> $1) AS score
            FROM chunks
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
        )
        .bind(&query_vector)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredChunk {
                page_id: row.get("page_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score: row.get("score"),
            })
            .collect())
    }

    async fn replace_outgoing_links(&self, from_page_id: &str, links: &[ParsedLink]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM page_links WHERE from_page_id = $1")
            .bind(from_page_id)
            .execute(&mut *tx)
            .await?;

        for link in links {
            sqlx::query(
                r#"
                INSERT INTO page_links (id, from_page_id, to_page_id, url, link_text, link_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(uuid::Uuid::new_v4())
            .bind(from_page_id)
            .bind(&link.page_id)
            .bind(&link.url)
            .bind(&link.text)
            .bind(LinkType::from(link.link_type))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(())
    }

    async fn stored_page_version(&self, page_id: &str) -> Result<Option<i64>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM pages WHERE id = $1")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(version)
    }

    async fn commit_page(&self, page: &Page, links: &[ParsedLink], chunks: &[Chunk]) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing_version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM pages WHERE id = $1")
                .bind(&page.id)
                .fetch_optional(&mut *tx)
                .await?;

        let outcome = match existing_version {
            Some(stored_version) if page.version <= stored_version => {
                tx.rollback()
                    .await
                    .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
                return Ok(UpsertOutcome::Skipped);
            }
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE pages SET space_key = $2, title = $3, body_text = $4,
                        version = $5, last_modified = $6, synced_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(&page.id)
                .bind(&page.space_key)
                .bind(&page.title)
                .bind(&page.body_text)
                .bind(page.version)
                .bind(page.last_modified)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO pages (id, space_key, title, body_text, version, last_modified, synced_at)
                    VALUES ($1, $2, $3, $4, $5, $6, now())
                    "#,
                )
                .bind(&page.id)
                .bind(&page.space_key)
                .bind(&page.title)
                .bind(&page.body_text)
                .bind(page.version)
                .bind(page.last_modified)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Created
            }
        };

        sqlx::query("DELETE FROM page_links WHERE from_page_id = $1")
            .bind(&page.id)
            .execute(&mut *tx)
            .await?;
        for link in links {
            sqlx::query(
                r#"
                INSERT INTO page_links (id, from_page_id, to_page_id, url, link_text, link_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(uuid::Uuid::new_v4())
            .bind(&page.id)
            .bind(&link.page_id)
            .bind(&link.url)
            .bind(&link.text)
            .bind(LinkType::from(link.link_type))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE page_id = $1")
            .bind(&page.id)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, page_id, chunk_index, text, heading_path, token_count, embedding)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(chunk.id)
            .bind(&chunk.page_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.heading_path)
            .bind(chunk.token_count)
            .bind(&chunk.embedding)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(outcome)
    }

    async fn linked_pages(&self, seeds: &[String], limit: usize) -> Result<Vec<PageLink>> {
        let links = sqlx::query_as::<_, PageLink>(
            r#"
            SELECT DISTINCT ON (to_page_id) *
            FROM page_links
            WHERE from_page_id = ANY($1)
              AND to_page_id IS NOT NULL
              AND NOT (to_page_id = ANY($1))
            LIMIT $2
            "#,
        )
        .bind(seeds)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn get_or_init_sync_state(&self) -> Result<SyncState> {
        sqlx::query("INSERT INTO sync_state (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
            .execute(&self.pool)
            .await?;
        let state = sqlx::query_as::<_, SyncState>("SELECT * FROM sync_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(state)
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
        sqlx::query(
            r#"
            UPDATE sync_state SET
                last_run_at = $1,
                last_run_status = $2,
                last_error = $3,
                pages_synced = pages_synced + $4,
                chunks_created = chunks_created + $5,
                spaces_synced = spaces_synced + $6
            WHERE id = 1
            "#,
        )
        .bind(run_started_at)
        .bind(status)
        .bind(last_error)
        .bind(pages_synced)
        .bind(chunks_created)
        .bind(spaces_synced)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
