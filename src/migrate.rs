//! Idempotent schema creation.
//!
//! | Table | Holds |
//! |-------|-------|
//! | `documents` | document metadata (one row per upload) |
//! | `document_contents` | normalized raw text |
//! | `chunks` | chunk text plus its embedding BLOB |
//! | `chunk_vectors` | vector index rows read by the primary search tier |
//! | `kb_entries` | knowledge-base entries plus embedding BLOB |
//! | `kb_vectors` | knowledge-base vector index rows |
//!
//! The two `*_vectors` tables are derived data: [`create_index_tables`] and
//! `SqliteStore::rebuild_index` can recreate them from the embedding columns.
//! There are no foreign keys between tables because chunks are written
//! before their metadata row exists.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            chunk_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_contents (
            document_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            body TEXT NOT NULL,
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            overlap INTEGER NOT NULL DEFAULT 0,
            label TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_entries (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    create_index_tables(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_contents_owner ON document_contents(owner_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_owner_document ON chunks(owner_id, document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_entries_source ON kb_entries(source_id)")
        .execute(pool)
        .await?;

    debug!("schema up to date");
    Ok(())
}

/// Create the vector index tables if they are missing.
pub async fn create_index_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_vectors (
            entry_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_owner ON chunk_vectors(owner_id, document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
