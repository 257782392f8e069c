//! SQLite-backed [`Store`] and [`KnowledgeStore`].
//!
//! Chunks keep their embedding in the `chunks` table and a copy in the
//! `chunk_vectors` index table. Index-assisted search reads
//! `chunk_vectors`; the scan path reads `chunks` directly, so losing the
//! index table (or a stale one) degrades search instead of breaking it.
//! [`SqliteStore::rebuild_index`] recreates both index tables from the
//! embedding columns.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use tutor_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tutor_rag_core::models::{Chunk, DocScope, Document, DocumentContent, KnowledgeEntry};
use tutor_rag_core::store::{
    CollectionCounts, KnowledgeStore, ScoredChunk, ScoredEntry, Store, StoreError,
};

const CHUNK_COLUMNS: &str =
    "c.id, c.document_id, c.owner_id, c.chunk_index, c.text, c.overlap, c.label, c.hash, c.embedding";

/// SQLite implementation of the store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Repopulate `chunk_vectors` and `kb_vectors` from the stored
    /// embeddings. Returns `(chunk rows, knowledge rows)`.
    pub async fn rebuild_index(&self) -> Result<(u64, u64), StoreError> {
        crate::migrate::create_index_tables(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let chunk_rows = sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, owner_id, document_id, embedding)
            SELECT id, owner_id, document_id, embedding FROM chunks
            WHERE embedding IS NOT NULL AND length(embedding) > 0
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(store_err)?
        .rows_affected();

        sqlx::query("DELETE FROM kb_vectors")
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        let kb_rows = sqlx::query(
            r#"
            INSERT INTO kb_vectors (entry_id, embedding)
            SELECT id, embedding FROM kb_entries
            WHERE embedding IS NOT NULL AND length(embedding) > 0
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(store_err)?
        .rows_affected();
        tx.commit().await.map_err(store_err)?;

        info!(chunk_rows, kb_rows, "vector index rebuilt");
        Ok((chunk_rows, kb_rows))
    }

    /// Records an owner has in each document collection.
    pub async fn counts(&self, owner_id: &str) -> Result<CollectionCounts, StoreError> {
        Ok(CollectionCounts {
            chunks: self.count_rows("chunks", owner_id).await?,
            contents: self.count_rows("document_contents", owner_id).await?,
            documents: self.count_rows("documents", owner_id).await?,
        })
    }

    async fn count_rows(&self, table: &str, owner_id: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE owner_id = ?", table);
        let n: i64 = sqlx::query_scalar(&sql)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n as u64)
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

/// Errors from queries against an index table. A missing table means the
/// index is gone, not that the store is down.
fn index_err(e: sqlx::Error) -> StoreError {
    let message = e.to_string();
    if message.contains("no such table") {
        StoreError::IndexUnavailable(message)
    } else {
        store_err(e)
    }
}

async fn table_exists(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    name: &str,
) -> Result<bool, StoreError> {
    sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(name)
        .fetch_one(&mut **tx)
        .await
        .map_err(store_err)
}

fn is_missing_table(e: &sqlx::Error) -> bool {
    e.to_string().contains("no such table")
}

/// Append `WHERE owner = ? [AND document IN (...)]`.
fn push_scope(
    qb: &mut QueryBuilder<'_, Sqlite>,
    owner_column: &str,
    document_column: &str,
    owner_id: &str,
    scope: &DocScope,
) {
    qb.push(format!(" WHERE {} = ", owner_column))
        .push_bind(owner_id.to_string());
    if let Some(ids) = scope.named_ids() {
        if ids.is_empty() {
            qb.push(" AND 0");
            return;
        }
        qb.push(format!(" AND {} IN (", document_column));
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(id.clone());
        }
        list.push_unseparated(")");
    }
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let overlap: i64 = row.get("overlap");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        owner_id: row.get("owner_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        overlap: overlap.max(0) as usize,
        label: row.get("label"),
        hash: row.get("hash"),
        embedding: embedding.map(|b| blob_to_vec(&b)).unwrap_or_default(),
    }
}

fn entry_from_row(row: &SqliteRow) -> KnowledgeEntry {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    KnowledgeEntry {
        id: row.get("id"),
        source_id: row.get("source_id"),
        title: row.get("title"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        embedding: embedding.map(|b| blob_to_vec(&b)).unwrap_or_default(),
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        display_name: row.get("display_name"),
        content_type: row.get("content_type"),
        chunk_count: row.get("chunk_count"),
        created_at: row.get("created_at"),
    }
}

fn embedding_blob(vector: &[f32]) -> Option<Vec<u8>> {
    if vector.is_empty() {
        None
    } else {
        Some(vec_to_blob(vector))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let index_present = table_exists(&mut tx, "chunk_vectors").await?;
        if !index_present {
            warn!("chunk_vectors table missing; chunks stored without index rows");
        }

        for chunk in chunks {
            let blob = embedding_blob(&chunk.embedding);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, owner_id, chunk_index, text, overlap, label, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.owner_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.overlap as i64)
            .bind(&chunk.label)
            .bind(&chunk.hash)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            if let (true, Some(blob)) = (index_present, &blob) {
                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, owner_id, document_id, embedding) VALUES (?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&chunk.owner_id)
                .bind(&chunk.document_id)
                .bind(blob)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            }
        }

        tx.commit().await.map_err(store_err)?;
        debug!(chunks = chunks.len(), "chunks committed");
        Ok(())
    }

    async fn put_content(&self, content: &DocumentContent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO document_contents (document_id, owner_id, body, content_hash)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                body = excluded.body,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&content.document_id)
        .bind(&content.owner_id)
        .bind(&content.body)
        .bind(&content.content_hash)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn put_metadata(&self, doc: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, display_name, content_type, chunk_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                content_type = excluded.content_type,
                chunk_count = excluded.chunk_count
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.display_name)
        .bind(&doc.content_type)
        .bind(doc.chunk_count)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Reads every in-scope row of `chunk_vectors` and scores it in Rust.
    /// The ranking is exact, not approximate; `limit` only truncates the
    /// sorted full scan. A missing `chunk_vectors` table surfaces as
    /// [`StoreError::IndexUnavailable`].
    async fn vector_search(
        &self,
        query_vec: &[f32],
        owner_id: &str,
        scope: &DocScope,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}, cv.embedding AS index_vector FROM chunk_vectors cv JOIN chunks c ON c.id = cv.chunk_id",
            CHUNK_COLUMNS
        ));
        push_scope(&mut qb, "cv.owner_id", "cv.document_id", owner_id, scope);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(index_err)?;

        let mut hits: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("index_vector");
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
                ScoredChunk {
                    chunk: chunk_from_row(row),
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scan_chunks(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Chunk>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM chunks c", CHUNK_COLUMNS));
        push_scope(&mut qb, "c.owner_id", "c.document_id", owner_id, scope);
        qb.push(" ORDER BY c.rowid");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(store_err)?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Document>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, owner_id, display_name, content_type, chunk_count, created_at FROM documents",
        );
        push_scope(&mut qb, "owner_id", "id", owner_id, scope);
        qb.push(" ORDER BY created_at ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(store_err)?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn delete_chunks(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM chunk_vectors");
        push_scope(&mut qb, "owner_id", "document_id", owner_id, scope);
        match qb.build().execute(&mut *tx).await {
            Ok(r) => debug!(rows = r.rows_affected(), "index rows deleted"),
            Err(e) if is_missing_table(&e) => debug!("no chunk_vectors table; skipping index rows"),
            Err(e) => return Err(store_err(e)),
        }

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM chunks");
        push_scope(&mut qb, "owner_id", "document_id", owner_id, scope);
        let deleted = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(store_err)?
            .rows_affected();

        tx.commit().await.map_err(store_err)?;
        Ok(deleted)
    }

    async fn delete_content(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM document_contents");
        push_scope(&mut qb, "owner_id", "document_id", owner_id, scope);
        Ok(qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(store_err)?
            .rows_affected())
    }

    async fn delete_metadata(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM documents");
        push_scope(&mut qb, "owner_id", "id", owner_id, scope);
        Ok(qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(store_err)?
            .rows_affected())
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn insert_entries(&self, entries: &[KnowledgeEntry]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        insert_entries_tx(&mut tx, entries).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn search_entries(
        &self,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.source_id, e.title, e.chunk_index, e.text, e.embedding,
                   kv.embedding AS index_vector
            FROM kb_vectors kv
            JOIN kb_entries e ON e.id = kv.entry_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(index_err)?;

        let mut hits: Vec<ScoredEntry> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("index_vector");
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
                ScoredEntry {
                    entry: entry_from_row(row),
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scan_entries(&self) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, source_id, title, chunk_index, text, embedding FROM kb_entries ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    async fn delete_source(&self, source_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let deleted = delete_source_tx(&mut tx, source_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(deleted)
    }

    async fn replace_source(
        &self,
        source_id: &str,
        entries: &[KnowledgeEntry],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let removed = delete_source_tx(&mut tx, source_id).await?;
        insert_entries_tx(&mut tx, entries).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(removed)
    }
}

async fn insert_entries_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    entries: &[KnowledgeEntry],
) -> Result<(), StoreError> {
    let index_present = table_exists(tx, "kb_vectors").await?;
    if !index_present {
        warn!("kb_vectors table missing; entries stored without index rows");
    }
    for entry in entries {
        let blob = embedding_blob(&entry.embedding);
        sqlx::query(
            r#"
            INSERT INTO kb_entries (id, source_id, title, chunk_index, text, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.source_id)
        .bind(&entry.title)
        .bind(entry.chunk_index)
        .bind(&entry.text)
        .bind(&blob)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;

        if let (true, Some(blob)) = (index_present, &blob) {
            sqlx::query("INSERT INTO kb_vectors (entry_id, embedding) VALUES (?, ?)")
                .bind(&entry.id)
                .bind(blob)
                .execute(&mut **tx)
                .await
                .map_err(store_err)?;
        }
    }
    Ok(())
}

async fn delete_source_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    source_id: &str,
) -> Result<u64, StoreError> {
    match sqlx::query(
        "DELETE FROM kb_vectors WHERE entry_id IN (SELECT id FROM kb_entries WHERE source_id = ?)",
    )
    .bind(source_id)
    .execute(&mut **tx)
    .await
    {
        Ok(_) => {}
        Err(e) if is_missing_table(&e) => debug!("no kb_vectors table; skipping index rows"),
        Err(e) => return Err(store_err(e)),
    }
    Ok(sqlx::query("DELETE FROM kb_entries WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?
        .rows_affected())
}
