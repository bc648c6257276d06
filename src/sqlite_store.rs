//! SQLite-backed [`VectorStore`].
//!
//! Vectors are rows of the `vectors` table, scoped by collection name, with
//! the embedding stored as a little-endian f32 BLOB. Similarity is computed
//! in Rust over the collection's rows, read in insertion order so that equal
//! scores keep that order.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use folio_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use folio_core::models::{ChunkRef, IndexedVector, VectorMetadata};
use folio_core::store::{rank_candidates, ScoredVector, VectorStore};

use crate::{db, migrate};

/// File name of the database inside `index.path`.
pub const DB_FILE_NAME: &str = "index.sqlite";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    /// Open (creating if absent) `<dir>/index.sqlite` and select `collection`.
    pub async fn open(dir: &Path, collection: &str) -> Result<Self> {
        let pool = db::connect(&dir.join(DB_FILE_NAME)).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool, collection))
    }

    pub fn new(pool: SqlitePool, collection: &str) -> Self {
        Self {
            pool,
            collection: collection.to_string(),
        }
    }
}

fn row_to_vector(row: &sqlx::sqlite::SqliteRow) -> Result<IndexedVector> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    let sequence_index: i64 = row.try_get("sequence_index")?;
    Ok(IndexedVector {
        chunk_ref: ChunkRef {
            chunk_id: row.try_get("chunk_id")?,
            content_hash: row.try_get("content_hash")?,
        },
        embedding: blob_to_vec(&blob),
        text: row.try_get("text")?,
        metadata: VectorMetadata {
            source: row.try_get("source")?,
            document_id: row.try_get("document_id")?,
            sequence_index: sequence_index as usize,
            language: row.try_get("language")?,
        },
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, vectors: &[IndexedVector]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for v in vectors {
            sqlx::query(
                r#"
                INSERT INTO vectors (collection, chunk_id, content_hash, document_id, source,
                                     sequence_index, language, text, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&self.collection)
            .bind(&v.chunk_ref.chunk_id)
            .bind(&v.chunk_ref.content_hash)
            .bind(&v.metadata.document_id)
            .bind(&v.metadata.source)
            .bind(v.metadata.sequence_index as i64)
            .bind(&v.metadata.language)
            .bind(&v.text)
            .bind(v.embedding.len() as i64)
            .bind(vec_to_blob(&v.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredVector>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, content_hash, document_id, source, sequence_index, language, text, embedding
            FROM vectors
            WHERE collection = ?
            ORDER BY seq
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let vector = row_to_vector(row)?;
            candidates.push(ScoredVector {
                score: cosine_similarity(query, &vector.embedding),
                vector,
            });
        }
        rank_candidates(&mut candidates, k);
        Ok(candidates)
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_meta WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn chunk_refs(&self) -> Result<HashSet<ChunkRef>> {
        let rows = sqlx::query("SELECT chunk_id, content_hash FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(ChunkRef {
                    chunk_id: row.try_get("chunk_id")?,
                    content_hash: row.try_get("content_hash")?,
                })
            })
            .collect()
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let sources: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source FROM vectors WHERE collection = ? ORDER BY source",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE collection = ? AND key = ?")
                .bind(&self.collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_meta (collection, key, value) VALUES (?, ?, ?)
            ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(&self.collection)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
