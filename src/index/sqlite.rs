//! SQLite-backed [`VectorIndex`].
//!
//! One database per project at `<project>/vectordb/index.sqlite`, opened in
//! WAL mode. Embeddings are stored as little-endian `f32` BLOBs and searched
//! by brute-force cosine distance in Rust.
//!
//! Schema (created idempotently by [`SqliteVectorIndex::create`]):
//!
//! ```text
//! chunks(chunk_id PK, source_id, source_type, source_url, source_title,
//!        chunk_index, total_chunks, text, hash, embedding BLOB, created_at)
//! index_meta(key PK, value)        -- embedding_model, embedding_dims
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob, EmbeddingSpace};
use crate::models::SourceType;

use super::{check_space, rank_neighbors, Neighbor, StoredChunk, VectorIndex};

/// File name of the index database inside the `vectordb` directory.
pub const INDEX_FILE: &str = "index.sqlite";

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    path: PathBuf,
    /// Writers in this process take turns; a deferred transaction that reads
    /// before writing cannot be upgraded once another connection has written.
    write_lock: tokio::sync::Mutex<()>,
}

impl SqliteVectorIndex {
    /// Whether `dir` holds an initialized index.
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file()
    }

    /// Open or create the index in `dir` and run schema migrations.
    pub async fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;
        let index = Self::connect(dir, true).await?;
        index.migrate().await?;
        Ok(index)
    }

    /// Open an existing index. Fails if `dir` has no index database.
    pub async fn open(dir: &Path) -> Result<Self> {
        let index = Self::connect(dir, false).await?;
        index.migrate().await?;
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn connect(dir: &Path, create: bool) -> Result<Self> {
        let path = dir.join(INDEX_FILE);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open vector index: {}", path.display()))?;

        Ok(Self {
            pool,
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_url TEXT,
                source_title TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn space(&self) -> Result<Option<EmbeddingSpace>> {
        let rows = sqlx::query(
            "SELECT key, value FROM index_meta WHERE key IN ('embedding_model', 'embedding_dims')",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut model = None;
        let mut dims = None;
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                "embedding_model" => model = Some(value),
                "embedding_dims" => dims = value.parse::<usize>().ok(),
                _ => {}
            }
        }
        Ok(match (model, dims) {
            (Some(model), Some(dims)) => Some(EmbeddingSpace { model, dims }),
            _ => None,
        })
    }

    async fn replace_source(
        &self,
        source_id: &str,
        space: &EmbeddingSpace,
        chunks: &[StoredChunk],
    ) -> Result<()> {
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        // Space check and write share the transaction so two writers
        // cannot both claim an empty index with different models.
        let existing: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM index_meta WHERE key IN ('embedding_model', 'embedding_dims')",
        )
        .fetch_all(&mut *tx)
        .await?;
        let model = existing
            .iter()
            .find(|(k, _)| k == "embedding_model")
            .map(|(_, v)| v.clone());
        let dims = existing
            .iter()
            .find(|(k, _)| k == "embedding_dims")
            .and_then(|(_, v)| v.parse::<usize>().ok());
        match (model, dims) {
            (Some(model), Some(dims)) => {
                check_space(Some(&EmbeddingSpace { model, dims }), space)?;
            }
            _ => {
                sqlx::query(
                    "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('embedding_model', ?), ('embedding_dims', ?)",
                )
                .bind(&space.model)
                .bind(space.dims.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("DELETE FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        let now = chrono::Utc::now().timestamp();
        for sc in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, source_id, source_type, source_url, source_title,
                                    chunk_index, total_chunks, text, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&sc.chunk.chunk_id)
            .bind(&sc.chunk.source_id)
            .bind(sc.source_type.as_str())
            .bind(&sc.source_url)
            .bind(&sc.source_title)
            .bind(sc.chunk.chunk_index as i64)
            .bind(sc.chunk.total_chunks as i64)
            .bind(&sc.chunk.text)
            .bind(&sc.chunk.hash)
            .bind(vec_to_blob(&sc.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, source_id, source_type, source_url, source_title,
                   chunk_index, total_chunks, text, embedding
            FROM chunks
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut neighbors = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let source_type: String = row.get("source_type");
            let chunk_index: i64 = row.get("chunk_index");
            let total_chunks: i64 = row.get("total_chunks");
            neighbors.push(Neighbor {
                chunk_id: row.get("chunk_id"),
                source_id: row.get("source_id"),
                source_type: SourceType::from_str(&source_type)?,
                source_url: row.get("source_url"),
                source_title: row.get("source_title"),
                chunk_index: chunk_index as usize,
                total_chunks: total_chunks as usize,
                text: row.get("text"),
                distance: cosine_distance(query, &blob_to_vec(&blob)),
            });
        }
        Ok(rank_neighbors(neighbors, k))
    }

    async fn source_chunk_count(&self, source_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn stored(source_id: &str, index: usize, text: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            chunk: Chunk {
                chunk_id: format!("{}-{:04}", source_id, index),
                source_id: source_id.to_string(),
                chunk_index: index,
                total_chunks: 1,
                text: text.to_string(),
                hash: String::new(),
            },
            source_type: SourceType::Web,
            source_url: Some("https://example.com".to_string()),
            source_title: "Example".to_string(),
            embedding,
        }
    }

    fn space() -> EmbeddingSpace {
        EmbeddingSpace {
            model: "m".to_string(),
            dims: 2,
        }
    }

    #[tokio::test]
    async fn test_open_requires_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!SqliteVectorIndex::exists(dir.path()));
        assert!(SqliteVectorIndex::open(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteVectorIndex::create(dir.path()).await.unwrap();
        index.close().await;
        let index = SqliteVectorIndex::create(dir.path()).await.unwrap();
        assert!(SqliteVectorIndex::exists(dir.path()));
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index.space().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_search_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = SqliteVectorIndex::create(dir.path()).await.unwrap();
            index
                .replace_source("s1", &space(), &[stored("s1", 0, "old", vec![1.0, 0.0])])
                .await
                .unwrap();
            index
                .replace_source("s1", &space(), &[stored("s1", 0, "new", vec![0.0, 1.0])])
                .await
                .unwrap();
            index.close().await;
        }

        let index = SqliteVectorIndex::open(dir.path()).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.space().await.unwrap(), Some(space()));
        let hits = index.nearest(&[0.0, 1.0], 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "new");
        assert_eq!(hits[0].source_type, SourceType::Web);
        assert!(hits[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn test_mismatched_space_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let index = SqliteVectorIndex::create(dir.path()).await.unwrap();
        index
            .replace_source("s1", &space(), &[stored("s1", 0, "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let other = EmbeddingSpace {
            model: "other".to_string(),
            dims: 2,
        };
        assert!(index
            .replace_source("s1", &other, &[stored("s1", 0, "b", vec![1.0, 0.0])])
            .await
            .is_err());
        let hits = index.nearest(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].text, "a");
    }
}
