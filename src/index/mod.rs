//! Project-scoped vector index.
//!
//! The [`VectorIndex`] trait is the storage seam for chunk embeddings.
//! [`sqlite::SqliteVectorIndex`] persists to `<project>/vectordb/index.sqlite`;
//! [`memory::InMemoryVectorIndex`] backs tests.
//!
//! Every index records the [`EmbeddingSpace`] of its first write and rejects
//! writes from any other space, so vectors from different models never mix.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingSpace;
use crate::error::CoreError;
use crate::models::{Chunk, SourceType};

/// A chunk plus its embedding and source attribution, as stored in the index.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub source_title: String,
    pub embedding: Vec<f32>,
}

/// A nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub chunk_id: String,
    pub source_id: String,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub source_title: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    /// Cosine distance in `[0, 2]`.
    pub distance: f64,
}

/// Abstract vector store keyed by chunk id.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`count`](VectorIndex::count) | Live number of stored chunks |
/// | [`space`](VectorIndex::space) | Embedding space recorded at first write |
/// | [`replace_source`](VectorIndex::replace_source) | Atomically swap all chunks of one source |
/// | [`nearest`](VectorIndex::nearest) | k nearest chunks by cosine distance |
/// | [`source_chunk_count`](VectorIndex::source_chunk_count) | Chunks held for one source |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn count(&self) -> Result<usize>;

    async fn space(&self) -> Result<Option<EmbeddingSpace>>;

    /// Delete every chunk of `source_id` and insert `chunks` in its place.
    ///
    /// Readers observe either the old set or the new set, never a mix.
    async fn replace_source(
        &self,
        source_id: &str,
        space: &EmbeddingSpace,
        chunks: &[StoredChunk],
    ) -> Result<()>;

    /// The `k` chunks closest to `query`, nearest first.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    async fn source_chunk_count(&self, source_id: &str) -> Result<usize>;
}

/// Fails with [`CoreError::EmbeddingMismatch`] when `provider` differs from `indexed`.
pub fn check_space(indexed: Option<&EmbeddingSpace>, provider: &EmbeddingSpace) -> Result<()> {
    match indexed {
        Some(existing) if existing != provider => Err(CoreError::EmbeddingMismatch {
            indexed: existing.to_string(),
            provider: provider.to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// Sort by distance ascending, then chunk id for a stable order, and keep `k`.
pub(crate) fn rank_neighbors(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    neighbors.truncate(k);
    neighbors
}
