//! In-memory [`VectorIndex`] for tests.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`; search is brute-force
//! cosine distance over every stored vector.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_distance, EmbeddingSpace};

use super::{check_space, rank_neighbors, Neighbor, StoredChunk, VectorIndex};

#[derive(Default)]
struct Inner {
    space: Option<EmbeddingSpace>,
    chunks: Vec<StoredChunk>,
}

#[derive(Default)]
pub struct InMemoryVectorIndex {
    inner: RwLock<Inner>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().map_err(poisoned)?.chunks.len())
    }

    async fn space(&self) -> Result<Option<EmbeddingSpace>> {
        Ok(self.inner.read().map_err(poisoned)?.space.clone())
    }

    async fn replace_source(
        &self,
        source_id: &str,
        space: &EmbeddingSpace,
        chunks: &[StoredChunk],
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        check_space(inner.space.as_ref(), space)?;
        if inner.space.is_none() {
            inner.space = Some(space.clone());
        }
        inner.chunks.retain(|c| c.chunk.source_id != source_id);
        inner.chunks.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let neighbors = inner
            .chunks
            .iter()
            .map(|sc| Neighbor {
                chunk_id: sc.chunk.chunk_id.clone(),
                source_id: sc.chunk.source_id.clone(),
                source_type: sc.source_type,
                source_url: sc.source_url.clone(),
                source_title: sc.source_title.clone(),
                chunk_index: sc.chunk.chunk_index,
                total_chunks: sc.chunk.total_chunks,
                text: sc.chunk.text.clone(),
                distance: cosine_distance(query, &sc.embedding),
            })
            .collect();
        Ok(rank_neighbors(neighbors, k))
    }

    async fn source_chunk_count(&self, source_id: &str) -> Result<usize> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .chunks
            .iter()
            .filter(|c| c.chunk.source_id == source_id)
            .count())
    }
}
