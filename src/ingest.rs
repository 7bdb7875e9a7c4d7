//! Ingestion pipeline: artifact → chunks → embeddings → index.
//!
//! [`Indexer::index_artifact`] reads a persisted artifact back from disk,
//! upserts its manifest record, then replaces the source's chunks in the
//! project index. The manifest record is written before any chunk so every
//! indexed chunk references a source the manifest knows about.
//!
//! Replacement of one source's chunks runs under a per-`source_id` async
//! mutex ([`SourceLocks`]) on top of the index's own transaction, so two
//! concurrent ingestions of the same source cannot interleave.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::OwnedMutexGuard;

use crate::artifact;
use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_batched, EmbeddingProvider};
use crate::error::{CoreError, CoreResult};
use crate::index::{StoredChunk, VectorIndex};
use crate::models::{format_timestamp, CanonicalDocument, SourceRecord};
use crate::project::ProjectStore;

/// Per-`source_id` mutual exclusion.
#[derive(Default)]
pub struct SourceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, source_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self
                .locks
                .lock()
                .map_err(|_| anyhow!("source lock table poisoned"))?;
            map.entry(source_id.to_string()).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }
}

/// Outcome of indexing one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOutcome {
    pub source_id: String,
    pub chunks_written: usize,
    /// Live chunk count of the whole index after the write.
    pub total_chunks: usize,
}

/// Everything needed to index documents into one project.
pub struct Indexer<'a> {
    pub store: &'a ProjectStore,
    pub provider: &'a dyn EmbeddingProvider,
    pub locks: &'a SourceLocks,
    pub chunking: &'a ChunkingConfig,
    pub batch_size: usize,
}

impl Indexer<'_> {
    /// Index the artifact at `path` into `project`.
    pub async fn index_artifact(
        &self,
        project: &str,
        index: &dyn VectorIndex,
        path: &Path,
    ) -> CoreResult<IndexOutcome> {
        let doc = artifact::read(path).map_err(|e| match e.downcast::<CoreError>() {
            Ok(core) => core,
            Err(e) if path.exists() => CoreError::Internal(e),
            Err(_) => CoreError::NotFound(format!("artifact not found: {}", path.display())),
        })?;

        let record = self.source_record(project, &doc, path)?;
        let previous = self.store.record_source(project, record).await?;

        let chunks_written = match self.index_document(index, &doc).await {
            Ok(n) => n,
            Err(e) => {
                // The index still holds the previous chunk set, if any.
                if let Err(restore) = self
                    .store
                    .restore_source(project, &doc.source_id, previous)
                    .await
                {
                    tracing::warn!(project, source_id = %doc.source_id, error = %restore, "failed to restore manifest record");
                }
                return Err(CoreError::from_anyhow(e));
            }
        };
        let total_chunks = index.count().await.map_err(CoreError::from_anyhow)?;
        self.store
            .refresh_stats(project, &doc.source_id, chunks_written, total_chunks)
            .await?;

        tracing::info!(
            project,
            source_id = %doc.source_id,
            chunks = chunks_written,
            total_chunks,
            "indexed source"
        );
        Ok(IndexOutcome {
            source_id: doc.source_id,
            chunks_written,
            total_chunks,
        })
    }

    /// Chunk, embed and write `doc`, replacing any earlier chunks of the source.
    ///
    /// Returns the number of chunks written.
    pub async fn index_document(
        &self,
        index: &dyn VectorIndex,
        doc: &CanonicalDocument,
    ) -> Result<usize> {
        let chunks = chunk_text(
            &doc.source_id,
            &doc.body,
            self.chunking.max_tokens,
            self.chunking.overlap_tokens,
        );
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.provider, &texts, self.batch_size).await?;
        tracing::debug!(source_id = %doc.source_id, chunks = chunks.len(), "embedded chunks");

        let stored: Vec<StoredChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| StoredChunk {
                chunk,
                source_type: doc.source_type,
                source_url: doc.source_url.clone(),
                source_title: doc.title.clone(),
                embedding,
            })
            .collect();

        let _guard = self.locks.lock(&doc.source_id).await?;
        index
            .replace_source(&doc.source_id, &self.provider.space(), &stored)
            .await?;
        Ok(stored.len())
    }

    fn source_record(
        &self,
        project: &str,
        doc: &CanonicalDocument,
        path: &Path,
    ) -> CoreResult<SourceRecord> {
        let project_dir = self.store.project_dir(project)?;
        let output_file = path
            .strip_prefix(&project_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        Ok(SourceRecord {
            source_type: doc.source_type,
            source_id: doc.source_id.clone(),
            title: doc.title.clone(),
            source_url: doc.source_url.clone(),
            source_path: doc.source_path.clone(),
            output_file,
            word_count: doc.word_count(),
            content_length: doc.content_length(),
            chunk_count: 0,
            extracted_at: format_timestamp(&doc.extracted_at),
            indexed_at: None,
            metadata: doc.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use crate::index::memory::InMemoryVectorIndex;
    use crate::models::SourceType;

    fn doc(id: &str, body: &str) -> CanonicalDocument {
        CanonicalDocument::new(SourceType::Local, id, "notes.md", body).unwrap()
    }

    #[tokio::test]
    async fn test_index_document_replaces_previous_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let provider = HashProvider::new(64);
        let locks = SourceLocks::new();
        let chunking = ChunkingConfig {
            max_tokens: 5,
            overlap_tokens: 1,
        };
        let indexer = Indexer {
            store: &store,
            provider: &provider,
            locks: &locks,
            chunking: &chunking,
            batch_size: 2,
        };
        let index = InMemoryVectorIndex::new();

        let long = "alpha beta gamma delta epsilon zeta eta theta iota kappa".repeat(3);
        let first = indexer.index_document(&index, &doc("s1", &long)).await.unwrap();
        assert!(first > 1);
        indexer.index_document(&index, &doc("s2", "other text")).await.unwrap();

        let second = indexer.index_document(&index, &doc("s1", "short now")).await.unwrap();
        assert_eq!(second, 1);
        assert_eq!(index.source_chunk_count("s1").await.unwrap(), 1);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_index_artifact_records_manifest_before_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        store.init("demo").await.unwrap();
        let provider = HashProvider::new(64);
        let locks = SourceLocks::new();
        let chunking = ChunkingConfig::default();
        let indexer = Indexer {
            store: &store,
            provider: &provider,
            locks: &locks,
            chunking: &chunking,
            batch_size: 8,
        };
        let index = InMemoryVectorIndex::new();

        let sources = store.sources_dir("demo", SourceType::Local).unwrap();
        let path = artifact::write(&doc("abc", "Alpha Beta Gamma"), &sources).unwrap();
        let outcome = indexer.index_artifact("demo", &index, &path).await.unwrap();
        assert_eq!(outcome.chunks_written, 1);
        assert_eq!(outcome.total_chunks, 1);

        let manifest = store.read_manifest("demo").unwrap();
        assert_eq!(manifest.sources.len(), 1);
        let record = &manifest.sources[0];
        assert_eq!(record.source_id, "abc");
        assert_eq!(record.output_file, "sources/local/abc.md");
        assert_eq!(record.word_count, 3);
        assert_eq!(record.chunk_count, 1);
        assert_eq!(manifest.stats.total_chunks, 1);
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(anyhow!("embedding backend offline"))
        }
    }

    #[tokio::test]
    async fn test_failed_index_leaves_manifest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        store.init("demo").await.unwrap();
        let locks = SourceLocks::new();
        let chunking = ChunkingConfig::default();
        let index = InMemoryVectorIndex::new();
        let sources = store.sources_dir("demo", SourceType::Local).unwrap();

        let failing = Indexer {
            store: &store,
            provider: &FailingProvider,
            locks: &locks,
            chunking: &chunking,
            batch_size: 8,
        };
        let path = artifact::write(&doc("abc", "Alpha Beta Gamma"), &sources).unwrap();
        assert!(failing.index_artifact("demo", &index, &path).await.is_err());
        let manifest = store.read_manifest("demo").unwrap();
        assert!(manifest.sources.is_empty());
        assert_eq!(manifest.stats.total_sources, 0);

        // A failed re-ingest keeps the record of the indexed content.
        let provider = HashProvider::new(8);
        let working = Indexer {
            provider: &provider,
            ..failing
        };
        working.index_artifact("demo", &index, &path).await.unwrap();
        let path = artifact::write(&doc("abc", "Delta Epsilon Zeta Eta Theta"), &sources).unwrap();
        let failing = Indexer {
            provider: &FailingProvider,
            ..working
        };
        assert!(failing.index_artifact("demo", &index, &path).await.is_err());

        let manifest = store.read_manifest("demo").unwrap();
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].word_count, 3);
        assert_eq!(manifest.sources[0].chunk_count, 1);
        assert_eq!(index.source_chunk_count("abc").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        store.init("demo").await.unwrap();
        let provider = HashProvider::new(8);
        let locks = SourceLocks::new();
        let chunking = ChunkingConfig::default();
        let indexer = Indexer {
            store: &store,
            provider: &provider,
            locks: &locks,
            chunking: &chunking,
            batch_size: 8,
        };
        let err = indexer
            .index_artifact("demo", &InMemoryVectorIndex::new(), &dir.path().join("nope.md"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(store.read_manifest("demo").unwrap().sources.is_empty());
    }

    #[tokio::test]
    async fn test_source_locks_serialize_same_id() {
        let locks = SourceLocks::new();
        let guard = locks.lock("a").await.unwrap();
        // A different id is independent.
        let _other = locks.lock("b").await.unwrap();
        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), locks.lock("a")).await;
        assert!(pending.is_err());
        drop(guard);
        assert!(locks.lock("a").await.is_ok());
    }
}
