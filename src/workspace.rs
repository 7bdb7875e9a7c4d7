//! Process-wide handles.
//!
//! A [`Workspace`] owns everything that should exist once per process: the
//! loaded [`Config`], the [`ProjectStore`], the embedding provider (created
//! on first use and then shared) and one open [`SqliteVectorIndex`] per
//! project. The CLI builds a single `Arc<Workspace>` and every operation goes
//! through it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinSet;

use crate::adapters::{self, SourceAdapter};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{CoreError, CoreResult};
use crate::index::sqlite::SqliteVectorIndex;
use crate::index::VectorIndex;
use crate::ingest::{IndexOutcome, Indexer, SourceLocks};
use crate::models::{ExtractResult, IngestResult, QueryResult, SourceType};
use crate::project::{ProjectInit, ProjectListing, ProjectStore, ProjectSummary};
use crate::query;

/// Output of [`Workspace::projects`].
#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum ProjectsView {
    List { projects: Vec<ProjectListing> },
    One(ProjectSummary),
}

pub struct Workspace {
    config: Config,
    store: ProjectStore,
    provider: OnceCell<Arc<dyn EmbeddingProvider>>,
    indexes: Mutex<HashMap<String, Arc<SqliteVectorIndex>>>,
    locks: SourceLocks,
}

impl Workspace {
    pub fn new(config: Config) -> Self {
        let store = ProjectStore::new(config.workspace.root.clone());
        Self {
            config,
            store,
            provider: OnceCell::new(),
            indexes: Mutex::new(HashMap::new()),
            locks: SourceLocks::new(),
        }
    }

    /// Use an already constructed provider instead of the configured one.
    pub fn with_provider(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let ws = Self::new(config);
        // A fresh cell cannot already be set.
        let _ = ws.provider.set(provider);
        ws
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    async fn provider(&self) -> CoreResult<Arc<dyn EmbeddingProvider>> {
        self.provider
            .get_or_try_init(|| async {
                let provider = create_provider(&self.config.embedding)?;
                tracing::info!(space = %provider.space(), "embedding provider ready");
                Ok::<_, CoreError>(provider)
            })
            .await
            .cloned()
    }

    /// The cached index handle for `project`, opening it on first use.
    async fn index(&self, project: &str) -> CoreResult<Arc<SqliteVectorIndex>> {
        let mut indexes = self.indexes.lock().await;
        if let Some(index) = indexes.get(project) {
            return Ok(index.clone());
        }
        let dir = self.store.vectordb_dir(project)?;
        if !SqliteVectorIndex::exists(&dir) {
            return Err(CoreError::NoIndex(project.to_string()));
        }
        let index = Arc::new(
            SqliteVectorIndex::open(&dir)
                .await
                .map_err(CoreError::from_anyhow)?,
        );
        indexes.insert(project.to_string(), index.clone());
        Ok(index)
    }

    /// Create (or refresh) a project.
    pub async fn init(&self, project: &str) -> CoreResult<ProjectInit> {
        self.store.init(project).await
    }

    async fn ensure_project(&self, project: &str) -> CoreResult<()> {
        let dir = self.store.vectordb_dir(project)?;
        if !SqliteVectorIndex::exists(&dir) {
            self.store.init(project).await?;
        }
        Ok(())
    }

    fn adapter(&self, kind: SourceType) -> CoreResult<Arc<dyn SourceAdapter>> {
        Ok(Arc::from(adapters::create_adapter(kind, &self.config.adapters)?))
    }

    /// Extract one source into `output_dir` without indexing it.
    pub async fn extract(&self, kind: SourceType, locator: &str, output_dir: &Path) -> ExtractResult {
        match self.adapter(kind) {
            Ok(adapter) => adapters::extract(adapter.as_ref(), locator, output_dir).await,
            Err(e) => ExtractResult::failure(kind, locator, &e, Vec::new()),
        }
    }

    /// Index an artifact that already exists on disk.
    pub async fn index_artifact(&self, project: &str, path: &Path) -> CoreResult<IndexOutcome> {
        self.ensure_project(project).await?;
        let provider = self.provider().await?;
        let index = self.index(project).await?;
        self.indexer(provider.as_ref())
            .index_artifact(project, index.as_ref(), path)
            .await
    }

    fn indexer<'a>(&'a self, provider: &'a dyn EmbeddingProvider) -> Indexer<'a> {
        Indexer {
            store: &self.store,
            provider,
            locks: &self.locks,
            chunking: &self.config.chunking,
            batch_size: self.config.embedding.batch_size,
        }
    }

    /// Extract and index every locator into `project`.
    ///
    /// Locators run concurrently; results come back in input order and a
    /// failure of one never affects the others.
    pub async fn ingest(
        self: &Arc<Self>,
        project: &str,
        kind: SourceType,
        locators: &[String],
    ) -> Vec<IngestResult> {
        let setup = async {
            self.ensure_project(project).await?;
            let adapter = self.adapter(kind)?;
            let output_dir = self.store.sources_dir(project, kind)?;
            CoreResult::Ok((adapter, output_dir))
        };
        let (adapter, output_dir) = match setup.await {
            Ok(s) => s,
            Err(e) => {
                return locators
                    .iter()
                    .map(|l| {
                        ingest_failure(project, ExtractResult::failure(kind, l, &e, Vec::new()), &e)
                    })
                    .collect()
            }
        };

        let mut tasks = JoinSet::new();
        for (slot, locator) in locators.iter().enumerate() {
            let ws = Arc::clone(self);
            let adapter = Arc::clone(&adapter);
            let project = project.to_string();
            let locator = locator.clone();
            let output_dir = output_dir.clone();
            tasks.spawn(async move {
                let result = ws
                    .ingest_one(&project, adapter.as_ref(), &locator, &output_dir)
                    .await;
                (slot, result)
            });
        }

        let mut results: Vec<Option<IngestResult>> = locators.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => tracing::error!(error = %e, "ingest task failed"),
            }
        }
        // Concurrent tasks may have recorded their counts out of order.
        if let Err(e) = self.sync_total_chunks(project).await {
            tracing::warn!(project, error = %e, "failed to refresh chunk total");
        }

        results
            .into_iter()
            .zip(locators)
            .map(|(result, locator)| {
                result.unwrap_or_else(|| {
                    let err = CoreError::Internal(anyhow::anyhow!("ingest task aborted"));
                    ingest_failure(project, ExtractResult::failure(kind, locator, &err, Vec::new()), &err)
                })
            })
            .collect()
    }

    async fn ingest_one(
        &self,
        project: &str,
        adapter: &dyn SourceAdapter,
        locator: &str,
        output_dir: &Path,
    ) -> IngestResult {
        let extraction = adapters::extract(adapter, locator, output_dir).await;
        let Some(output_file) = extraction.output_file.clone().filter(|_| extraction.success) else {
            return IngestResult {
                success: false,
                project: project.to_string(),
                error: extraction.error.clone(),
                error_kind: extraction.error_kind.clone(),
                extraction,
                chunks_written: 0,
                total_chunks: 0,
            };
        };

        match self.index_artifact(project, &PathBuf::from(output_file)).await {
            Ok(outcome) => IngestResult {
                success: true,
                project: project.to_string(),
                extraction,
                chunks_written: outcome.chunks_written,
                total_chunks: outcome.total_chunks,
                error: None,
                error_kind: None,
            },
            Err(e) => {
                tracing::warn!(project, locator, error = %e, "indexing failed");
                ingest_failure(project, extraction, &e)
            }
        }
    }

    async fn sync_total_chunks(&self, project: &str) -> CoreResult<()> {
        let index = self.index(project).await?;
        let total = index.count().await.map_err(CoreError::from_anyhow)?;
        self.store.sync_total_chunks(project, total).await
    }

    /// Answer `question` from `project`'s index.
    ///
    /// Never fails: errors are reported inside the [`QueryResult`].
    pub async fn query(&self, project: &str, question: &str, top_k: Option<usize>) -> QueryResult {
        let top_k = top_k.unwrap_or(self.config.retrieval.default_top_k);
        match self.try_query(project, question, top_k).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(project, error = %e, "query failed");
                QueryResult::failure(project, question, &e)
            }
        }
    }

    async fn try_query(&self, project: &str, question: &str, top_k: usize) -> CoreResult<QueryResult> {
        if !self.store.exists(project) {
            return Err(CoreError::NoIndex(project.to_string()));
        }
        let index = self.index(project).await?;
        if question.trim().is_empty() {
            return Err(CoreError::InvalidQuery("question is empty".to_string()));
        }
        let provider = self.provider().await?;
        query::search(index.as_ref(), provider.as_ref(), project, question, top_k).await
    }

    /// List every project, or summarize one.
    pub fn projects(&self, name: Option<&str>) -> CoreResult<ProjectsView> {
        match name {
            Some(name) => Ok(ProjectsView::One(self.store.project_summary(name)?)),
            None => Ok(ProjectsView::List {
                projects: self.store.list_projects()?,
            }),
        }
    }

    /// Close every open index pool.
    pub async fn shutdown(&self) {
        let indexes = std::mem::take(&mut *self.indexes.lock().await);
        for index in indexes.values() {
            index.close().await;
        }
    }
}

fn ingest_failure(project: &str, extraction: ExtractResult, err: &CoreError) -> IngestResult {
    IngestResult {
        success: false,
        project: project.to_string(),
        extraction,
        chunks_written: 0,
        total_chunks: 0,
        error: Some(err.to_string()),
        error_kind: Some(err.kind().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;

    fn workspace(root: &Path) -> Arc<Workspace> {
        let mut config = Config::default();
        config.workspace.root = root.to_path_buf();
        Arc::new(Workspace::with_provider(config, Arc::new(HashProvider::new(128))))
    }

    #[tokio::test]
    async fn test_ingest_then_query_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir.path().join("projects"));
        let notes = dir.path().join("notes.md");
        std::fs::write(&notes, "Alpha Beta Gamma").unwrap();
        let missing = dir.path().join("missing.md");

        let locators = vec![
            notes.display().to_string(),
            missing.display().to_string(),
        ];
        let results = ws.ingest("demo", SourceType::Local, &locators).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[0].extraction.word_count, 3);
        assert_eq!(results[0].chunks_written, 1);
        assert!(!results[1].success);
        assert_eq!(results[1].error_kind.as_deref(), Some("not_found"));

        let source_id = results[0].extraction.source_id.clone().unwrap();
        let answer = ws.query("demo", "What is Alpha?", None).await;
        assert!(answer.success, "{:?}", answer.error);
        assert_eq!(answer.results[0].source_id, source_id);
        assert!(answer.results[0].relevance_score > 0.0);

        let manifest = ws.store().read_manifest("demo").unwrap();
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.stats.total_chunks, 1);
        ws.shutdown().await;
    }

    #[tokio::test]
    async fn test_reingest_replaces_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir.path().join("projects"));
        let notes = dir.path().join("notes.md");
        let locators = vec![notes.display().to_string()];

        std::fs::write(&notes, "zebra migration patterns").unwrap();
        let first = ws.ingest("demo", SourceType::Local, &locators).await;
        std::fs::write(&notes, "volcanic island geology").unwrap();
        let second = ws.ingest("demo", SourceType::Local, &locators).await;
        assert_eq!(first[0].extraction.source_id, second[0].extraction.source_id);

        let answer = ws.query("demo", "zebra migration", Some(10)).await;
        assert!(answer.success);
        assert_eq!(answer.total_chunks_searched, 1);
        assert!(answer.results.iter().all(|h| !h.content.contains("zebra")));
        assert_eq!(ws.store().read_manifest("demo").unwrap().sources.len(), 1);
        ws.shutdown().await;
    }

    #[tokio::test]
    async fn test_query_reports_missing_and_empty_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());

        let answer = ws.query("ghost", "anything", None).await;
        assert!(!answer.success);
        assert_eq!(answer.error_kind.as_deref(), Some("no_index"));
        assert!(answer.suggestion.is_some());

        ws.init("empty").await.unwrap();
        let answer = ws.query("empty", "anything", None).await;
        assert_eq!(answer.error_kind.as_deref(), Some("empty_index"));
        ws.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_project_name_fails_every_locator() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(dir.path());
        let results = ws
            .ingest("../escape", SourceType::Local, &["a.md".to_string(), "b.md".to_string()])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.error_kind.as_deref() == Some("invalid_project_name")));
    }

    #[test]
    fn test_projects_view() {
        let dir = tempfile::tempdir().unwrap();
        let ws = workspace(&dir.path().join("none"));
        match ws.projects(None).unwrap() {
            ProjectsView::List { projects } => assert!(projects.is_empty()),
            ProjectsView::One(_) => panic!("expected a listing"),
        }
        let err = ws.projects(Some("ghost")).unwrap_err();
        assert_eq!(err.kind(), "project_not_found");
    }
}
