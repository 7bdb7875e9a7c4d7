//! Project store.
//!
//! A project is a directory under the workspace root:
//!
//! ```text
//! <root>/<project>/
//!   manifest.json
//!   sources/{local,web,github,youtube,gdocs}/<source_id>.md
//!   vectordb/index.sqlite
//! ```
//!
//! The manifest records project metadata and one [`SourceRecord`] per
//! ingested source. Writes go through [`ProjectStore`], which serializes
//! read-modify-write cycles with an in-process mutex and replaces the file
//! atomically.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{CoreError, CoreResult};
use crate::index::sqlite::SqliteVectorIndex;
use crate::index::VectorIndex;
use crate::models::{format_timestamp, ProjectManifest, ProjectStats, SourceRecord, SourceType};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SOURCES_DIR: &str = "sources";
pub const VECTORDB_DIR: &str = "vectordb";

/// Result of [`ProjectStore::init`].
#[derive(Debug, Clone, Serialize)]
pub struct ProjectInit {
    pub success: bool,
    pub project: String,
    pub path: String,
    /// False when the project already existed.
    pub created: bool,
    pub created_at: String,
    pub updated: String,
    pub stats: ProjectStats,
}

/// One entry of [`ProjectStore::list_projects`].
#[derive(Debug, Clone, Serialize)]
pub struct ProjectListing {
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    pub total_sources: usize,
    pub total_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A project's manifest with sources grouped by kind.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project: String,
    pub created: String,
    pub updated: String,
    pub stats: ProjectStats,
    pub sources_by_type: BTreeMap<SourceType, Vec<SourceRecord>>,
}

/// Check a project name: non-empty, no path separators, not `.` or `..`.
pub fn validate_name(name: &str) -> CoreResult<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(CoreError::InvalidProjectName(name.to_string()));
    }
    Ok(())
}

pub struct ProjectStore {
    root: PathBuf,
    manifest_lock: Mutex<()>,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, name: &str) -> CoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub fn sources_dir(&self, name: &str, kind: SourceType) -> CoreResult<PathBuf> {
        Ok(self.project_dir(name)?.join(SOURCES_DIR).join(kind.dir_name()))
    }

    pub fn vectordb_dir(&self, name: &str) -> CoreResult<PathBuf> {
        Ok(self.project_dir(name)?.join(VECTORDB_DIR))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.project_dir(name).map(|d| d.is_dir()).unwrap_or(false)
    }

    /// Create a project, or refresh an existing one.
    ///
    /// Idempotent: missing directories and the manifest are created, an
    /// existing manifest keeps its sources and only gets a new `updated`
    /// timestamp and a live `total_chunks`.
    pub async fn init(&self, name: &str) -> CoreResult<ProjectInit> {
        let dir = self.project_dir(name)?;
        for kind in SourceType::ALL {
            std::fs::create_dir_all(dir.join(SOURCES_DIR).join(kind.dir_name()))?;
        }
        let vectordb = dir.join(VECTORDB_DIR);
        std::fs::create_dir_all(&vectordb)?;

        let index = SqliteVectorIndex::create(&vectordb)
            .await
            .map_err(CoreError::from_anyhow)?;
        let live = index.count().await.map_err(CoreError::from_anyhow);
        index.close().await;
        let live = live?;

        let _guard = self.manifest_lock.lock().await;
        let manifest_path = dir.join(MANIFEST_FILE);
        let created = !manifest_path.exists();
        let now = format_timestamp(&Utc::now());
        let mut manifest = if created {
            ProjectManifest {
                project: name.to_string(),
                created: now.clone(),
                updated: now.clone(),
                sources: Vec::new(),
                stats: ProjectStats::default(),
            }
        } else {
            self.load(name)?
        };
        manifest.updated = now;
        manifest.stats.total_sources = manifest.sources.len();
        manifest.stats.total_chunks = live;
        self.store(name, &manifest)?;

        tracing::info!(project = name, created, "initialized project at {}", dir.display());
        Ok(ProjectInit {
            success: true,
            project: name.to_string(),
            path: dir.display().to_string(),
            created,
            created_at: manifest.created,
            updated: manifest.updated,
            stats: manifest.stats,
        })
    }

    pub fn read_manifest(&self, name: &str) -> CoreResult<ProjectManifest> {
        let dir = self.project_dir(name)?;
        if !dir.is_dir() {
            return Err(CoreError::ProjectNotFound(name.to_string()));
        }
        self.load(name)
    }

    /// Every project under the root, most recently updated first.
    ///
    /// Projects whose manifest cannot be read are still listed, with
    /// `error` set, after all readable ones.
    pub fn list_projects(&self) -> CoreResult<Vec<ProjectListing>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut listings = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_name(&name).is_err() {
                continue;
            }
            let path = entry.path().display().to_string();
            let listing = match self.load(&name) {
                Ok(m) => ProjectListing {
                    name,
                    path,
                    created: Some(m.created),
                    updated: Some(m.updated),
                    total_sources: m.sources.len(),
                    total_chunks: m.stats.total_chunks,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(project = %name, error = %e, "unreadable project manifest");
                    ProjectListing {
                        name,
                        path,
                        created: None,
                        updated: None,
                        total_sources: 0,
                        total_chunks: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            listings.push(listing);
        }

        listings.sort_by(|a, b| {
            a.error
                .is_some()
                .cmp(&b.error.is_some())
                .then_with(|| b.updated.cmp(&a.updated))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(listings)
    }

    pub fn project_summary(&self, name: &str) -> CoreResult<ProjectSummary> {
        let manifest = self.read_manifest(name)?;
        let mut sources_by_type: BTreeMap<SourceType, Vec<SourceRecord>> = BTreeMap::new();
        for record in manifest.sources {
            sources_by_type
                .entry(record.source_type)
                .or_default()
                .push(record);
        }
        Ok(ProjectSummary {
            project: manifest.project,
            created: manifest.created,
            updated: manifest.updated,
            stats: manifest.stats,
            sources_by_type,
        })
    }

    /// Insert or replace the record for `record.source_id`.
    ///
    /// A re-ingested source keeps its position in the manifest and its
    /// previous `chunk_count`/`indexed_at` until [`refresh_stats`](Self::refresh_stats).
    /// Returns the record it replaced so a failed index write can be undone
    /// with [`ProjectStore::restore_source`].
    pub async fn record_source(
        &self,
        name: &str,
        record: SourceRecord,
    ) -> CoreResult<Option<SourceRecord>> {
        self.read_manifest(name)?;
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.load(name)?;
        let previous = match manifest
            .sources
            .iter_mut()
            .find(|s| s.source_id == record.source_id)
        {
            Some(existing) => {
                let previous = existing.clone();
                // Index state stays until `refresh_stats` reports the new write.
                *existing = SourceRecord {
                    chunk_count: previous.chunk_count,
                    indexed_at: previous.indexed_at.clone(),
                    ..record
                };
                Some(previous)
            }
            None => {
                manifest.sources.push(record);
                None
            }
        };
        manifest.stats.total_sources = manifest.sources.len();
        manifest.updated = format_timestamp(&Utc::now());
        self.store(name, &manifest)?;
        Ok(previous)
    }

    /// Put back `previous` for `source_id`, or drop the record when there was none.
    pub async fn restore_source(
        &self,
        name: &str,
        source_id: &str,
        previous: Option<SourceRecord>,
    ) -> CoreResult<()> {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.load(name)?;
        match previous {
            Some(previous) => {
                if let Some(existing) = manifest
                    .sources
                    .iter_mut()
                    .find(|s| s.source_id == source_id)
                {
                    *existing = previous;
                }
            }
            None => manifest.sources.retain(|s| s.source_id != source_id),
        }
        manifest.stats.total_sources = manifest.sources.len();
        self.store(name, &manifest)
    }

    /// Record the outcome of indexing one source and the live index size.
    pub async fn refresh_stats(
        &self,
        name: &str,
        source_id: &str,
        chunk_count: usize,
        total_chunks: usize,
    ) -> CoreResult<()> {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.load(name)?;
        let now = format_timestamp(&Utc::now());
        if let Some(record) = manifest
            .sources
            .iter_mut()
            .find(|s| s.source_id == source_id)
        {
            record.chunk_count = chunk_count;
            record.indexed_at = Some(now.clone());
        }
        manifest.stats.total_sources = manifest.sources.len();
        manifest.stats.total_chunks = total_chunks;
        manifest.updated = now;
        self.store(name, &manifest)
    }

    /// Overwrite `stats.total_chunks` with the live index count.
    pub async fn sync_total_chunks(&self, name: &str, total_chunks: usize) -> CoreResult<()> {
        let _guard = self.manifest_lock.lock().await;
        let mut manifest = self.load(name)?;
        if manifest.stats.total_chunks == total_chunks {
            return Ok(());
        }
        manifest.stats.total_chunks = total_chunks;
        self.store(name, &manifest)
    }

    fn load(&self, name: &str) -> CoreResult<ProjectManifest> {
        let path = self.root.join(name).join(MANIFEST_FILE);
        let corrupt = |reason: String| CoreError::ManifestCorrupt {
            project: name.to_string(),
            reason,
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(corrupt(format!("{} is missing", MANIFEST_FILE)))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))
    }

    fn store(&self, name: &str, manifest: &ProjectManifest) -> CoreResult<()> {
        let dir = self.root.join(name);
        let target = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(manifest)
            .context("Failed to serialize manifest")
            .map_err(CoreError::Internal)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&target).map_err(|e| {
            CoreError::Internal(anyhow!("Failed to write {}: {}", target.display(), e))
        })?;
        Ok(())
    }
}
