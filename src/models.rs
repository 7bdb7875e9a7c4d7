//! Core data models used throughout the engine.
//!
//! These types represent the canonical documents produced by adapters, the
//! chunks written to a project's vector index, the persisted project
//! manifest, and the JSON result objects exposed on the CLI boundary.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// The kind of source a document was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Youtube,
    Web,
    Github,
    Gdoc,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Local,
        SourceType::Web,
        SourceType::Github,
        SourceType::Youtube,
        SourceType::Gdoc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Local => "local",
            SourceType::Youtube => "youtube",
            SourceType::Web => "web",
            SourceType::Github => "github",
            SourceType::Gdoc => "gdoc",
        }
    }

    /// Subdirectory under `sources/` holding this kind's artifacts.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SourceType::Gdoc => "gdocs",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "file" => Ok(SourceType::Local),
            "youtube" | "video" => Ok(SourceType::Youtube),
            "web" | "url" => Ok(SourceType::Web),
            "github" | "repo" => Ok(SourceType::Github),
            "gdoc" | "gdocs" => Ok(SourceType::Gdoc),
            other => Err(CoreError::InvalidLocator(format!(
                "unknown source type '{}'. Must be local, youtube, web, github, or gdoc",
                other
            ))),
        }
    }
}

/// Normalized document produced by a source adapter.
///
/// Construct through [`CanonicalDocument::new`], which enforces the
/// non-empty body invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDocument {
    pub source_type: SourceType,
    pub source_id: String,
    pub source_url: Option<String>,
    pub source_path: Option<String>,
    pub title: String,
    pub body: String,
    pub extracted_at: DateTime<Utc>,
    /// Kind-specific fields (`video_id`, `channel`, `branch`, ...).
    pub metadata: BTreeMap<String, String>,
}

impl CanonicalDocument {
    pub fn new(
        source_type: SourceType,
        source_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> CoreResult<Self> {
        let source_id = source_id.into();
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::EmptyContent(format!(
                "{} source '{}' produced no text",
                source_type, source_id
            )));
        }
        let title = title.into();
        let title = if title.trim().is_empty() {
            source_id.clone()
        } else {
            title
        };
        Ok(Self {
            source_type,
            source_id,
            source_url: None,
            source_path: None,
            title,
            body,
            extracted_at: Utc::now(),
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }

    /// Body length in characters.
    pub fn content_length(&self) -> usize {
        self.body.chars().count()
    }
}

/// A retrieval unit cut from a document body.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Aggregate counters kept in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub total_sources: usize,
    pub total_chunks: usize,
}

/// Manifest entry for one ingested source (metadata only, never the body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_type: SourceType,
    pub source_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub output_file: String,
    pub word_count: usize,
    pub content_length: usize,
    #[serde(default)]
    pub chunk_count: usize,
    pub extracted_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Persisted `manifest.json` of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project: String,
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub stats: ProjectStats,
}

/// Outcome of running an adapter over one locator.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub success: bool,
    pub source_type: SourceType,
    pub locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    pub content_length: usize,
    pub word_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl ExtractResult {
    pub fn failure(
        source_type: SourceType,
        locator: &str,
        err: &CoreError,
        warnings: Vec<String>,
    ) -> Self {
        // Attach the title when the failure carried one.
        let title = match err {
            CoreError::NoTranscript { title, .. } => title.clone(),
            _ => None,
        };
        Self {
            success: false,
            source_type,
            locator: locator.to_string(),
            source_id: None,
            title,
            source_url: None,
            source_path: None,
            output_file: None,
            content_length: 0,
            word_count: 0,
            warnings,
            metadata: BTreeMap::new(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        }
    }
}

/// A single ranked chunk returned by a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub rank: usize,
    pub chunk_id: String,
    pub content: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub source_url: Option<String>,
    pub source_title: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub distance: f64,
    pub relevance_score: f64,
}

/// Hits aggregated per source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub source_type: SourceType,
    pub source_title: String,
    pub source_url: Option<String>,
    pub hit_count: usize,
    pub max_relevance: f64,
}

/// Outcome of a query against one project.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub project: String,
    pub query: String,
    pub total_chunks_searched: usize,
    pub results: Vec<QueryHit>,
    pub sources_summary: Vec<SourceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl QueryResult {
    pub fn failure(project: &str, query: &str, err: &CoreError) -> Self {
        let suggestion = match err {
            CoreError::NoIndex(p) => Some(format!(
                "Run `pctx init {}` and ingest sources to build context first",
                p
            )),
            CoreError::EmptyIndex(p) => Some(format!(
                "Ingest sources with `pctx ingest {} <kind> <locator>` to build context first",
                p
            )),
            CoreError::EmbeddingMismatch { .. } => {
                Some("Re-create the project with the embedding model it was built with".to_string())
            }
            _ => None,
        };
        Self {
            success: false,
            project: project.to_string(),
            query: query.to_string(),
            total_chunks_searched: 0,
            results: Vec::new(),
            sources_summary: Vec::new(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            suggestion,
        }
    }
}

/// Outcome of ingesting (extract + index) one locator into a project.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub success: bool,
    pub project: String,
    pub extraction: ExtractResult,
    pub chunks_written: usize,
    pub total_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// RFC 3339 timestamp with second precision, as written to manifests and artifacts.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_rejected() {
        let err = CanonicalDocument::new(SourceType::Local, "abc", "t", "  \n\t ").unwrap_err();
        assert_eq!(err.kind(), "empty_content");
    }

    #[test]
    fn test_metrics() {
        let doc = CanonicalDocument::new(SourceType::Local, "abc", "notes.md", "Alpha Beta Gamma")
            .unwrap();
        assert_eq!(doc.word_count(), 3);
        assert_eq!(doc.content_length(), 16);
    }

    #[test]
    fn test_blank_title_defaults_to_source_id() {
        let doc = CanonicalDocument::new(SourceType::Web, "abc123", " ", "body").unwrap();
        assert_eq!(doc.title, "abc123");
    }

    #[test]
    fn test_source_type_parse_and_dirs() {
        assert_eq!("GDOC".parse::<SourceType>().unwrap(), SourceType::Gdoc);
        assert_eq!(SourceType::Gdoc.dir_name(), "gdocs");
        assert_eq!(SourceType::Youtube.dir_name(), "youtube");
        assert!("ftp".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_source_type_serde_lowercase() {
        let json = serde_json::to_string(&SourceType::Github).unwrap();
        assert_eq!(json, "\"github\"");
    }
}
