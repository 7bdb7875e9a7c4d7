//! Error taxonomy shared by adapters, the project store and the query engine.
//!
//! Internal plumbing propagates [`anyhow::Error`]; anything that crosses a
//! result boundary (an [`ExtractResult`](crate::models::ExtractResult), a
//! [`QueryResult`](crate::models::QueryResult), a CLI exit) is expressed as a
//! [`CoreError`] so callers get a stable, machine-readable `error_kind`.

use thiserror::Error;

/// Result alias for operations that fail with a [`CoreError`].
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The locator or file does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The source resolved but produced no usable text.
    #[error("empty content: {0}")]
    EmptyContent(String),

    /// The content type is recognized but cannot be converted to text.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The locator is malformed for the selected adapter.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// The video exists but has no captions to transcribe.
    #[error("no transcript available for video {video_id}{}", title.as_deref().map(|t| format!(" ({})", t)).unwrap_or_default())]
    NoTranscript {
        video_id: String,
        title: Option<String>,
    },

    /// A network fetch or subprocess failed or timed out.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("invalid project name '{0}': must be non-empty and contain no path separators")]
    InvalidProjectName(String),

    #[error("manifest for project '{project}' is corrupt: {reason}")]
    ManifestCorrupt { project: String, reason: String },

    #[error("no vector index for project '{0}'. Build context first: run `pctx init` and ingest sources")]
    NoIndex(String),

    #[error("vector index for project '{0}' is empty. Build context first by ingesting sources")]
    EmptyIndex(String),

    /// The embedding capability is missing or failed to load.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The index was built with a different embedding model or dimension.
    #[error("embedding space mismatch: index uses {indexed}, provider is {provider}. Rebuild the index to switch models")]
    EmbeddingMismatch { indexed: String, provider: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The config file is unreadable or fails validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Stable snake_case identifier, emitted as `error_kind` in JSON results.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::EmptyContent(_) => "empty_content",
            CoreError::UnsupportedFormat(_) => "unsupported_format",
            CoreError::InvalidLocator(_) => "invalid_locator",
            CoreError::NoTranscript { .. } => "no_transcript",
            CoreError::FetchFailed(_) => "fetch_failed",
            CoreError::ProjectNotFound(_) => "project_not_found",
            CoreError::InvalidProjectName(_) => "invalid_project_name",
            CoreError::ManifestCorrupt { .. } => "manifest_corrupt",
            CoreError::NoIndex(_) => "no_index",
            CoreError::EmptyIndex(_) => "empty_index",
            CoreError::EmbeddingUnavailable(_) => "embedding_unavailable",
            CoreError::EmbeddingMismatch { .. } => "embedding_mismatch",
            CoreError::InvalidQuery(_) => "invalid_query",
            CoreError::InvalidConfig(_) => "invalid_config",
            CoreError::Io(_) => "io",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Recovers a [`CoreError`] that was carried through an `anyhow` chain,
    /// falling back to [`CoreError::Internal`].
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<CoreError>() {
            Ok(core) => core,
            Err(other) => CoreError::Internal(other),
        }
    }
}
