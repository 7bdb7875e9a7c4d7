//! Source adapters.
//!
//! Each adapter turns one locator (a path, URL or id) into a
//! [`CanonicalDocument`]. The shared [`extract`] driver runs an adapter,
//! persists the resulting artifact and folds every failure into an
//! [`ExtractResult`], so callers never see an error escape.
//!
//! | Kind | Adapter | Locator |
//! |------|---------|---------|
//! | `local` | [`local::LocalAdapter`] | file path |
//! | `youtube` | [`youtube::YoutubeAdapter`] | video URL or 11-char id |
//! | `web` | [`web::WebAdapter`] | `http(s)` URL |
//! | `github` | [`github::GithubAdapter`] | repo URL or `owner/repo` |
//! | `gdoc` | [`gdoc::GdocAdapter`] | document URL or id |

pub mod gdoc;
pub mod github;
pub mod local;
pub mod web;
pub mod youtube;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::artifact;
use crate::config::AdaptersConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{format_timestamp, CanonicalDocument, ExtractResult, SourceType};

/// A fetched document plus any soft warnings raised while producing it.
#[derive(Debug)]
pub struct Fetched {
    pub doc: CanonicalDocument,
    pub warnings: Vec<String>,
}

impl From<CanonicalDocument> for Fetched {
    fn from(doc: CanonicalDocument) -> Self {
        Self {
            doc,
            warnings: Vec::new(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn fetch(&self, locator: &str) -> CoreResult<Fetched>;
}

/// Build the adapter for `kind`.
pub fn create_adapter(
    kind: SourceType,
    config: &AdaptersConfig,
) -> CoreResult<Box<dyn SourceAdapter>> {
    Ok(match kind {
        SourceType::Local => Box::new(local::LocalAdapter::new()),
        SourceType::Youtube => Box::new(youtube::YoutubeAdapter::new(config)),
        SourceType::Web => Box::new(web::WebAdapter::new(config)?),
        SourceType::Github => Box::new(github::GithubAdapter::new(config)?),
        SourceType::Gdoc => Box::new(gdoc::GdocAdapter::new(config)?),
    })
}

/// Run `adapter` over `locator` and write the artifact into `output_dir`.
///
/// On success the artifact exists at `output_file`; on failure nothing is
/// written and the result carries `error` and `error_kind`.
pub async fn extract(
    adapter: &dyn SourceAdapter,
    locator: &str,
    output_dir: &Path,
) -> ExtractResult {
    let kind = adapter.source_type();
    let fetched = match adapter.fetch(locator).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(kind = %kind, locator, error = %e, "extraction failed");
            return ExtractResult::failure(kind, locator, &e, Vec::new());
        }
    };
    for w in &fetched.warnings {
        tracing::warn!(kind = %kind, locator, "{}", w);
    }

    let doc = fetched.doc;
    let path = match artifact::write(&doc, output_dir) {
        Ok(p) => p,
        Err(e) => {
            let err = CoreError::from_anyhow(e);
            tracing::warn!(kind = %kind, locator, error = %err, "failed to persist artifact");
            return ExtractResult::failure(kind, locator, &err, fetched.warnings);
        }
    };
    tracing::info!(
        kind = %kind,
        source_id = %doc.source_id,
        words = doc.word_count(),
        "extracted {}",
        path.display()
    );

    let mut metadata = doc.metadata.clone();
    metadata.insert("extracted_at".to_string(), format_timestamp(&doc.extracted_at));
    ExtractResult {
        success: true,
        source_type: kind,
        locator: locator.to_string(),
        source_id: Some(doc.source_id.clone()),
        title: Some(doc.title.clone()),
        source_url: doc.source_url.clone(),
        source_path: doc.source_path.clone(),
        output_file: Some(path.display().to_string()),
        content_length: doc.content_length(),
        word_count: doc.word_count(),
        warnings: fetched.warnings,
        metadata,
        error: None,
        error_kind: None,
    }
}

/// First 12 hex chars of the SHA-256 of `input`.
pub(crate) fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// HTTP client shared by the network adapters.
pub(crate) fn http_client(config: &AdaptersConfig) -> CoreResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("failed to build HTTP client: {}", e)))
}

/// Map a transport-level reqwest error.
pub(crate) fn request_error(url: &str, err: reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::FetchFailed(format!("timed out fetching {}", url))
    } else {
        CoreError::FetchFailed(format!("failed to fetch {}: {}", url, err))
    }
}

/// Wrap `body` in a fenced code block tagged with `lang`.
pub(crate) fn fence(lang: &str, body: &str) -> String {
    let body = body.trim_end_matches('\n');
    // Longer fence when the body itself contains one.
    let ticks = if body.contains("```") { "````" } else { "```" };
    format!("{ticks}{lang}\n{body}\n{ticks}")
}

/// Extensions rendered as fenced code rather than prose.
pub(crate) fn is_code_extension(ext: &str) -> bool {
    matches!(
        ext,
        "rs" | "py"
            | "js"
            | "jsx"
            | "ts"
            | "tsx"
            | "go"
            | "java"
            | "kt"
            | "c"
            | "h"
            | "cc"
            | "cpp"
            | "hpp"
            | "cs"
            | "rb"
            | "php"
            | "swift"
            | "scala"
            | "sh"
            | "bash"
            | "zsh"
            | "ps1"
            | "lua"
            | "toml"
            | "yaml"
            | "yml"
            | "json"
            | "xml"
            | "ini"
            | "cfg"
            | "sql"
            | "html"
            | "htm"
            | "css"
            | "scss"
            | "vue"
            | "svelte"
            | "dockerfile"
            | "makefile"
    )
}

/// Extensions passed through as prose.
pub(crate) fn is_prose_extension(ext: &str) -> bool {
    matches!(
        ext,
        "" | "md" | "markdown" | "mdx" | "txt" | "text" | "rst" | "adoc" | "org" | "tex" | "csv"
            | "log"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn source_type(&self) -> SourceType {
            SourceType::Web
        }

        async fn fetch(&self, locator: &str) -> CoreResult<Fetched> {
            match self.0 {
                Some(body) => Ok(CanonicalDocument::new(SourceType::Web, "abc123", "Page", body)?
                    .with_url(locator)
                    .into()),
                None => Err(CoreError::NotFound(locator.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_extract_success_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract(&Fixed(Some("one two three")), "https://x.test/", dir.path()).await;
        assert!(result.success);
        assert_eq!(result.word_count, 3);
        assert_eq!(result.source_id.as_deref(), Some("abc123"));
        let path = result.output_file.unwrap();
        let doc = artifact::read(Path::new(&path)).unwrap();
        assert_eq!(doc.body, "one two three");
    }

    #[tokio::test]
    async fn test_extract_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract(&Fixed(None), "https://x.test/missing", dir.path()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("not_found"));
        assert!(result.output_file.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_body_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = extract(&Fixed(Some("   ")), "https://x.test/blank", dir.path()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("empty_content"));
    }

    #[test]
    fn test_short_hash_is_stable() {
        assert_eq!(short_hash("abc"), "ba7816bf8f01");
        assert_eq!(short_hash("abc").len(), 12);
    }

    #[test]
    fn test_fence() {
        assert_eq!(fence("rs", "fn main() {}\n"), "```rs\nfn main() {}\n```");
        assert!(fence("md", "```x```").starts_with("````md"));
    }
}
