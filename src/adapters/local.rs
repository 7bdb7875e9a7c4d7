//! Local file adapter.
//!
//! Prose passes through, code and config files are fenced with their
//! extension, and PDF/Office documents go through [`crate::extract`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{fence, is_code_extension, is_prose_extension, short_hash, Fetched, SourceAdapter};
use crate::error::{CoreError, CoreResult};
use crate::extract::{extract_text, DocumentFormat};
use crate::models::{CanonicalDocument, SourceType};

#[derive(Debug, Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    pub fn new() -> Self {
        Self
    }
}

/// Stable id for a resolved path: hash of `"<absolute path>:<base name>"`.
pub fn local_source_id(path: &Path) -> String {
    let name = file_name(path);
    short_hash(&format!("{}:{}", path.display(), name))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn resolve(locator: &str) -> CoreResult<PathBuf> {
    let raw = locator.strip_prefix("file://").unwrap_or(locator);
    let path = Path::new(raw);
    if !path.exists() {
        return Err(CoreError::NotFound(format!("file does not exist: {}", raw)));
    }
    let path = path.canonicalize()?;
    if path.is_dir() {
        return Err(CoreError::NotFound(format!(
            "{} is a directory, not a file",
            path.display()
        )));
    }
    Ok(path)
}

/// Convert raw file bytes to a document body according to `ext`.
///
/// Returns the body plus an optional warning.
fn body_for(ext: &str, bytes: &[u8], display: &str) -> CoreResult<(String, Option<String>)> {
    if let Some(format) = DocumentFormat::from_extension(ext) {
        let text = extract_text(bytes, format)
            .map_err(|e| CoreError::UnsupportedFormat(format!("{}: {}", display, e)))?;
        return Ok((text, None));
    }

    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => {
            return Err(CoreError::UnsupportedFormat(format!(
                "{}: .{} files are not text and have no converter",
                display, ext
            )))
        }
    };

    if is_prose_extension(ext) {
        Ok((text.to_string(), None))
    } else if is_code_extension(ext) {
        if text.trim().is_empty() {
            return Ok((String::new(), None));
        }
        Ok((fence(ext, text), None))
    } else {
        Ok((
            text.to_string(),
            Some(format!(
                "unsupported format: .{} is not a known type; ingested as plain text",
                ext
            )),
        ))
    }
}

#[async_trait]
impl SourceAdapter for LocalAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Local
    }

    async fn fetch(&self, locator: &str) -> CoreResult<Fetched> {
        let path = resolve(locator)?;
        let bytes = tokio::fs::read(&path).await?;
        let display = path.display().to_string();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let (body, warning) = body_for(&ext, &bytes, &display)?;
        let name = file_name(&path);
        let doc = CanonicalDocument::new(SourceType::Local, local_source_id(&path), &name, body)?
            .with_path(display.clone())
            .with_meta("extension", ext.clone())
            .with_meta("file_size", bytes.len().to_string());

        Ok(Fetched {
            doc,
            warnings: warning.into_iter().collect(),
        })
    }
}
