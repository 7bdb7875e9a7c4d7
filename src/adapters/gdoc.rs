//! Google Docs adapter.
//!
//! Only publicly shared documents are supported: the adapter downloads the
//! plain-text export and takes the first non-empty line as the title.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{http_client, request_error, Fetched, SourceAdapter};
use crate::config::AdaptersConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{CanonicalDocument, SourceType};

const TITLE_MAX_CHARS: usize = 120;

pub struct GdocAdapter {
    client: reqwest::Client,
}

impl GdocAdapter {
    pub fn new(config: &AdaptersConfig) -> CoreResult<Self> {
        Ok(Self {
            client: http_client(config)?,
        })
    }
}

fn export_url(doc_id: &str) -> String {
    format!("https://docs.google.com/document/d/{}/export?format=txt", doc_id)
}

fn is_doc_id(s: &str) -> bool {
    s.len() >= 20
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the document id from a `docs.google.com/document/d/<id>` URL or a bare id.
pub fn parse_doc_id(locator: &str) -> Option<String> {
    let locator = locator.trim();
    if is_doc_id(locator) {
        return Some(locator.to_string());
    }
    let (_, rest) = locator.split_once("docs.google.com/document/")?;
    let rest = rest.strip_prefix("u/").map_or(rest, |r| {
        r.split_once('/').map(|(_, tail)| tail).unwrap_or(r)
    });
    let id = rest.strip_prefix("d/")?.split(['/', '?', '#']).next()?;
    is_doc_id(id).then(|| id.to_string())
}

/// First non-empty line, capped at 120 characters.
fn derive_title(text: &str, doc_id: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(TITLE_MAX_CHARS).collect::<String>())
        .unwrap_or_else(|| format!("Google Doc {}", doc_id))
}

#[async_trait]
impl SourceAdapter for GdocAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Gdoc
    }

    async fn fetch(&self, locator: &str) -> CoreResult<Fetched> {
        let doc_id = parse_doc_id(locator).ok_or_else(|| {
            CoreError::InvalidLocator(format!("no Google Docs document id in '{}'", locator))
        })?;
        let url = export_url(&doc_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(CoreError::NotFound(format!("Google Doc {} does not exist", doc_id)))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CoreError::NotFound(format!(
                    "Google Doc {} is not shared publicly",
                    doc_id
                )))
            }
            s if !s.is_success() => {
                return Err(CoreError::FetchFailed(format!("{} returned {}", url, s)))
            }
            _ => {}
        }

        let text = response.text().await.map_err(|e| request_error(&url, e))?;
        let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let title = derive_title(&text, &doc_id);

        let doc = CanonicalDocument::new(SourceType::Gdoc, doc_id.clone(), title, text)?
            .with_url(format!("https://docs.google.com/document/d/{}", doc_id));
        Ok(doc.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "1AbCdEfGhIjKlMnOpQrStUvWxYz_0123456789";

    #[test]
    fn test_parse_doc_id() {
        assert_eq!(parse_doc_id(ID).as_deref(), Some(ID));
        let url = format!("https://docs.google.com/document/d/{}/edit?usp=sharing", ID);
        assert_eq!(parse_doc_id(&url).as_deref(), Some(ID));
        let url = format!("docs.google.com/document/u/0/d/{}", ID);
        assert_eq!(parse_doc_id(&url).as_deref(), Some(ID));
        assert_eq!(parse_doc_id("https://docs.google.com/spreadsheets/d/abc"), None);
        assert_eq!(parse_doc_id("short-id"), None);
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("\n\n  Design Notes \nbody", ID), "Design Notes");
        assert_eq!(derive_title("", ID), format!("Google Doc {}", ID));
        let long = "x".repeat(300);
        assert_eq!(derive_title(&long, ID).chars().count(), 120);
    }

    #[tokio::test]
    async fn test_invalid_locator() {
        let adapter = GdocAdapter::new(&AdaptersConfig::default()).unwrap();
        let err = adapter.fetch("https://example.com/doc").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_locator");
    }
}
