//! Web page adapter.
//!
//! Fetches a URL with `reqwest` and reduces HTML to readable text with
//! `scraper`: the content root is the first `article`, else `main`, else
//! `body`, and block elements (headings, paragraphs, list items, quotes,
//! preformatted text) become blank-line separated paragraphs.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use scraper::{ElementRef, Html, Selector};

use super::{http_client, request_error, short_hash, Fetched, SourceAdapter};
use crate::config::AdaptersConfig;
use crate::error::{CoreError, CoreResult};
use crate::extract::{extract_text, DocumentFormat};
use crate::models::{CanonicalDocument, SourceType};

const SKIPPED: [&str; 6] = ["script", "style", "template", "noscript", "svg", "nav"];

pub struct WebAdapter {
    client: reqwest::Client,
}

impl WebAdapter {
    pub fn new(config: &AdaptersConfig) -> CoreResult<Self> {
        Ok(Self {
            client: http_client(config)?,
        })
    }
}

/// Parse and validate an `http(s)` locator, dropping any fragment.
pub fn parse_url(locator: &str) -> CoreResult<Url> {
    let mut url = Url::parse(locator.trim())
        .map_err(|e| CoreError::InvalidLocator(format!("'{}' is not a URL: {}", locator, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::InvalidLocator(format!(
            "'{}' must use http or https",
            locator
        )));
    }
    if url.host_str().is_none() {
        return Err(CoreError::InvalidLocator(format!("'{}' has no host", locator)));
    }
    url.set_fragment(None);
    Ok(url)
}

fn fallback_title(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let path = url.path().trim_end_matches('/');
    format!("{}{}", host, path)
}

fn block_prefix(tag: &str) -> Option<&'static str> {
    match tag {
        "h1" => Some("# "),
        "h2" => Some("## "),
        "h3" => Some("### "),
        "h4" => Some("#### "),
        "h5" => Some("##### "),
        "h6" => Some("###### "),
        "p" | "blockquote" | "pre" => Some(""),
        "li" => Some("- "),
        _ => None,
    }
}

/// Whether an ancestor between `element` and `root` is skipped or already
/// emitted as a block.
fn covered(element: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    let mut node = element.parent();
    while let Some(parent) = node {
        if parent.id() == root.id() {
            break;
        }
        if let Some(el) = ElementRef::wrap(parent) {
            let tag = el.value().name();
            if SKIPPED.contains(&tag) || block_prefix(tag).is_some() {
                return true;
            }
        }
        node = parent.parent();
    }
    false
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn preformatted(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reduce an HTML document to its `<title>` and readable body text.
pub fn html_to_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let root = ["article", "main", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut blocks = Vec::new();
    for element in root.descendent_elements() {
        let tag = element.value().name();
        let Some(prefix) = block_prefix(tag) else {
            continue;
        };
        if covered(element, root) {
            continue;
        }
        let raw: String = element.text().collect();
        let text = if tag == "pre" {
            preformatted(&raw)
        } else {
            collapse_whitespace(&raw)
        };
        if !text.is_empty() {
            blocks.push(format!("{}{}", prefix, text));
        }
    }

    // Pages without block markup: fall back to all visible root text.
    if blocks.is_empty() {
        let visible: Vec<&str> = root
            .descendants()
            .filter_map(|node| node.value().as_text().map(|t| (node, t)))
            .filter(|(node, _)| {
                !node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .map(|el| SKIPPED.contains(&el.name()))
                        .unwrap_or(false)
                })
            })
            .map(|(_, t)| &**t)
            .collect();
        let text = collapse_whitespace(&visible.join(" "));
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    (title, blocks.join("\n\n"))
}

#[async_trait]
impl SourceAdapter for WebAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    async fn fetch(&self, locator: &str) -> CoreResult<Fetched> {
        let url = parse_url(locator)?;
        tracing::debug!(url = %url, "fetching web page");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| request_error(url.as_str(), e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CoreError::NotFound(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(CoreError::FetchFailed(format!("{} returned {}", url, status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(url.as_str(), e))?;
        let mime = content_type.split(';').next().unwrap_or("").trim().to_string();

        let (title, body) = match mime.as_str() {
            "text/html" | "application/xhtml+xml" | "" => {
                html_to_text(&String::from_utf8_lossy(&bytes))
            }
            "text/plain" | "text/markdown" | "text/x-markdown" => {
                (None, String::from_utf8_lossy(&bytes).into_owned())
            }
            other => match DocumentFormat::from_mime(other) {
                Some(format) => {
                    let text = extract_text(&bytes, format)
                        .map_err(|e| CoreError::UnsupportedFormat(format!("{}: {}", url, e)))?;
                    (None, text)
                }
                None => {
                    return Err(CoreError::UnsupportedFormat(format!(
                        "{} has content type '{}'",
                        url, other
                    )))
                }
            },
        };

        let title = title.unwrap_or_else(|| fallback_title(&url));
        let mut doc = CanonicalDocument::new(SourceType::Web, short_hash(url.as_str()), title, body)?
            .with_url(url.as_str());
        if !mime.is_empty() {
            doc = doc.with_meta("content_type", mime);
        }
        Ok(doc.into())
    }
}
