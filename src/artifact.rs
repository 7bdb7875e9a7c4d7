//! Persisted document artifacts.
//!
//! Adapters write every canonical document to disk as a metadata header
//! followed by the body. The ingestion pipeline re-reads this artifact
//! rather than the in-memory document, so extraction and indexing can run
//! at different times.
//!
//! ```text
//! ---
//! source_type: local
//! source_id: 1a2b3c4d5e6f
//! source_path: /home/me/notes.md
//! source_title: notes.md
//! extracted_at: 2026-01-01T00:00:00Z
//! extension: md
//! ---
//!
//! Alpha Beta Gamma
//! ```

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::{format_timestamp, CanonicalDocument, SourceType};

const FENCE: &str = "---";

/// Header keys owned by the artifact format itself.
const RESERVED: [&str; 6] = [
    "source_type",
    "source_id",
    "source_url",
    "source_path",
    "source_title",
    "extracted_at",
];

/// File name an artifact for `source_id` is stored under.
pub fn artifact_file_name(source_id: &str) -> String {
    format!("{}.md", source_id)
}

/// Serialize a document to the artifact text format.
pub fn render(doc: &CanonicalDocument) -> String {
    let mut out = String::with_capacity(doc.body.len() + 256);
    out.push_str(FENCE);
    out.push('\n');
    push_field(&mut out, "source_type", doc.source_type.as_str());
    push_field(&mut out, "source_id", &doc.source_id);
    if let Some(url) = &doc.source_url {
        push_field(&mut out, "source_url", url);
    }
    if let Some(path) = &doc.source_path {
        push_field(&mut out, "source_path", path);
    }
    push_field(&mut out, "source_title", &doc.title);
    push_field(&mut out, "extracted_at", &format_timestamp(&doc.extracted_at));
    for (key, value) in &doc.metadata {
        if RESERVED.contains(&key.as_str()) {
            continue;
        }
        push_field(&mut out, key, value);
    }
    out.push_str(FENCE);
    out.push_str("\n\n");
    out.push_str(&doc.body);
    out.push('\n');
    out
}

fn push_field(out: &mut String, key: &str, value: &str) {
    let single_line = value.replace("\r\n", " ").replace(['\r', '\n'], " ");
    out.push_str(key);
    out.push_str(": ");
    out.push_str(&single_line);
    out.push('\n');
}

/// Parse artifact text back into a document.
pub fn parse(text: &str) -> Result<CanonicalDocument> {
    let mut lines = text.split_inclusive('\n');
    let first = lines.next().unwrap_or_default();
    if first.trim_end() != FENCE {
        bail!("artifact is missing its metadata header");
    }

    let mut header: BTreeMap<String, String> = BTreeMap::new();
    let mut consumed = first.len();
    let mut closed = false;
    for line in lines.by_ref() {
        consumed += line.len();
        let content = line.trim_end_matches(['\n', '\r']);
        if content.trim_end() == FENCE {
            closed = true;
            break;
        }
        if content.trim().is_empty() {
            continue;
        }
        let (key, value) = content
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line: {}", content))?;
        // Values are kept verbatim after the single separating space.
        let value = value.strip_prefix(' ').unwrap_or(value);
        header.insert(key.trim().to_string(), value.to_string());
    }
    if !closed {
        bail!("artifact header is not terminated");
    }

    let rest = &text[consumed..];
    let body = rest.strip_prefix('\n').unwrap_or(rest);
    let body = body.strip_suffix('\n').unwrap_or(body);

    let source_type: SourceType = header
        .get("source_type")
        .ok_or_else(|| anyhow!("artifact header has no source_type"))?
        .parse()?;
    let source_id = header
        .remove("source_id")
        .ok_or_else(|| anyhow!("artifact header has no source_id"))?;
    let title = header.remove("source_title").unwrap_or_default();

    let mut doc = CanonicalDocument::new(source_type, source_id, title, body)?;
    doc.source_url = header.remove("source_url");
    doc.source_path = header.remove("source_path");
    if let Some(ts) = header.remove("extracted_at") {
        doc.extracted_at = DateTime::parse_from_rfc3339(&ts)
            .with_context(|| format!("invalid extracted_at '{}'", ts))?
            .with_timezone(&Utc);
    }
    header.remove("source_type");
    doc.metadata = header;
    Ok(doc)
}

/// Write `doc` into `dir`, returning the artifact path.
///
/// The artifact is written to a temporary file in the same directory and
/// renamed into place, so a failure never leaves a partial artifact behind.
pub fn write(doc: &CanonicalDocument, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let target = dir.join(artifact_file_name(&doc.source_id));

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(render(doc).as_bytes())?;
    tmp.flush()?;
    tmp.persist(&target)
        .map_err(|e| anyhow!("Failed to persist artifact {}: {}", target.display(), e))?;
    Ok(target)
}

/// Read and parse an artifact from disk.
pub fn read(path: &Path) -> Result<CanonicalDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
    parse(&text).with_context(|| format!("Invalid artifact: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalDocument {
        CanonicalDocument::new(
            SourceType::Youtube,
            "dQw4w9WgXcQ",
            "A talk\nwith a newline",
            "first line\n\n---\nsecond line",
        )
        .unwrap()
        .with_url("https://youtu.be/dQw4w9WgXcQ")
        .with_meta("channel", "Example Channel")
        .with_meta("duration", "212")
    }

    #[test]
    fn test_header_and_body_survive_disk() {
        let dir = tempfile::tempdir().unwrap();
        let doc = sample();
        let path = write(&doc, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "dQw4w9WgXcQ.md");

        let back = read(&path).unwrap();
        assert_eq!(back.source_type, SourceType::Youtube);
        assert_eq!(back.source_id, doc.source_id);
        assert_eq!(back.body, doc.body);
        assert_eq!(back.title, "A talk with a newline");
        assert_eq!(back.source_url.as_deref(), Some("https://youtu.be/dQw4w9WgXcQ"));
        assert_eq!(back.metadata.get("channel").map(String::as_str), Some("Example Channel"));
        assert_eq!(back.extracted_at.timestamp(), doc.extracted_at.timestamp());
    }

    #[test]
    fn test_header_values_keep_inner_whitespace() {
        let doc = CanonicalDocument::new(SourceType::Local, "abc", "my  notes.md", "body")
            .unwrap()
            .with_path("/tmp/my  notes\t(1).md")
            .with_meta("note", "line one\r\nline two");
        let back = parse(&render(&doc)).unwrap();
        assert_eq!(back.title, "my  notes.md");
        assert_eq!(back.source_path.as_deref(), Some("/tmp/my  notes\t(1).md"));
        assert_eq!(back.metadata.get("note").map(String::as_str), Some("line one line two"));
    }

    #[test]
    fn test_rendered_header_layout() {
        let text = render(&sample());
        assert!(text.starts_with("---\nsource_type: youtube\nsource_id: dQw4w9WgXcQ\n"));
        assert!(text.contains("source_title: A talk with a newline\n"));
        assert!(text.contains("---\n\nfirst line"));
    }

    #[test]
    fn test_missing_header_rejected() {
        assert!(parse("just a body").is_err());
        assert!(parse("---\nsource_type: local\n").is_err());
    }

    #[test]
    fn test_empty_body_rejected() {
        let text = "---\nsource_type: local\nsource_id: x\n---\n\n   \n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        write(&sample(), dir.path()).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
