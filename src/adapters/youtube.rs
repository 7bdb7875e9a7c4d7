//! YouTube transcript adapter.
//!
//! Drives `yt-dlp` as a subprocess: a best-effort `--dump-json` probe for
//! title, channel and duration, then a subtitle download (manual or
//! automatic captions, WebVTT) into a temporary directory. The caption file
//! is flattened to plain text by [`parse_vtt`].

use std::collections::HashSet;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{Fetched, SourceAdapter};
use crate::config::AdaptersConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{CanonicalDocument, SourceType};

pub struct YoutubeAdapter {
    ytdlp: String,
    sub_langs: String,
    timeout: Duration,
}

impl YoutubeAdapter {
    pub fn new(config: &AdaptersConfig) -> Self {
        Self {
            ytdlp: config.ytdlp_path.clone(),
            sub_langs: config.subtitle_langs.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, args: &[&str]) -> CoreResult<Output> {
        let mut cmd = Command::new(&self.ytdlp);
        cmd.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                CoreError::FetchFailed(format!(
                    "{} timed out after {}s",
                    self.ytdlp,
                    self.timeout.as_secs()
                ))
            })?;
        output.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::FetchFailed(format!(
                "'{}' not found. Install yt-dlp or set adapters.ytdlp_path",
                self.ytdlp
            )),
            _ => CoreError::FetchFailed(format!("failed to run {}: {}", self.ytdlp, e)),
        })
    }

    async fn probe(&self, url: &str) -> Option<VideoInfo> {
        let output = match self
            .run(&["--dump-json", "--skip-download", "--no-warnings", "--no-playlist", url])
            .await
        {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                tracing::debug!(
                    stderr = %String::from_utf8_lossy(&o.stderr).trim(),
                    "yt-dlp metadata probe failed"
                );
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "yt-dlp metadata probe failed");
                return None;
            }
        };
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
        Some(VideoInfo {
            title: json["title"].as_str().map(str::to_string),
            channel: json["channel"]
                .as_str()
                .or_else(|| json["uploader"].as_str())
                .map(str::to_string),
            duration: json["duration"].as_f64().map(|d| d.round() as u64),
        })
    }

    async fn download_subtitles(&self, url: &str, dir: &Path) -> CoreResult<Option<String>> {
        let template = dir.join("%(id)s.%(ext)s");
        let template = template.to_string_lossy();
        let output = self
            .run(&[
                "--skip-download",
                "--write-subs",
                "--write-auto-subs",
                "--sub-langs",
                self.sub_langs.as_str(),
                "--sub-format",
                "vtt",
                "--no-playlist",
                "--no-warnings",
                "-o",
                template.as_ref(),
                url,
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.contains("Video unavailable") || stderr.contains("not available") {
                return Err(CoreError::NotFound(format!("video unavailable: {}", url)));
            }
            return Err(CoreError::FetchFailed(format!("yt-dlp failed: {}", stderr)));
        }

        let mut files: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "vtt").unwrap_or(false))
            .collect();
        files.sort();
        match files.first() {
            Some(path) => Ok(Some(tokio::fs::read_to_string(path).await?)),
            None => Ok(None),
        }
    }
}

struct VideoInfo {
    title: Option<String>,
    channel: Option<String>,
    duration: Option<u64>,
}

fn is_video_id(s: &str) -> bool {
    s.len() == 11
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the 11-character video id from a URL or bare id.
pub fn parse_video_id(locator: &str) -> Option<String> {
    let locator = locator.trim();
    if is_video_id(locator) {
        return Some(locator.to_string());
    }

    let rest = locator
        .strip_prefix("https://")
        .or_else(|| locator.strip_prefix("http://"))
        .unwrap_or(locator);
    let rest = rest
        .strip_prefix("www.")
        .or_else(|| rest.strip_prefix("m."))
        .unwrap_or(rest);

    let candidate = if let Some(path) = rest.strip_prefix("youtu.be/") {
        path.split(['?', '&', '#', '/']).next()
    } else if let Some(path) = rest.strip_prefix("youtube.com/") {
        if let Some(query) = path.strip_prefix("watch?") {
            query
                .split(['&', '#'])
                .find_map(|kv| kv.strip_prefix("v="))
        } else {
            ["embed/", "shorts/", "live/", "v/"]
                .iter()
                .find_map(|p| path.strip_prefix(*p))
                .and_then(|id| id.split(['?', '&', '#', '/']).next())
        }
    } else {
        None
    };

    candidate.filter(|id| is_video_id(id)).map(str::to_string)
}

/// Flatten a WebVTT caption file to plain text.
///
/// Drops the header, `NOTE`/`STYLE`/`REGION` blocks, cue identifiers and
/// timing lines, strips inline tags and decodes basic entities. Repeated
/// lines (rolling auto-captions) are kept once, in first-seen order.
pub fn parse_vtt(vtt: &str) -> String {
    let normalized = vtt.replace("\r\n", "\n");
    let mut seen = HashSet::new();
    let mut lines = Vec::new();

    for block in normalized.split("\n\n") {
        let block = block.trim_matches('\n');
        let first = block.lines().next().unwrap_or("").trim_start_matches('\u{feff}');
        if first.starts_with("WEBVTT")
            || first.starts_with("NOTE")
            || first.starts_with("STYLE")
            || first.starts_with("REGION")
        {
            continue;
        }

        let mut cue = block.lines().skip_while(|l| !l.contains("-->"));
        if cue.next().is_none() {
            continue;
        }
        for line in cue {
            if line.starts_with("Kind:") || line.starts_with("Language:") {
                continue;
            }
            let text = decode_entities(&strip_tags(line));
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                continue;
            }
            if seen.insert(text.clone()) {
                lines.push(text);
            }
        }
    }
    lines.join(" ")
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[async_trait]
impl SourceAdapter for YoutubeAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Youtube
    }

    async fn fetch(&self, locator: &str) -> CoreResult<Fetched> {
        let video_id = parse_video_id(locator).ok_or_else(|| {
            CoreError::InvalidLocator(format!("no YouTube video id in '{}'", locator))
        })?;
        let url = format!("https://www.youtube.com/watch?v={}", video_id);

        let info = self.probe(&url).await;
        let title = info.as_ref().and_then(|i| i.title.clone());

        let dir = tempfile::tempdir()?;
        let vtt = self.download_subtitles(&url, dir.path()).await?;
        let transcript = vtt.as_deref().map(parse_vtt).unwrap_or_default();
        if transcript.trim().is_empty() {
            return Err(CoreError::NoTranscript { video_id, title });
        }

        let doc = CanonicalDocument::new(
            SourceType::Youtube,
            video_id.clone(),
            title.unwrap_or_else(|| format!("YouTube video {}", video_id)),
            transcript,
        )?
        .with_url(url)
        .with_meta("video_id", video_id)
        .with_meta(
            "channel",
            info.as_ref().and_then(|i| i.channel.clone()).unwrap_or_default(),
        )
        .with_meta(
            "duration",
            info.and_then(|i| i.duration).unwrap_or(0).to_string(),
        );
        Ok(doc.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_id_shapes() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(parse_video_id("dQw4w9WgXcQ"), id);
        assert_eq!(parse_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(parse_video_id("https://youtube.com/watch?feature=x&v=dQw4w9WgXcQ&t=10"), id);
        assert_eq!(parse_video_id("https://m.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(parse_video_id("youtu.be/dQw4w9WgXcQ?t=42"), id);
        assert_eq!(parse_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), id);
        assert_eq!(parse_video_id("https://www.youtube.com/shorts/dQw4w9WgXcQ"), id);
        assert_eq!(parse_video_id("https://www.youtube.com/live/dQw4w9WgXcQ?si=abc"), id);
    }

    #[test]
    fn test_invalid_video_locators() {
        assert_eq!(parse_video_id("https://example.com/watch?v=dQw4w9WgXcQ"), None);
        assert_eq!(parse_video_id("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(parse_video_id("not a video"), None);
    }

    #[test]
    fn test_parse_vtt_strips_markup_and_dedups() {
        let vtt = "WEBVTT\nKind: captions\nLanguage: en\n\n\
                   NOTE this is a comment\nspanning lines\n\n\
                   1\n00:00:00.000 --> 00:00:02.000 align:start position:0%\n\
                   hello<00:00:00.500><c> world</c>\n\n\
                   2\n00:00:02.000 --> 00:00:04.000\n\
                   hello world\nfish &amp; chips\n\n\
                   00:00:04.000 --> 00:00:06.000\n\
                   fish &amp; chips\n";
        assert_eq!(parse_vtt(vtt), "hello world fish & chips");
    }

    #[test]
    fn test_parse_vtt_header_only_is_empty() {
        assert_eq!(parse_vtt("WEBVTT\n\n"), "");
        assert_eq!(parse_vtt("WEBVTT\r\n\r\nNOTE nothing\r\n"), "");
    }

    #[tokio::test]
    async fn test_invalid_locator_fails_before_spawning() {
        let adapter = YoutubeAdapter::new(&AdaptersConfig::default());
        let err = adapter.fetch("https://example.com/").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_locator");
    }

    #[tokio::test]
    async fn test_missing_binary_is_fetch_failed() {
        let config = AdaptersConfig {
            ytdlp_path: "/nonexistent/yt-dlp".to_string(),
            ..AdaptersConfig::default()
        };
        let err = YoutubeAdapter::new(&config)
            .fetch("dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch_failed");
    }
}
