//! GitHub repository adapter.
//!
//! Workflow:
//! 1. Parse the locator into owner, repo and an optional branch.
//! 2. Shallow-clone into a temporary directory with `git`.
//! 3. Walk the checkout, applying include/exclude globs and size caps.
//! 4. Concatenate files into one body, README first, each under a
//!    `## <path>` heading.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::process::Command;
use walkdir::WalkDir;

use super::{fence, is_prose_extension, short_hash, Fetched, SourceAdapter};
use crate::config::AdaptersConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{CanonicalDocument, SourceType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
}

impl RepoRef {
    /// Hash of the case-folded `github.com/<owner>/<repo>` path.
    pub fn source_id(&self) -> String {
        short_hash(&format!("github.com/{}/{}", self.owner, self.repo).to_lowercase())
    }

    pub fn web_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }

    fn clone_url(&self) -> String {
        format!("{}.git", self.web_url())
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Parse `https://github.com/<owner>/<repo>[.git][/tree/<branch>]` or `<owner>/<repo>`.
pub fn parse_repo_locator(locator: &str) -> CoreResult<RepoRef> {
    let invalid = || {
        CoreError::InvalidLocator(format!(
            "'{}' is not a GitHub repository (expected https://github.com/<owner>/<repo> or <owner>/<repo>)",
            locator
        ))
    };

    let trimmed = locator.trim().trim_end_matches('/');
    let path = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let path = path.strip_prefix("www.").unwrap_or(path);
    let path = if let Some(p) = path.strip_prefix("github.com/") {
        p
    } else if trimmed.contains("://") || path.matches('/').count() != 1 {
        return Err(invalid());
    } else {
        // `<owner>/<repo>` shorthand
        path
    };

    let parts: Vec<&str> = path.split('/').collect();
    let (owner, repo, branch) = match parts.as_slice() {
        [owner, repo] => (*owner, *repo, None),
        [owner, repo, "tree", branch @ ..] if !branch.is_empty() => {
            (*owner, *repo, Some(branch.join("/")))
        }
        _ => return Err(invalid()),
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if !valid_segment(owner) || !valid_segment(repo) {
        return Err(invalid());
    }

    Ok(RepoRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
        branch,
    })
}

pub struct GithubAdapter {
    git: String,
    timeout: Duration,
    include: GlobSet,
    exclude: GlobSet,
    max_file_bytes: u64,
    max_files: usize,
}

impl GithubAdapter {
    pub fn new(config: &AdaptersConfig) -> CoreResult<Self> {
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
            "**/*.lock".to_string(),
            "**/package-lock.json".to_string(),
        ];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            git: config.git_path.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            include: build_globset(&config.include_globs).map_err(CoreError::Internal)?,
            exclude: build_globset(&excludes).map_err(CoreError::Internal)?,
            max_file_bytes: config.max_file_bytes,
            max_files: config.max_files,
        })
    }

    async fn git(&self, args: &[&str], dir: Option<&Path>) -> CoreResult<Output> {
        let mut cmd = Command::new(&self.git);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                CoreError::FetchFailed(format!(
                    "git {} timed out after {}s",
                    args.first().unwrap_or(&""),
                    self.timeout.as_secs()
                ))
            })?;
        output.map_err(|e| {
            CoreError::FetchFailed(format!("failed to execute '{}'. Is git installed? {}", self.git, e))
        })
    }

    async fn git_stdout(&self, args: &[&str], dir: &Path) -> Option<String> {
        let output = self.git(args, Some(dir)).await.ok()?;
        if !output.status.success() {
            return None;
        }
        let out = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!out.is_empty()).then_some(out)
    }

    async fn clone_repo(&self, repo: &RepoRef, dest: &Path) -> CoreResult<()> {
        let url = repo.clone_url();
        let dest_str = dest.to_string_lossy();
        let mut args = vec!["clone", "--depth", "1", "--single-branch"];
        if let Some(branch) = &repo.branch {
            args.push("--branch");
            args.push(branch.as_str());
        }
        args.push(url.as_str());
        args.push(dest_str.as_ref());

        let output = self.git(&args, None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::NotFound(format!(
                "could not clone {} (missing or private repository): {}",
                repo.web_url(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    /// Render the checkout at `root` as one markdown body.
    ///
    /// Returns the body and the number of files included.
    pub fn render_tree(&self, root: &Path) -> Result<(String, usize)> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            if entry.metadata()?.len() > self.max_file_bytes {
                tracing::debug!(path = %rel_str, "skipping oversized file");
                continue;
            }
            files.push(rel_str);
        }

        // README at the repository root goes first; the rest stay in path order.
        files.sort_by_key(|p| (!is_root_readme(p), p.clone()));

        let mut sections = Vec::new();
        for rel in files {
            if sections.len() >= self.max_files {
                tracing::warn!(max_files = self.max_files, "file cap reached, truncating repository");
                break;
            }
            let bytes = std::fs::read(root.join(&rel))?;
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            let ext = Path::new(&rel)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            let content = if is_prose_extension(&ext) {
                text.trim_end().to_string()
            } else {
                fence(&ext, &text)
            };
            sections.push(format!("## {}\n\n{}", rel, content));
        }

        let count = sections.len();
        Ok((sections.join("\n\n"), count))
    }
}

fn is_root_readme(rel: &str) -> bool {
    !rel.contains('/') && rel.to_ascii_lowercase().starts_with("readme")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Github
    }

    async fn fetch(&self, locator: &str) -> CoreResult<Fetched> {
        let repo = parse_repo_locator(locator)?;
        let checkout = tempfile::tempdir()?;
        let dest = checkout.path().join(&repo.repo);

        tracing::info!(repo = %repo.web_url(), "cloning repository");
        self.clone_repo(&repo, &dest).await?;

        let commit = self.git_stdout(&["rev-parse", "HEAD"], &dest).await;
        let branch = match &repo.branch {
            Some(b) => Some(b.clone()),
            None => {
                self.git_stdout(&["rev-parse", "--abbrev-ref", "HEAD"], &dest)
                    .await
            }
        };

        let (body, file_count) = self.render_tree(&dest).map_err(CoreError::from_anyhow)?;
        let doc = CanonicalDocument::new(
            SourceType::Github,
            repo.source_id(),
            format!("{}/{}", repo.owner, repo.repo),
            body,
        )?
        .with_url(repo.web_url())
        .with_meta("branch", branch.unwrap_or_default())
        .with_meta("commit", commit.unwrap_or_else(|| "unknown".to_string()))
        .with_meta("file_count", file_count.to_string());
        Ok(doc.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_locators() {
        let r = parse_repo_locator("https://github.com/Rust-Lang/Cargo").unwrap();
        assert_eq!(r.owner, "Rust-Lang");
        assert_eq!(r.repo, "Cargo");
        assert_eq!(r.branch, None);
        assert_eq!(r.source_id().len(), 12);
        assert_eq!(
            r.source_id(),
            parse_repo_locator("rust-lang/cargo").unwrap().source_id()
        );

        let r = parse_repo_locator("https://github.com/owner/repo.git").unwrap();
        assert_eq!(r.repo, "repo");

        let r = parse_repo_locator("github.com/owner/repo/tree/feature/x").unwrap();
        assert_eq!(r.branch.as_deref(), Some("feature/x"));

        let r = parse_repo_locator("owner/repo").unwrap();
        assert_eq!(r.web_url(), "https://github.com/owner/repo");
    }

    #[test]
    fn test_source_id_separates_hyphenated_names() {
        let a = parse_repo_locator("a-b/c").unwrap();
        let b = parse_repo_locator("a/b-c").unwrap();
        assert_ne!(a.source_id(), b.source_id());

        let branch = parse_repo_locator("https://github.com/a-b/c/tree/dev").unwrap();
        assert_eq!(branch.source_id(), a.source_id());
    }

    #[test]
    fn test_invalid_repo_locators() {
        for bad in [
            "https://gitlab.com/owner/repo",
            "https://github.com/owner",
            "owner",
            "https://github.com/owner/repo/issues/1",
            "../etc",
        ] {
            let err = parse_repo_locator(bad).unwrap_err();
            assert_eq!(err.kind(), "invalid_locator", "{}", bad);
        }
    }

    #[test]
    fn test_render_tree_orders_readme_first_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("target/debug")).unwrap();
        std::fs::write(root.join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        std::fs::write(root.join("README.md"), "# Demo\n").unwrap();
        std::fs::write(root.join("Cargo.lock"), "lock").unwrap();
        std::fs::write(root.join("target/debug/out.rs"), "fn x() {}").unwrap();
        std::fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();

        let adapter = GithubAdapter::new(&AdaptersConfig::default()).unwrap();
        let (body, count) = adapter.render_tree(root).unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            body,
            "## README.md\n\n# Demo\n\n## src/lib.rs\n\n```rs\npub fn f() {}\n```"
        );
    }

    #[test]
    fn test_render_tree_caps() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{}.txt", i)), "text").unwrap();
        }
        std::fs::write(dir.path().join("big.txt"), "x".repeat(2048)).unwrap();
        let config = AdaptersConfig {
            max_files: 3,
            max_file_bytes: 1024,
            ..AdaptersConfig::default()
        };
        let adapter = GithubAdapter::new(&config).unwrap();
        let (body, count) = adapter.render_tree(dir.path()).unwrap();
        assert_eq!(count, 3);
        assert!(!body.contains("big.txt"));
    }

    #[tokio::test]
    async fn test_missing_git_binary_is_fetch_failed() {
        let config = AdaptersConfig {
            git_path: "/nonexistent/git".to_string(),
            ..AdaptersConfig::default()
        };
        let err = GithubAdapter::new(&config)
            .unwrap()
            .fetch("owner/repo")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "fetch_failed");
    }
}
