use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repowatch_core::{CollectError, LocalView};
use tokio::process::Command;
use tracing::{debug, warn};

use super::LocalSource;

/// Finds git clones among the immediate children of a directory.
#[derive(Debug, Clone)]
pub struct GitScanner {
    program: String,
}

impl Default for GitScanner {
    fn default() -> Self {
        Self::with_program("git")
    }
}

impl GitScanner {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Trimmed stdout of a successful git invocation; `None` when git ran but
    /// failed.
    async fn git(&self, repo: &Path, args: &[&str]) -> Result<Option<String>, CollectError> {
        let out = match Command::new(&self.program).current_dir(repo).args(args).output().await {
            Ok(out) => out,
            // A vanished working directory fails the spawn with the same kind.
            Err(e) if e.kind() == ErrorKind::NotFound && is_dir(repo).await => {
                return Err(CollectError::ToolNotFound(self.program.clone()))
            }
            Err(e) => return Err(CollectError::Io(e)),
        };
        if !out.status.success() {
            debug!(
                repo = %repo.display(),
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
    }

    async fn inspect(&self, path: &Path) -> Result<LocalView, CollectError> {
        let branch = self
            .git(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .filter(|b| !b.is_empty());
        let dirty = self
            .git(path, &["status", "--porcelain"])
            .await?
            .is_some_and(|s| !s.is_empty());
        let last_commit = self
            .git(path, &["log", "-1", "--format=%cI"])
            .await?
            .and_then(|s| parse_commit_time(&s));

        Ok(LocalView {
            path: path.to_path_buf(),
            branch,
            dirty,
            last_commit,
        })
    }
}

#[async_trait]
impl LocalSource for GitScanner {
    async fn scan(&self, root: &Path) -> Result<BTreeMap<String, LocalView>, CollectError> {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(CollectError::Io(e)),
        };

        let mut repos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_dir(&path).await || !tokio::fs::try_exists(path.join(".git")).await.unwrap_or(false) {
                continue;
            }
            if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
                repos.push((name, path));
            }
        }

        self.inspect_all(repos).await
    }
}

impl GitScanner {
    /// Inspect each repo, skipping the ones that fail. A missing `git` binary
    /// still fails the whole scan.
    async fn inspect_all(&self, repos: Vec<(String, PathBuf)>) -> Result<BTreeMap<String, LocalView>, CollectError> {
        let mut out = BTreeMap::new();
        for (name, path) in repos {
            match self.inspect(&path).await {
                Ok(view) => {
                    out.insert(name, view);
                }
                Err(e @ CollectError::ToolNotFound(_)) => return Err(e),
                Err(e) => warn!(repo = %name, error = %e, "skipping repository"),
            }
        }
        Ok(out)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

fn parse_commit_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
