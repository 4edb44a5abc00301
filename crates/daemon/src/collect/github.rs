//! Remote views from the GitHub CLI.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use repowatch_core::{CiStatus, CollectError, FilePresence, Release, RemoteView, Visibility};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{RemoteSource, ToolStatus};

const LIST_FIELDS: &str =
    "name,owner,description,visibility,homepageUrl,primaryLanguage,repositoryTopics,hasPages,defaultBranchRef,latestRelease,pushedAt";
const LIST_LIMIT: &str = "200";

/// Drives `gh` as a child process.
#[derive(Debug, Clone)]
pub struct GhClient {
    program: String,
    enrich_concurrency: usize,
}

impl GhClient {
    pub fn new(enrich_concurrency: usize) -> Self {
        Self::with_program("gh", enrich_concurrency)
    }

    pub fn with_program(program: impl Into<String>, enrich_concurrency: usize) -> Self {
        Self {
            program: program.into(),
            enrich_concurrency: enrich_concurrency.max(1),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, CollectError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("[gh] >>> {command}");
        let start = Instant::now();

        let out = match Command::new(&self.program).args(args).output().await {
            Ok(out) => out,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CollectError::ToolNotFound(self.program.clone()))
            }
            Err(e) => return Err(CollectError::Io(e)),
        };

        if out.status.success() {
            debug!("[gh] <<< OK ({}ms)", start.elapsed().as_millis());
            return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        if is_auth_failure(&stderr) {
            return Err(CollectError::NotAuthenticated {
                tool: self.program.clone(),
                detail: stderr,
            });
        }
        Err(CollectError::Command { command, stderr })
    }

    async fn open_pr_count(&self, repo: &str) -> Result<u32, CollectError> {
        let args = [
            "pr", "list", "--repo", repo, "--state", "open", "--json", "number", "--limit", "100",
        ];
        let out = self.run(&args).await?;
        parse_pr_count(&out).map_err(|source| parse_error(&args, source))
    }

    async fn ci_status(&self, repo: &str) -> Result<CiStatus, CollectError> {
        let args = ["run", "list", "--repo", repo, "--limit", "1", "--json", "status,conclusion"];
        match self.run(&args).await {
            Ok(out) => parse_ci_status(&out).map_err(|source| parse_error(&args, source)),
            Err(CollectError::Command { stderr, .. }) if stderr.contains("no runs found") => Ok(CiStatus::None),
            Err(e) => Err(e),
        }
    }

    async fn file_presence(&self, repo: &str) -> Result<FilePresence, CollectError> {
        let endpoint = format!("repos/{repo}/contents/");
        let args = ["api", endpoint.as_str()];
        let out = self.run(&args).await?;
        parse_root_listing(&out).map_err(|source| parse_error(&args, source))
    }

    /// Per-repository sub-fetches. Each one that fails leaves its field at the
    /// zero value.
    async fn enrich(&self, view: &mut RemoteView) {
        let repo = format!("{}/{}", view.owner, view.name);

        match self.open_pr_count(&repo).await {
            Ok(n) => view.open_items = n,
            Err(e) => warn!(repo = %repo, error = %e, "open item count unavailable"),
        }
        match self.ci_status(&repo).await {
            Ok(status) => view.ci_status = status,
            Err(e) => warn!(repo = %repo, error = %e, "ci status unavailable"),
        }
        match self.file_presence(&repo).await {
            Ok(files) => view.files = files,
            // Empty repositories have no contents endpoint.
            Err(e) => debug!(repo = %repo, error = %e, "file listing unavailable"),
        }
    }
}

#[async_trait]
impl RemoteSource for GhClient {
    async fn fetch(&self, owner: &str) -> Result<Vec<RemoteView>, CollectError> {
        // No owner lists the authenticated account's repositories.
        let mut args = vec!["repo", "list"];
        if !owner.is_empty() {
            args.push(owner);
        }
        args.extend(["--json", LIST_FIELDS, "--limit", LIST_LIMIT]);
        let out = self.run(&args).await?;
        let views = parse_repo_list(&out, owner).map_err(|source| parse_error(&args, source))?;

        let permits = Arc::new(Semaphore::new(self.enrich_concurrency));
        let mut tasks = JoinSet::new();
        for (idx, mut view) in views.into_iter().enumerate() {
            let client = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                client.enrich(&mut view).await;
                (idx, view)
            });
        }

        let mut enriched = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(item) => enriched.push(item),
                Err(e) => warn!(error = %e, "enrichment task failed"),
            }
        }
        enriched.sort_by_key(|(idx, _)| *idx);
        Ok(enriched.into_iter().map(|(_, v)| v).collect())
    }

    async fn probe(&self) -> ToolStatus {
        match self.run(&["auth", "status"]).await {
            Ok(_) => ToolStatus {
                available: true,
                authenticated: true,
            },
            Err(CollectError::ToolNotFound(_)) => ToolStatus::default(),
            Err(_) => ToolStatus {
                available: true,
                authenticated: false,
            },
        }
    }

    async fn clone_repo(&self, owner: &str, name: &str, dest: &Path) -> Result<(), CollectError> {
        let repo = if owner.is_empty() {
            name.to_string()
        } else {
            format!("{owner}/{name}")
        };
        let dest = dest.to_string_lossy();
        self.run(&["repo", "clone", &repo, &dest]).await.map(|_| ())
    }
}

fn is_auth_failure(stderr: &str) -> bool {
    ["not authenticated", "gh auth login", "GH_ENTERPRISE_TOKEN", "GitHub Credentials"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

fn parse_error(args: &[&str], source: serde_json::Error) -> CollectError {
    CollectError::Parse {
        command: format!("gh {}", args.join(" ")),
        source,
    }
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Login {
    #[serde(default)]
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRepo {
    name: String,
    #[serde(default)]
    owner: Option<Login>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: String,
    #[serde(default)]
    homepage_url: Option<String>,
    #[serde(default)]
    primary_language: Option<Named>,
    #[serde(default)]
    repository_topics: Option<Vec<Named>>,
    #[serde(default)]
    has_pages: bool,
    #[serde(default)]
    default_branch_ref: Option<Named>,
    #[serde(default)]
    latest_release: Option<GhRelease>,
    #[serde(default)]
    pushed_at: Option<String>,
}

impl GhRepo {
    fn into_view(self, owner: &str) -> RemoteView {
        let latest_release = self
            .latest_release
            .filter(|r| !r.tag_name.is_empty())
            .map(|r| Release {
                tag: r.tag_name,
                published_at: r.published_at.as_deref().and_then(parse_time),
            });
        RemoteView {
            name: self.name,
            owner: self
                .owner
                .map(|o| o.login)
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| owner.to_string()),
            description: self.description,
            visibility: Visibility::parse(&self.visibility),
            homepage_url: self.homepage_url,
            primary_language: self.primary_language.map(|l| l.name).filter(|n| !n.is_empty()),
            topics: self
                .repository_topics
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.name)
                .filter(|t| !t.is_empty())
                .collect(),
            pushed_at: self.pushed_at.as_deref().and_then(parse_time),
            latest_release,
            default_branch: self.default_branch_ref.map(|b| b.name).filter(|n| !n.is_empty()),
            has_pages: self.has_pages,
            ..Default::default()
        }
    }
}

/// Decode `gh repo list` output. Individual records that do not decode are
/// skipped.
fn parse_repo_list(raw: &str, owner: &str) -> Result<Vec<RemoteView>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let records: Vec<Value> = serde_json::from_str(raw)?;
    let mut views = Vec::with_capacity(records.len());
    for record in records {
        match serde_json::from_value::<GhRepo>(record) {
            Ok(repo) => views.push(repo.into_view(owner)),
            Err(e) => warn!(error = %e, "skipping undecodable repository record"),
        }
    }
    Ok(views)
}

fn parse_pr_count(raw: &str) -> Result<u32, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(0);
    }
    let prs: Vec<Value> = serde_json::from_str(raw)?;
    Ok(u32::try_from(prs.len()).unwrap_or(u32::MAX))
}

fn parse_ci_status(raw: &str) -> Result<CiStatus, serde_json::Error> {
    #[derive(Deserialize)]
    struct Run {
        #[serde(default)]
        conclusion: Option<String>,
    }

    if raw.trim().is_empty() {
        return Ok(CiStatus::None);
    }
    let runs: Vec<Run> = serde_json::from_str(raw)?;
    let status = match runs.first().and_then(|r| r.conclusion.as_deref()) {
        Some("success") => CiStatus::Passing,
        Some("failure") => CiStatus::Failing,
        _ => CiStatus::None,
    };
    Ok(status)
}

fn parse_root_listing(raw: &str) -> Result<FilePresence, serde_json::Error> {
    let entries: Vec<Named> = serde_json::from_str(raw)?;
    Ok(FilePresence::from_names(entries.iter().map(|e| e.name.as_str())))
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO_LIST: &str = r#"[
      {
        "name": "widget",
        "owner": {"login": "someone"},
        "description": "A widget",
        "visibility": "PUBLIC",
        "homepageUrl": "",
        "primaryLanguage": {"name": "Rust"},
        "repositoryTopics": [{"name": "cli"}, {"name": "tools"}],
        "hasPages": true,
        "defaultBranchRef": {"name": "main"},
        "latestRelease": {"tagName": "v1.2.0", "publishedAt": "2025-01-02T03:04:05Z"},
        "pushedAt": "2025-02-01T00:00:00Z"
      },
      {"description": "no name field"},
      {
        "name": "gadget",
        "visibility": "PRIVATE",
        "primaryLanguage": null,
        "repositoryTopics": null,
        "defaultBranchRef": null,
        "latestRelease": null
      }
    ]"#;

    #[test]
    fn repo_list_decodes_and_skips_bad_records() {
        let views = parse_repo_list(REPO_LIST, "me").unwrap();
        assert_eq!(views.len(), 2);

        let widget = &views[0];
        assert_eq!(widget.owner, "someone");
        assert_eq!(widget.visibility, Visibility::Public);
        assert_eq!(widget.primary_language.as_deref(), Some("Rust"));
        assert_eq!(widget.topics, vec!["cli", "tools"]);
        assert!(widget.has_pages);
        assert_eq!(widget.default_branch.as_deref(), Some("main"));
        assert_eq!(widget.latest_release.as_ref().map(|r| r.tag.as_str()), Some("v1.2.0"));
        assert!(widget.pushed_at.is_some());

        let gadget = &views[1];
        assert_eq!(gadget.owner, "me");
        assert_eq!(gadget.visibility, Visibility::Private);
        assert!(gadget.topics.is_empty());
        assert!(gadget.latest_release.is_none());
        assert!(gadget.pushed_at.is_none());
    }

    #[test]
    fn empty_output_is_no_repos() {
        assert!(parse_repo_list("  \n", "me").unwrap().is_empty());
        assert!(parse_repo_list("{", "me").is_err());
    }

    #[test]
    fn ci_conclusions_map_to_status() {
        assert_eq!(parse_ci_status(r#"[{"status":"completed","conclusion":"success"}]"#).unwrap(), CiStatus::Passing);
        assert_eq!(parse_ci_status(r#"[{"status":"completed","conclusion":"failure"}]"#).unwrap(), CiStatus::Failing);
        assert_eq!(parse_ci_status(r#"[{"status":"in_progress","conclusion":""}]"#).unwrap(), CiStatus::None);
        assert_eq!(parse_ci_status("[]").unwrap(), CiStatus::None);
    }

    #[test]
    fn pr_count_and_root_listing() {
        assert_eq!(parse_pr_count(r#"[{"number":1},{"number":7}]"#).unwrap(), 2);
        assert_eq!(parse_pr_count("").unwrap(), 0);

        let files = parse_root_listing(r#"[{"name":"README.md"},{"name":"LICENSE-MIT"},{"name":"AGENTS.md"}]"#).unwrap();
        assert!(files.readme && files.license && files.agents_md);
        assert!(!files.claude_md && !files.project_json);
    }

    #[test]
    fn auth_failures_are_recognised() {
        assert!(is_auth_failure("To get started with GitHub CLI, please run:  gh auth login"));
        assert!(is_auth_failure("You are not authenticated"));
        assert!(!is_auth_failure("HTTP 404: Not Found"));
    }

    #[tokio::test]
    async fn missing_binary() {
        let client = GhClient::with_program("repowatch-no-such-gh", 2);
        let err = client.fetch("me").await.unwrap_err();
        assert_eq!(err.kind(), "tool-not-found");
        assert_eq!(client.probe().await, ToolStatus::default());
    }
}
