//! Partial views produced by the two external collaborators, and the typed
//! error they report.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CiStatus, Entity, Release, Visibility};

/// Locally observed facts about one cloned repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalView {
    /// Working tree location.
    pub path: PathBuf,
    /// Checked-out branch; `None` when detached or unknown.
    pub branch: Option<String>,
    /// Uncommitted changes present.
    pub dirty: bool,
    /// Commit time of `HEAD`.
    pub last_commit: Option<DateTime<Utc>>,
}

impl LocalView {
    /// Rebuild the local partial view from a merged record. `None` when the
    /// record was not cloned.
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        if !entity.cloned {
            return None;
        }
        Some(Self {
            path: entity.local_path.clone(),
            branch: entity.branch.clone(),
            dirty: entity.dirty,
            last_commit: entity.local_last_commit,
        })
    }
}

/// Presence of well-known files at the repository root.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePresence {
    /// Any `README*`, case-insensitive.
    pub readme: bool,
    /// Any `LICENSE*`, case-insensitive.
    pub license: bool,
    /// Exactly `CLAUDE.md`.
    pub claude_md: bool,
    /// Exactly `AGENTS.md`.
    pub agents_md: bool,
    /// Exactly `.project.json`.
    pub project_json: bool,
}

impl FilePresence {
    /// Classify a root directory listing.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::default();
        for name in names {
            let upper = name.to_ascii_uppercase();
            out.readme |= upper.starts_with("README");
            out.license |= upper.starts_with("LICENSE");
            out.claude_md |= name == "CLAUDE.md";
            out.agents_md |= name == "AGENTS.md";
            out.project_json |= name == ".project.json";
        }
        out
    }
}

/// Remotely observed facts about one repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteView {
    /// Repository name, the merge key. Views without one are skipped.
    pub name: String,
    /// Owning account; empty when unknown.
    pub owner: String,
    /// Repository description.
    pub description: Option<String>,
    /// Provider visibility.
    pub visibility: Visibility,
    /// Homepage URL.
    pub homepage_url: Option<String>,
    /// Primary language.
    pub primary_language: Option<String>,
    /// Topics.
    pub topics: Vec<String>,
    /// Last push.
    pub pushed_at: Option<DateTime<Utc>>,
    /// Open pull requests; zero when the count could not be fetched.
    pub open_items: u32,
    /// Latest CI outcome; `none` when it could not be fetched.
    pub ci_status: CiStatus,
    /// Latest tagged release.
    pub latest_release: Option<Release>,
    /// Default branch name.
    pub default_branch: Option<String>,
    /// Pages site enabled.
    pub has_pages: bool,
    /// Well-known files at the root.
    pub files: FilePresence,
}

impl RemoteView {
    /// Rebuild the remote partial view from a merged record. `None` when the
    /// record had no remote counterpart.
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        if !entity.on_remote {
            return None;
        }
        let owner = entity
            .full_name
            .split_once('/')
            .map(|(owner, _)| owner.to_string())
            .unwrap_or_default();
        let c = &entity.completeness;
        Some(Self {
            name: entity.name.clone(),
            owner,
            description: entity.description.clone(),
            visibility: entity.visibility,
            homepage_url: entity.homepage_url.clone(),
            primary_language: entity.language.clone(),
            topics: entity.topics.clone(),
            pushed_at: entity.pushed_at,
            open_items: entity.open_items,
            ci_status: entity.ci_status,
            latest_release: entity.latest_release.clone(),
            default_branch: if entity.cloned { None } else { entity.branch.clone() },
            has_pages: c.has_pages,
            files: FilePresence {
                readme: c.has_readme,
                license: c.has_license,
                claude_md: c.has_claude_md,
                agents_md: c.has_agents_md,
                project_json: c.has_project_json,
            },
        })
    }
}

/// Failure reported by a collaborator.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The named program is not installed.
    #[error("{0} not found on PATH")]
    ToolNotFound(String),
    /// The tool runs but has no usable credentials.
    #[error("{tool} is not authenticated: {detail}")]
    NotAuthenticated {
        /// Program name.
        tool: String,
        /// Tool output explaining the failure.
        detail: String,
    },
    /// The command ran and exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    Command {
        /// Command line as run.
        command: String,
        /// Trimmed stderr.
        stderr: String,
    },
    /// The command succeeded but its output did not decode.
    #[error("could not parse output of `{command}`: {source}")]
    Parse {
        /// Command line as run.
        command: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Spawning or filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectError {
    /// Machine-readable kind carried by `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::ToolNotFound(_) => "tool-not-found",
            CollectError::NotAuthenticated { .. } => "not-authenticated",
            CollectError::Command { .. } => "fetch-failed",
            CollectError::Parse { .. } => "parse-failed",
            CollectError::Io(_) => "io-failed",
        }
    }
}
