//! External collaborators that produce partial views.
//!
//! `git` and `gh` are driven as child processes. The traits are the seam the
//! scheduler and HTTP layer depend on, so tests swap in [`mock`].

pub mod git;
pub mod github;
pub mod mock;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use repowatch_core::{CollectError, LocalView, RemoteView};
use serde::Serialize;

pub use git::GitScanner;
pub use github::GhClient;

/// Enumerates local clones under a root directory.
#[async_trait]
pub trait LocalSource: Send + Sync {
    /// Local views keyed by repository name. A missing root yields an empty
    /// map, not an error.
    async fn scan(&self, root: &Path) -> Result<BTreeMap<String, LocalView>, CollectError>;
}

/// Queries the hosting provider.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Remote views for every repository owned by `owner`.
    async fn fetch(&self, owner: &str) -> Result<Vec<RemoteView>, CollectError>;

    /// Whether the tool is installed and logged in.
    async fn probe(&self) -> ToolStatus;

    async fn clone_repo(&self, owner: &str, name: &str, dest: &Path) -> Result<(), CollectError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ToolStatus {
    pub available: bool,
    pub authenticated: bool,
}
