use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use repowatch_core::{CollectError, LocalView, RemoteView};

use super::{LocalSource, RemoteSource, ToolStatus};

/// Failure a mock collaborator reports on its next calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    ToolNotFound,
    NotAuthenticated,
    Command,
}

impl MockFailure {
    fn to_error(self, tool: &str) -> CollectError {
        match self {
            MockFailure::ToolNotFound => CollectError::ToolNotFound(tool.to_string()),
            MockFailure::NotAuthenticated => CollectError::NotAuthenticated {
                tool: tool.to_string(),
                detail: "run gh auth login".to_string(),
            },
            MockFailure::Command => CollectError::Command {
                command: format!("{tool} (mock)"),
                stderr: "mock failure".to_string(),
            },
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test double for [`LocalSource`] returning preset views.
#[derive(Default)]
pub struct MockLocal {
    repos: Mutex<BTreeMap<String, LocalView>>,
    failure: Mutex<Option<MockFailure>>,
    pub calls: AtomicUsize,
}

impl MockLocal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_repos(&self, repos: BTreeMap<String, LocalView>) {
        *lock(&self.repos) = repos;
    }

    pub fn insert(&self, name: &str, view: LocalView) {
        lock(&self.repos).insert(name.to_string(), view);
    }

    pub fn fail_with(&self, failure: Option<MockFailure>) {
        *lock(&self.failure) = failure;
    }
}

#[async_trait]
impl LocalSource for MockLocal {
    async fn scan(&self, _root: &Path) -> Result<BTreeMap<String, LocalView>, CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = *lock(&self.failure) {
            return Err(f.to_error("git"));
        }
        Ok(lock(&self.repos).clone())
    }
}

/// Test double for [`RemoteSource`]. Clones create `<dest>/.git`.
pub struct MockRemote {
    repos: Mutex<Vec<RemoteView>>,
    failure: Mutex<Option<MockFailure>>,
    clone_failure: Mutex<Option<MockFailure>>,
    status: Mutex<ToolStatus>,
    /// `(owner, name, dest)` of every clone request.
    pub clones: Mutex<Vec<(String, String, PathBuf)>>,
    pub calls: AtomicUsize,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self {
            repos: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            clone_failure: Mutex::new(None),
            status: Mutex::new(ToolStatus {
                available: true,
                authenticated: true,
            }),
            clones: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_repos(&self, repos: Vec<RemoteView>) {
        *lock(&self.repos) = repos;
    }

    /// Replace the view named `view.name`, or append it.
    pub fn upsert(&self, view: RemoteView) {
        let mut repos = lock(&self.repos);
        match repos.iter_mut().find(|r| r.name == view.name) {
            Some(slot) => *slot = view,
            None => repos.push(view),
        }
    }

    pub fn fail_with(&self, failure: Option<MockFailure>) {
        *lock(&self.failure) = failure;
    }

    pub fn fail_clones_with(&self, failure: Option<MockFailure>) {
        *lock(&self.clone_failure) = failure;
    }

    pub fn set_status(&self, status: ToolStatus) {
        *lock(&self.status) = status;
    }

    pub fn cloned(&self) -> Vec<(String, String, PathBuf)> {
        lock(&self.clones).clone()
    }
}

#[async_trait]
impl RemoteSource for MockRemote {
    async fn fetch(&self, owner: &str) -> Result<Vec<RemoteView>, CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(f) = *lock(&self.failure) {
            return Err(f.to_error("gh"));
        }
        let mut repos = lock(&self.repos).clone();
        for r in &mut repos {
            if r.owner.is_empty() {
                r.owner = owner.to_string();
            }
        }
        Ok(repos)
    }

    async fn probe(&self) -> ToolStatus {
        *lock(&self.status)
    }

    async fn clone_repo(&self, owner: &str, name: &str, dest: &Path) -> Result<(), CollectError> {
        lock(&self.clones).push((owner.to_string(), name.to_string(), dest.to_path_buf()));
        let failure = *lock(&self.clone_failure);
        if let Some(f) = failure {
            return Err(f.to_error("gh"));
        }
        tokio::fs::create_dir_all(dest.join(".git")).await?;
        Ok(())
    }
}
