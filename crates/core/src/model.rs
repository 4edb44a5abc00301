//! The canonical repository record and its lifecycle rule.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::age_in_days;

/// Repository visibility on the hosting provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone can see it.
    Public,
    /// Restricted. Also the fallback for anything unrecognised.
    #[default]
    Private,
}

impl Visibility {
    /// Parse a provider visibility string (`PUBLIC`, `public`, ...).
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("public") {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// Outcome of the most recent CI run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    /// No runs, or the latest run has no definite conclusion.
    #[default]
    None,
    /// Latest run succeeded.
    Passing,
    /// Latest run failed.
    Failing,
}

impl CiStatus {
    /// True for both passing and failing: any CI run counts as activity.
    pub fn is_active(self) -> bool {
        !matches!(self, CiStatus::None)
    }
}

/// Derived activity classification of a repository.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Recent pushes, open items or CI activity.
    Ongoing,
    /// Stable and maintained. Never produced by [`classify`]; kept so that
    /// records written by other tools still decode.
    Maintenance,
    /// Quiet for at least the stale threshold, or no push information at all.
    #[default]
    Stale,
    /// Quiet for at least the abandoned threshold.
    Abandoned,
}

impl Lifecycle {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Ongoing => "ongoing",
            Lifecycle::Maintenance => "maintenance",
            Lifecycle::Stale => "stale",
            Lifecycle::Abandoned => "abandoned",
        }
    }
}

/// Latest tagged release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    /// Tag name, e.g. `v1.2.0`.
    pub tag: String,
    /// When the release was published, if the provider reported it.
    pub published_at: Option<DateTime<Utc>>,
}

/// Named documentation / metadata checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Completeness {
    /// Non-empty description.
    pub has_description: bool,
    /// A `README*` file at the root.
    pub has_readme: bool,
    /// A `LICENSE*` file at the root.
    pub has_license: bool,
    /// At least one topic.
    pub has_topics: bool,
    /// Pages site enabled.
    pub has_pages: bool,
    /// Non-empty homepage URL.
    pub has_homepage: bool,
    /// `.project.json` at the root.
    pub has_project_json: bool,
    /// `CLAUDE.md` at the root.
    pub has_claude_md: bool,
    /// `AGENTS.md` at the root.
    pub has_agents_md: bool,
}

/// Day thresholds used by [`classify`]. `stale_days < abandoned_days`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleThresholds {
    /// Age in days from which a quiet repository is stale.
    pub stale_days: i64,
    /// Age in days from which a quiet repository is abandoned.
    pub abandoned_days: i64,
}

impl Default for LifecycleThresholds {
    fn default() -> Self {
        Self {
            stale_days: 30,
            abandoned_days: 90,
        }
    }
}

/// The canonical merged record of one monitored repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Entity {
    /// Repository name, the merge key.
    pub name: String,
    /// `owner/name` when a remote counterpart exists, else the bare name.
    pub full_name: String,
    /// Remote visibility; `private` for local-only records.
    pub visibility: Visibility,

    /// A local clone exists under the scan root.
    pub cloned: bool,
    /// Clone location, synthesized under the scan root when not cloned.
    pub local_path: PathBuf,

    /// Checked-out branch, or the remote default branch when not cloned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Uncommitted changes in the working tree.
    pub dirty: bool,
    /// Commit time of `HEAD` in the local clone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_last_commit: Option<DateTime<Utc>>,

    /// A remote counterpart was seen when this record was merged.
    pub on_remote: bool,
    /// Remote description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remote homepage URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage_url: Option<String>,
    /// Primary language reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Remote topics.
    pub topics: Vec<String>,
    /// Last push to the remote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<DateTime<Utc>>,
    /// Open pull requests.
    pub open_items: u32,
    /// Outcome of the latest CI run.
    pub ci_status: CiStatus,
    /// Latest tagged release.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_release: Option<Release>,
    /// `latest_release` differs from the last acknowledged tag.
    pub new_release: bool,

    /// Documentation and metadata checks.
    pub completeness: Completeness,

    /// Derived last, see [`classify`].
    pub lifecycle: Lifecycle,
}

impl Entity {
    /// Classify this record from its activity fields.
    pub fn compute_lifecycle(&self, thresholds: LifecycleThresholds, now: DateTime<Utc>) -> Lifecycle {
        classify(self.pushed_at, self.open_items, self.ci_status, thresholds, now)
    }
}

/// Lifecycle rule. First match wins:
///
/// 1. pushed less than `stale_days` ago → ongoing
/// 2. open items → ongoing
/// 3. any CI status other than none → ongoing
/// 4. pushed in `[stale_days, abandoned_days)` → stale
/// 5. pushed `abandoned_days` or more ago → abandoned
/// 6. no push timestamp → stale
///
/// Ages are whole days, and a threshold belongs to the older bucket: with a
/// 30 day stale threshold, 29 days is ongoing and 30 days is stale.
pub fn classify(
    pushed_at: Option<DateTime<Utc>>,
    open_items: u32,
    ci: CiStatus,
    thresholds: LifecycleThresholds,
    now: DateTime<Utc>,
) -> Lifecycle {
    let age = pushed_at.map(|p| age_in_days(p, now));

    if matches!(age, Some(a) if a < thresholds.stale_days) {
        return Lifecycle::Ongoing;
    }
    if open_items > 0 {
        return Lifecycle::Ongoing;
    }
    if ci.is_active() {
        return Lifecycle::Ongoing;
    }

    match age {
        Some(a) if a >= thresholds.abandoned_days => Lifecycle::Abandoned,
        Some(_) => Lifecycle::Stale,
        None => Lifecycle::Stale,
    }
}
