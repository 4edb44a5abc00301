//! Combines the local and remote partial views into canonical records.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cursor::CursorMap;
use crate::model::{Completeness, Entity, LifecycleThresholds};
use crate::source::{LocalView, RemoteView};

/// Inputs to [`merge`] that are not partial views.
#[derive(Debug, Clone)]
pub struct MergeContext {
    /// Root under which non-cloned repositories would be cloned.
    pub scan_root: PathBuf,
    /// Lifecycle thresholds in force for this merge.
    pub thresholds: LifecycleThresholds,
    /// Reference time for ages.
    pub now: DateTime<Utc>,
}

/// Merge local and remote partial views keyed by repository name.
///
/// Every name from either side appears exactly once in the output. Output
/// order is unspecified. A remote view without a name is skipped; duplicates
/// keep the first occurrence.
pub fn merge(
    local: &BTreeMap<String, LocalView>,
    remote: &[RemoteView],
    cursors: &CursorMap,
    ctx: &MergeContext,
) -> Vec<Entity> {
    let mut remote_by_name: HashMap<&str, &RemoteView> = HashMap::with_capacity(remote.len());
    for view in remote {
        if view.name.trim().is_empty() {
            warn!("skipping remote view without a name");
            continue;
        }
        if remote_by_name.contains_key(view.name.as_str()) {
            debug!(repo = %view.name, "duplicate remote view ignored");
            continue;
        }
        remote_by_name.insert(view.name.as_str(), view);
    }

    let names: BTreeSet<&str> = local
        .keys()
        .map(String::as_str)
        .chain(remote_by_name.keys().copied())
        .collect();

    names
        .into_iter()
        .map(|name| merge_one(name, local.get(name), remote_by_name.get(name).copied(), cursors, ctx))
        .collect()
}

fn merge_one(
    name: &str,
    local: Option<&LocalView>,
    remote: Option<&RemoteView>,
    cursors: &CursorMap,
    ctx: &MergeContext,
) -> Entity {
    let mut entity = Entity {
        name: name.to_string(),
        full_name: name.to_string(),
        ..Default::default()
    };

    if let Some(r) = remote {
        apply_remote(&mut entity, r, cursors);
    }

    match local {
        Some(l) => {
            entity.cloned = true;
            entity.local_path = l.path.clone();
            entity.branch = l.branch.clone();
            entity.dirty = l.dirty;
            entity.local_last_commit = l.last_commit;
        }
        None => {
            entity.cloned = false;
            entity.local_path = ctx.scan_root.join(name);
        }
    }

    entity.lifecycle = entity.compute_lifecycle(ctx.thresholds, ctx.now);
    entity
}

fn apply_remote(entity: &mut Entity, r: &RemoteView, cursors: &CursorMap) {
    entity.on_remote = true;
    if !r.owner.is_empty() {
        entity.full_name = format!("{}/{}", r.owner, r.name);
    }
    entity.visibility = r.visibility;
    entity.description = non_empty(&r.description);
    entity.homepage_url = non_empty(&r.homepage_url);
    entity.language = non_empty(&r.primary_language);
    entity.topics = r.topics.clone();
    entity.pushed_at = r.pushed_at;
    entity.open_items = r.open_items;
    entity.ci_status = r.ci_status;
    entity.branch = r.default_branch.clone();

    entity.completeness = Completeness {
        has_description: entity.description.is_some(),
        has_readme: r.files.readme,
        has_license: r.files.license,
        has_topics: !r.topics.is_empty(),
        has_pages: r.has_pages,
        has_homepage: entity.homepage_url.is_some(),
        has_project_json: r.files.project_json,
        has_claude_md: r.files.claude_md,
        has_agents_md: r.files.agents_md,
    };

    if let Some(release) = &r.latest_release {
        // No cursor yet means we have never acknowledged a release here.
        entity.new_release = match cursors.get(&r.name) {
            Some(cursor) => cursor.last_seen_release_tag != release.tag,
            None => true,
        };
        entity.latest_release = Some(release.clone());
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.trim().is_empty()).cloned()
}

/// Split a persisted snapshot back into the two partial views it was merged
/// from.
pub fn partial_views(snapshot: &[Entity]) -> (BTreeMap<String, LocalView>, Vec<RemoteView>) {
    let local = snapshot
        .iter()
        .filter_map(|e| LocalView::from_entity(e).map(|v| (e.name.clone(), v)))
        .collect();
    let remote = snapshot.iter().filter_map(RemoteView::from_entity).collect();
    (local, remote)
}
