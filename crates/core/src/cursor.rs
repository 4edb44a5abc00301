//! Per-repository "last seen" markers that make release detection idempotent
//! across cycles and restarts.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::Entity;

/// Last release tag acknowledged for one repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseCursor {
    /// Tag of the newest release already reported.
    pub last_seen_release_tag: String,
}

/// Repository name → cursor. Ordered so the persisted file is stable.
pub type CursorMap = BTreeMap<String, ReleaseCursor>;

/// Record the latest release of every record that has one. Applying the same
/// snapshot twice is a no-op. Returns whether anything changed.
pub fn advance_cursors(cursors: &mut CursorMap, snapshot: &[Entity]) -> bool {
    let mut changed = false;
    for entity in snapshot {
        let Some(release) = &entity.latest_release else {
            continue;
        };
        let seen = cursors.get(&entity.name).map(|c| c.last_seen_release_tag.as_str());
        if seen != Some(release.tag.as_str()) {
            cursors.insert(
                entity.name.clone(),
                ReleaseCursor {
                    last_seen_release_tag: release.tag.clone(),
                },
            );
            changed = true;
        }
    }
    changed
}

/// Drop cursors for names no longer present in `snapshot`. Returns how many
/// were removed.
pub fn prune_cursors(cursors: &mut CursorMap, snapshot: &[Entity]) -> usize {
    let live: HashSet<&str> = snapshot.iter().map(|e| e.name.as_str()).collect();
    let before = cursors.len();
    cursors.retain(|name, _| live.contains(name.as_str()));
    before - cursors.len()
}
