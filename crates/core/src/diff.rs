//! Change detection between two consecutive snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CiStatus, Entity};

/// A minimal, typed description of one semantic change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeltaEvent {
    /// CI status moved in any direction.
    CiChanged {
        /// Repository name.
        name: String,
        /// Status in the previous snapshot.
        old: CiStatus,
        /// Status in the new snapshot.
        new: CiStatus,
    },
    /// A release not yet acknowledged by the cursor.
    ReleasePublished {
        /// Repository name.
        name: String,
        /// Release tag.
        tag: String,
        /// Publication time, when known.
        published_at: Option<DateTime<Utc>>,
    },
    /// Open item count went up. Decreases are never reported.
    ItemCountIncreased {
        /// Repository name.
        name: String,
        /// Count in the previous snapshot.
        old: u32,
        /// Count in the new snapshot.
        new: u32,
    },
}

impl DeltaEvent {
    /// Repository the event is about.
    pub fn name(&self) -> &str {
        match self {
            DeltaEvent::CiChanged { name, .. }
            | DeltaEvent::ReleasePublished { name, .. }
            | DeltaEvent::ItemCountIncreased { name, .. } => name,
        }
    }
}

/// Derive delta events for every record present in both snapshots.
///
/// Records only in `next` (first sight) produce nothing. Events follow the
/// order of `next`; per record the order is CI, release, item count.
pub fn diff(previous: &[Entity], next: &[Entity]) -> Vec<DeltaEvent> {
    let before: HashMap<&str, &Entity> = previous.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut events = Vec::new();
    for new in next {
        let Some(old) = before.get(new.name.as_str()) else {
            continue;
        };

        if old.ci_status != new.ci_status {
            events.push(DeltaEvent::CiChanged {
                name: new.name.clone(),
                old: old.ci_status,
                new: new.ci_status,
            });
        }

        if new.new_release {
            if let Some(release) = &new.latest_release {
                events.push(DeltaEvent::ReleasePublished {
                    name: new.name.clone(),
                    tag: release.tag.clone(),
                    published_at: release.published_at,
                });
            }
        }

        if new.open_items > old.open_items {
            events.push(DeltaEvent::ItemCountIncreased {
                name: new.name.clone(),
                old: old.open_items,
                new: new.open_items,
            });
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Release;

    fn repo(name: &str, ci: CiStatus, items: u32) -> Entity {
        Entity {
            name: name.into(),
            ci_status: ci,
            open_items: items,
            ..Default::default()
        }
    }

    #[test]
    fn identical_snapshots_are_quiet() {
        let snap = vec![repo("r", CiStatus::Passing, 2)];
        assert!(diff(&snap, &snap).is_empty());
    }

    #[test]
    fn ci_change_in_both_directions() {
        let passing = vec![repo("r", CiStatus::Passing, 0)];
        let failing = vec![repo("r", CiStatus::Failing, 0)];
        assert_eq!(
            diff(&passing, &failing),
            vec![DeltaEvent::CiChanged { name: "r".into(), old: CiStatus::Passing, new: CiStatus::Failing }]
        );
        assert_eq!(
            diff(&failing, &passing),
            vec![DeltaEvent::CiChanged { name: "r".into(), old: CiStatus::Failing, new: CiStatus::Passing }]
        );
    }

    #[test]
    fn release_fires_only_when_flagged() {
        let mut old = repo("r", CiStatus::None, 0);
        old.latest_release = Some(Release { tag: "v1".into(), published_at: None });
        let mut unchanged = old.clone();
        unchanged.new_release = false;
        assert!(diff(&[old.clone()], &[unchanged]).is_empty());

        let mut fresh = old.clone();
        fresh.latest_release = Some(Release { tag: "v2".into(), published_at: None });
        fresh.new_release = true;
        let events = diff(&[old], &[fresh]);
        assert_eq!(
            events,
            vec![DeltaEvent::ReleasePublished { name: "r".into(), tag: "v2".into(), published_at: None }]
        );
    }

    #[test]
    fn item_count_is_one_directional() {
        let two = vec![repo("r", CiStatus::None, 2)];
        let five = vec![repo("r", CiStatus::None, 5)];
        assert_eq!(
            diff(&two, &five),
            vec![DeltaEvent::ItemCountIncreased { name: "r".into(), old: 2, new: 5 }]
        );
        assert!(diff(&five, &two).is_empty());
        assert!(diff(&two, &two).is_empty());
    }

    #[test]
    fn first_sight_emits_nothing() {
        let mut fresh = repo("new", CiStatus::Failing, 9);
        fresh.latest_release = Some(Release { tag: "v1".into(), published_at: None });
        fresh.new_release = true;
        assert!(diff(&[], &[fresh]).is_empty());
    }

    #[test]
    fn per_record_order_is_ci_release_items() {
        let old = repo("r", CiStatus::None, 0);
        let mut new = repo("r", CiStatus::Passing, 1);
        new.latest_release = Some(Release { tag: "v1".into(), published_at: None });
        new.new_release = true;
        let kinds: Vec<_> = diff(&[old], &[new])
            .into_iter()
            .map(|e| match e {
                DeltaEvent::CiChanged { .. } => "ci",
                DeltaEvent::ReleasePublished { .. } => "release",
                DeltaEvent::ItemCountIncreased { .. } => "items",
            })
            .collect();
        assert_eq!(kinds, vec!["ci", "release", "items"]);
    }
}
