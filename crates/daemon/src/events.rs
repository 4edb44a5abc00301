//! Everything the daemon publishes through the hub.

use chrono::{DateTime, Utc};
use repowatch_core::{CiStatus, DeltaEvent, Entity};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::hub::SubscriberId;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloneState {
    Cloning,
    Done,
    Failed,
}

/// A published event. The SSE event name comes from [`Event::name`] and the
/// SSE data is the JSON of the variant's payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Event {
    Connected { client_id: SubscriberId },
    SnapshotUpdated(Vec<Entity>),
    CiChanged {
        name: String,
        old: CiStatus,
        new: CiStatus,
    },
    ReleasePublished {
        name: String,
        tag: String,
        published_at: Option<DateTime<Utc>>,
    },
    ItemCountIncreased { name: String, old: u32, new: u32 },
    CloneProgress {
        repo: String,
        state: CloneState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ConfigUpdated(Config),
    Heartbeat { at: DateTime<Utc> },
    Error { kind: String, message: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::SnapshotUpdated(_) => "snapshot-updated",
            Event::CiChanged { .. } => "ci-changed",
            Event::ReleasePublished { .. } => "release-published",
            Event::ItemCountIncreased { .. } => "item-count-increased",
            Event::CloneProgress { .. } => "clone-progress",
            Event::ConfigUpdated(_) => "config-updated",
            Event::Heartbeat { .. } => "heartbeat",
            Event::Error { .. } => "error",
        }
    }

    /// Payload as JSON, without the event name.
    pub fn data(&self) -> serde_json::Result<Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<DeltaEvent> for Event {
    fn from(delta: DeltaEvent) -> Self {
        match delta {
            DeltaEvent::CiChanged { name, old, new } => Event::CiChanged { name, old, new },
            DeltaEvent::ReleasePublished {
                name,
                tag,
                published_at,
            } => Event::ReleasePublished {
                name,
                tag,
                published_at,
            },
            DeltaEvent::ItemCountIncreased { name, old, new } => Event::ItemCountIncreased { name, old, new },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_are_kebab_case() {
        let e: Event = DeltaEvent::ItemCountIncreased { name: "r".into(), old: 1, new: 2 }.into();
        assert_eq!(e.name(), "item-count-increased");
        assert_eq!(Event::error("tool-not-found", "gh").name(), "error");
        assert_eq!(Event::SnapshotUpdated(vec![]).name(), "snapshot-updated");
    }

    #[test]
    fn data_is_the_bare_payload() {
        let e = Event::from(DeltaEvent::CiChanged {
            name: "r".into(),
            old: CiStatus::Passing,
            new: CiStatus::Failing,
        });
        assert_eq!(e.data().unwrap(), json!({"name": "r", "old": "passing", "new": "failing"}));

        let e = Event::error("not-authenticated", "run gh auth login");
        assert_eq!(
            e.data().unwrap(),
            json!({"kind": "not-authenticated", "message": "run gh auth login"})
        );
    }

    #[test]
    fn snapshot_data_is_a_list() {
        let e = Event::SnapshotUpdated(vec![Entity { name: "a".into(), ..Default::default() }]);
        let data = e.data().unwrap();
        assert_eq!(data.as_array().map(Vec::len), Some(1));
        assert_eq!(data[0]["name"], "a");
    }

    #[test]
    fn payload_fields_are_snake_case() {
        let id = uuid::Uuid::nil();
        let e = Event::Connected { client_id: id };
        assert_eq!(e.data().unwrap(), json!({"client_id": id.to_string()}));

        let e = Event::ReleasePublished { name: "r".into(), tag: "v1".into(), published_at: None };
        assert_eq!(e.data().unwrap(), json!({"name": "r", "tag": "v1", "published_at": null}));
    }

    #[test]
    fn clone_progress_omits_missing_error() {
        let e = Event::CloneProgress { repo: "x".into(), state: CloneState::Done, error: None };
        assert_eq!(e.data().unwrap(), json!({"repo": "x", "state": "done"}));
    }
}
