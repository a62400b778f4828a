//! Lifecycle notifications sent from the coordinator to chat panels.

use serde::{Deserialize, Serialize};

use crate::agent_api::InstanceId;

/// What happened to a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum NotificationKind {
    /// First payload of the response arrived
    #[serde(rename = "streamStart")]
    Started,
    /// Next piece of model text, in arrival order
    #[serde(rename = "streamChunk")]
    Delta { chunk: String },
    /// Upstream closed the stream normally
    #[serde(rename = "streamEnd")]
    Ended,
    /// Generation failed; `error` is shown to the user as-is
    #[serde(rename = "streamError")]
    Error { error: String },
    /// Stopped on request
    #[serde(rename = "streamAbort")]
    Aborted,
}

impl NotificationKind {
    /// Ended, errored, or aborted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationKind::Ended | NotificationKind::Error { .. } | NotificationKind::Aborted
        )
    }
}

/// A notification addressed to one panel instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "instanceId")]
    pub instance_id: InstanceId,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(instance_id: InstanceId, kind: NotificationKind) -> Self {
        Self { instance_id, kind }
    }

    pub fn started(instance_id: InstanceId) -> Self {
        Self::new(instance_id, NotificationKind::Started)
    }

    pub fn delta(instance_id: InstanceId, chunk: impl Into<String>) -> Self {
        Self::new(
            instance_id,
            NotificationKind::Delta {
                chunk: chunk.into(),
            },
        )
    }

    pub fn ended(instance_id: InstanceId) -> Self {
        Self::new(instance_id, NotificationKind::Ended)
    }

    pub fn error(instance_id: InstanceId, error: impl Into<String>) -> Self {
        Self::new(
            instance_id,
            NotificationKind::Error {
                error: error.into(),
            },
        )
    }

    pub fn aborted(instance_id: InstanceId) -> Self {
        Self::new(instance_id, NotificationKind::Aborted)
    }

    /// Whether this notification belongs to `instance_id`.
    pub fn is_for(&self, instance_id: &InstanceId) -> bool {
        &self.instance_id == instance_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_shape() {
        let n = Notification::delta(InstanceId::from("p1"), "Hel");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "streamChunk", "instanceId": "p1", "chunk": "Hel"})
        );

        let n = Notification::aborted(InstanceId::from("p1"));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "streamAbort", "instanceId": "p1"})
        );
    }

    #[test]
    fn test_notification_parses_from_wire() {
        let n: Notification = serde_json::from_str(
            r#"{"action":"streamError","instanceId":"p2","error":"API Key not found. Please save it first."}"#,
        )
        .unwrap();
        assert!(n.is_for(&InstanceId::from("p2")));
        assert!(n.kind.is_terminal());
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(!NotificationKind::Started.is_terminal());
        assert!(!NotificationKind::Delta { chunk: "x".into() }.is_terminal());
        assert!(NotificationKind::Ended.is_terminal());
        assert!(NotificationKind::Aborted.is_terminal());
    }
}
