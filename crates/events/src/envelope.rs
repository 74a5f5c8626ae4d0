//! Domain event envelope: the broker wire format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The event types published by the backend services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    CommentCreated,
    CommentUpdated,
    CommentDeleted,
    CommentMentioned,
    UserCreated,
    UserUpdated,
    UserDeleted,
    NotificationCreated,
}

impl EventType {
    /// The wire name of the event, e.g. `task.created`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "task.created",
            EventType::TaskUpdated => "task.updated",
            EventType::CommentCreated => "comment.created",
            EventType::CommentUpdated => "comment.updated",
            EventType::CommentDeleted => "comment.deleted",
            EventType::CommentMentioned => "comment.mentioned",
            EventType::UserCreated => "user.created",
            EventType::UserUpdated => "user.updated",
            EventType::UserDeleted => "user.deleted",
            EventType::NotificationCreated => "notification.created",
        }
    }

    /// The category segment before the first `.`, used to pick the stream.
    pub fn category(&self) -> &'static str {
        match self {
            EventType::TaskCreated | EventType::TaskUpdated => "task",
            EventType::CommentCreated
            | EventType::CommentUpdated
            | EventType::CommentDeleted
            | EventType::CommentMentioned => "comment",
            EventType::UserCreated | EventType::UserUpdated | EventType::UserDeleted => "user",
            EventType::NotificationCreated => "notification",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker wire record describing an event's routing target and payload.
///
/// Exactly one of `organization_id` / `user_id` is set by the publishers:
/// an organization id means "broadcast to every connection subscribed to
/// that organization", a user id means "deliver to every connection owned
/// by that user". An envelope with neither is malformed and is dropped by
/// the consumer. If a foreign publisher ever sets both, the consumer
/// delivers to both audiences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Broadcast target: organization whose subscribers receive the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Direct target: user whose connections receive the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Wire name of the event, e.g. `task.created`.
    pub event_type: String,
    /// Payload passed through to clients unchanged.
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Envelope routed to an organization's subscribers.
    pub fn for_organization(
        event_type: EventType,
        organization_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            user_id: None,
            event_type: event_type.as_str().to_string(),
            data,
        }
    }

    /// Envelope routed directly to one user's connections.
    pub fn for_user(
        event_type: EventType,
        user_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            organization_id: None,
            user_id: Some(user_id.into()),
            event_type: event_type.as_str().to_string(),
            data,
        }
    }

    /// The category segment of the event type (`task.created` → `task`).
    pub fn category(&self) -> &str {
        self.event_type
            .split_once('.')
            .map(|(category, _)| category)
            .unwrap_or(&self.event_type)
    }

    /// Broker routing key: `{category}.{organization_id}` for broadcast
    /// envelopes, `{category}.{user_id}` for user-routed ones.
    ///
    /// Returns `None` when the envelope has no routing target; such an
    /// envelope must not be published.
    pub fn subject(&self) -> Option<String> {
        let target = self.organization_id.as_deref().or(self.user_id.as_deref())?;
        Some(format!("{}.{}", self.category(), target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn organization_envelope_subject() {
        let envelope =
            EventEnvelope::for_organization(EventType::TaskCreated, "org-1", json!({"id": "t-1"}));
        assert_eq!(envelope.subject().as_deref(), Some("task.org-1"));
        assert_eq!(envelope.category(), "task");
        assert!(envelope.user_id.is_none());
    }

    #[test]
    fn user_envelope_subject() {
        let envelope =
            EventEnvelope::for_user(EventType::NotificationCreated, "u-7", json!({"id": "n-1"}));
        assert_eq!(envelope.subject().as_deref(), Some("notification.u-7"));
        assert!(envelope.organization_id.is_none());
    }

    #[test]
    fn unrouted_envelope_has_no_subject() {
        let envelope = EventEnvelope {
            organization_id: None,
            user_id: None,
            event_type: "task.created".to_string(),
            data: json!({}),
        };
        assert_eq!(envelope.subject(), None);
    }

    #[test]
    fn unrouted_targets_omitted_on_wire() {
        let envelope =
            EventEnvelope::for_organization(EventType::CommentCreated, "org-2", json!({}));
        let wire = serde_json::to_string(&envelope).unwrap();
        assert!(wire.contains("\"organization_id\":\"org-2\""));
        assert!(!wire.contains("user_id"));
    }

    #[test]
    fn event_type_round_trip() {
        for event_type in [
            EventType::TaskCreated,
            EventType::CommentMentioned,
            EventType::UserDeleted,
            EventType::NotificationCreated,
        ] {
            let name = event_type.as_str();
            assert!(name.starts_with(event_type.category()));
        }
    }
}
