//! Stable payload shapes carried inside event envelopes.
//!
//! These are the `data` bodies clients receive. Actor fields are always
//! optional: payload construction must tolerate a failed lookup of
//! denormalized display info (emit the event with the field omitted
//! rather than dropping it).

use serde::{Deserialize, Serialize};

/// Denormalized display info for the user behind an action
/// (creator, author, assignee).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActorInfo {
    /// Identity of the acting user.
    pub user_id: String,
    /// Email, always available from the identity record.
    pub email: String,
    /// Display first name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Display last name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Payload for `task.created` and `task.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Task identifier.
    pub id: String,
    /// Organization the task belongs to.
    pub organization_id: String,
    /// Task title.
    pub title: String,
    /// Task body, absent for title-only tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow status (e.g., "open", "in_progress", "done").
    pub status: String,
    /// Priority label, absent when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Current assignee, absent when unassigned or the lookup failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<ActorInfo>,
    /// User who performed the mutation, absent when the lookup failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorInfo>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last mutation timestamp (ISO 8601).
    pub updated_at: String,
}

/// Payload for `comment.created`, `comment.updated`, `comment.deleted`
/// and `comment.mentioned`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentPayload {
    /// Comment identifier.
    pub id: String,
    /// Task the comment is attached to.
    pub task_id: String,
    /// Organization the task belongs to.
    pub organization_id: String,
    /// Comment text.
    pub body: String,
    /// Comment author, absent when the lookup failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<ActorInfo>,
    /// Users @-mentioned in the body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_user_ids: Vec<String>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
    /// Last mutation timestamp (ISO 8601).
    pub updated_at: String,
}

/// Payload for `user.created`, `user.updated` and `user.deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPayload {
    /// User identifier.
    pub id: String,
    /// Account email.
    pub email: String,
    /// Display first name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Display last name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Account status (e.g., "active", "suspended", "deleted").
    pub status: String,
    /// Account type (e.g., "member", "service").
    pub user_type: String,
    /// Organizations the user belongs to at the time of the event.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organization_ids: Vec<String>,
}

/// Payload for `notification.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification identifier.
    pub id: String,
    /// User the notification is addressed to.
    pub user_id: String,
    /// Notification kind (e.g., "task_assigned", "comment_mention").
    pub kind: String,
    /// Short display title.
    pub title: String,
    /// Longer display body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Domain event that produced this notification, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_event_type: Option<String>,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_payload_omits_absent_actor_fields() {
        let payload = TaskPayload {
            id: "t-1".to_string(),
            organization_id: "org-1".to_string(),
            title: "Ship the gateway".to_string(),
            description: None,
            status: "open".to_string(),
            priority: None,
            assignee: None,
            actor: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        };

        let wire = serde_json::to_string(&payload).unwrap();
        assert!(!wire.contains("assignee"));
        assert!(!wire.contains("actor"));
        assert!(!wire.contains("priority"));
    }

    #[test]
    fn comment_payload_mentions_default_to_empty() {
        let wire = r#"{
            "id": "c-1",
            "task_id": "t-1",
            "organization_id": "org-1",
            "body": "looks good",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }"#;
        let payload: CommentPayload = serde_json::from_str(wire).unwrap();
        assert!(payload.mentioned_user_ids.is_empty());
        assert!(payload.author.is_none());
    }
}
