//! WebSocket protocol message types.
//!
//! Defines the JSON message format for client-server communication.

use events::EventEnvelope;
use serde::{Deserialize, Serialize};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Message sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to an organization's event channel. Membership is
    /// re-validated server-side before the subscription takes effect.
    Subscribe {
        /// Organization to receive broadcasts for.
        organization_id: String,
    },
    /// Unsubscribe from an organization's event channel.
    Unsubscribe {
        /// Organization to stop receiving broadcasts for.
        organization_id: String,
    },
    /// Ping message for keepalive.
    Ping,
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Control message sent from server to client.
///
/// Domain events are delivered as [`EventMessage`] instead: their `type`
/// field carries the dynamic event name (`task.created`, ...).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake acknowledgment: the connection is registered and
    /// subscribed, events will now flow.
    #[serde(rename = "connection.established")]
    ConnectionEstablished,
    /// Confirmation of subscription.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// Organization successfully subscribed to.
        organization_id: String,
    },
    /// Confirmation of unsubscription.
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        /// Organization successfully unsubscribed from.
        organization_id: String,
    },
    /// Pong response to ping.
    #[serde(rename = "pong")]
    Pong,
    /// Error message.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
        /// Error code.
        code: String,
    },
}

/// Client-facing shape of a delivered domain event: the envelope with its
/// routing fields stripped (`event_type` → `type`, `data` passed through).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Wire name of the event, e.g. `task.created`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload, unchanged from the publisher.
    pub data: serde_json::Value,
}

impl EventMessage {
    /// Unwrap a broker envelope into the client-facing shape.
    pub fn from_envelope(envelope: &EventEnvelope) -> Self {
        Self {
            event_type: envelope.event_type.clone(),
            data: envelope.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::EventType;
    use serde_json::json;

    #[test]
    fn connection_established_wire_shape() {
        let wire = serde_json::to_string(&ServerMessage::ConnectionEstablished).unwrap();
        assert_eq!(wire, r#"{"type":"connection.established"}"#);
    }

    #[test]
    fn subscribe_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","organization_id":"org-1"}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { organization_id } => assert_eq!(organization_id, "org-1"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"shout","text":"hi"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn event_message_unwraps_envelope() {
        let envelope = EventEnvelope::for_organization(
            EventType::TaskCreated,
            "org-1",
            json!({"id": "t-1", "title": "Ship it"}),
        );
        let msg = EventMessage::from_envelope(&envelope);
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "task.created");
        assert_eq!(wire["data"]["id"], "t-1");
        assert!(wire.get("organization_id").is_none());
    }
}
