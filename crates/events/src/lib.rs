//! Domain event types and publishers.
//!
//! Every mutation in a backend service (task created, comment posted,
//! notification generated, user updated) becomes an [`EventEnvelope`]
//! published to NATS under a routing key derived from the target
//! organization or user. The gateway's queue consumers decode these
//! envelopes and fan them out to connected WebSocket clients.

pub mod envelope;
pub mod error;
pub mod payloads;
pub mod publisher;

pub use envelope::{EventEnvelope, EventType};
pub use error::{EventError, Result};
pub use payloads::{ActorInfo, CommentPayload, NotificationPayload, TaskPayload, UserPayload};
pub use publisher::{
    CommentEventPublisher, NotificationEventPublisher, TaskEventPublisher, UserEventPublisher,
};
