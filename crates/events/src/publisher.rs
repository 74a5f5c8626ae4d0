//! Per-domain event publishers.
//!
//! Each backend service holds the publisher for its own domain and calls
//! an intent-named method after a successful mutation. Publish errors
//! surface to the caller; the usual caller policy is to log and continue
//! rather than fail the primary write because fan-out failed.

use crate::envelope::{EventEnvelope, EventType};
use crate::error::Result;
use crate::payloads::{CommentPayload, NotificationPayload, TaskPayload, UserPayload};
use nats_client::NatsClient;
use std::sync::Arc;
use tracing::debug;

async fn publish_envelope(nats: &NatsClient, envelope: &EventEnvelope) -> Result<()> {
    // Constructors always set a routing target; the unreachable fallback
    // keeps a foreign caller from publishing an undeliverable envelope.
    let subject = envelope
        .subject()
        .ok_or_else(|| anyhow::anyhow!("envelope has no routing target"))?;
    let payload = serde_json::to_vec(envelope)?;

    nats.publish(subject.clone(), payload.into()).await?;
    debug!(subject = %subject, event_type = %envelope.event_type, "Published event");
    Ok(())
}

/// Publisher for task mutations.
pub struct TaskEventPublisher {
    nats: Arc<NatsClient>,
}

impl TaskEventPublisher {
    pub fn new(nats: Arc<NatsClient>) -> Self {
        Self { nats }
    }

    /// Publish `task.created` to the task's organization.
    pub async fn created(&self, task: &TaskPayload) -> Result<()> {
        self.publish(EventType::TaskCreated, task).await
    }

    /// Publish `task.updated` to the task's organization.
    pub async fn updated(&self, task: &TaskPayload) -> Result<()> {
        self.publish(EventType::TaskUpdated, task).await
    }

    async fn publish(&self, event_type: EventType, task: &TaskPayload) -> Result<()> {
        let envelope = EventEnvelope::for_organization(
            event_type,
            task.organization_id.clone(),
            serde_json::to_value(task)?,
        );
        publish_envelope(&self.nats, &envelope).await
    }
}

/// Publisher for comment mutations.
pub struct CommentEventPublisher {
    nats: Arc<NatsClient>,
}

impl CommentEventPublisher {
    pub fn new(nats: Arc<NatsClient>) -> Self {
        Self { nats }
    }

    /// Publish `comment.created` to the comment's organization.
    pub async fn created(&self, comment: &CommentPayload) -> Result<()> {
        self.publish(EventType::CommentCreated, comment).await
    }

    /// Publish `comment.updated` to the comment's organization.
    pub async fn updated(&self, comment: &CommentPayload) -> Result<()> {
        self.publish(EventType::CommentUpdated, comment).await
    }

    /// Publish `comment.deleted` to the comment's organization.
    pub async fn deleted(&self, comment: &CommentPayload) -> Result<()> {
        self.publish(EventType::CommentDeleted, comment).await
    }

    /// Publish `comment.mentioned` directly to one mentioned user.
    ///
    /// Called once per mentioned user: a mention is a direct notification,
    /// not an organization broadcast.
    pub async fn mentioned(&self, comment: &CommentPayload, mentioned_user_id: &str) -> Result<()> {
        let envelope = EventEnvelope::for_user(
            EventType::CommentMentioned,
            mentioned_user_id,
            serde_json::to_value(comment)?,
        );
        publish_envelope(&self.nats, &envelope).await
    }

    async fn publish(&self, event_type: EventType, comment: &CommentPayload) -> Result<()> {
        let envelope = EventEnvelope::for_organization(
            event_type,
            comment.organization_id.clone(),
            serde_json::to_value(comment)?,
        );
        publish_envelope(&self.nats, &envelope).await
    }
}

/// Publisher for user account mutations.
pub struct UserEventPublisher {
    nats: Arc<NatsClient>,
}

impl UserEventPublisher {
    pub fn new(nats: Arc<NatsClient>) -> Self {
        Self { nats }
    }

    /// Publish `user.created` to every organization the user belongs to.
    pub async fn created(&self, user: &UserPayload) -> Result<()> {
        self.broadcast(EventType::UserCreated, user).await
    }

    /// Publish `user.updated` to every organization the user belongs to.
    pub async fn updated(&self, user: &UserPayload) -> Result<()> {
        self.broadcast(EventType::UserUpdated, user).await
    }

    /// Publish `user.deleted` directly to the user's own connections.
    ///
    /// Deletion addresses the account itself: the user's open sessions
    /// learn they are gone even after membership rows are removed.
    pub async fn deleted(&self, user: &UserPayload) -> Result<()> {
        let envelope =
            EventEnvelope::for_user(EventType::UserDeleted, user.id.clone(), serde_json::to_value(user)?);
        publish_envelope(&self.nats, &envelope).await
    }

    async fn broadcast(&self, event_type: EventType, user: &UserPayload) -> Result<()> {
        let data = serde_json::to_value(user)?;
        for organization_id in &user.organization_ids {
            let envelope =
                EventEnvelope::for_organization(event_type, organization_id.clone(), data.clone());
            publish_envelope(&self.nats, &envelope).await?;
        }
        Ok(())
    }
}

/// Publisher for generated notifications.
pub struct NotificationEventPublisher {
    nats: Arc<NatsClient>,
}

impl NotificationEventPublisher {
    pub fn new(nats: Arc<NatsClient>) -> Self {
        Self { nats }
    }

    /// Publish `notification.created` directly to the addressed user.
    pub async fn created(&self, notification: &NotificationPayload) -> Result<()> {
        let envelope = EventEnvelope::for_user(
            EventType::NotificationCreated,
            notification.user_id.clone(),
            serde_json::to_value(notification)?,
        );
        publish_envelope(&self.nats, &envelope).await
    }
}
