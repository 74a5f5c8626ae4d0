//! Queue consumers: broker → WebSocket fan-out.
//!
//! One consumer is permanently bound to one event queue. It decodes each
//! broker message into an event envelope and hands it to the connection
//! registry for delivery. Malformed or undeliverable messages get a
//! terminal acknowledgment so they are never redelivered; messages still
//! in flight at shutdown are left unacked for broker redelivery.

use crate::error::{GatewayError, Result};
use crate::protocol::EventMessage;
use crate::registry::ConnectionRegistry;
use async_nats::jetstream::AckKind;
use events::EventEnvelope;
use futures::StreamExt;
use metrics::counter;
use nats_client::{NatsClient, StreamConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Consumes one event queue and fans envelopes out through the registry.
pub struct QueueConsumer {
    nats: Arc<NatsClient>,
    registry: Arc<ConnectionRegistry>,
    category: String,
}

impl QueueConsumer {
    /// Bind a consumer to the event queue for `category`
    /// ("task", "comment", "user", "notification").
    pub fn new(nats: Arc<NatsClient>, registry: Arc<ConnectionRegistry>, category: &str) -> Self {
        Self {
            nats,
            registry,
            category: category.to_string(),
        }
    }

    /// Run the consumer until shutdown or the subscription ends.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let stream_name = StreamConfig::for_category(&self.category).name;
        let consumer = self.nats.pull_consumer(&stream_name).await?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get messages from {}: {}", stream_name, e))?;

        info!(queue = %stream_name, "Queue consumer running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    // In-flight unacked messages stay with the broker for
                    // redelivery to the next consumer.
                    info!(queue = %stream_name, "Queue consumer received shutdown signal");
                    break;
                }

                msg = messages.next() => {
                    match msg {
                        Some(Ok(msg)) => self.handle_message(msg).await,
                        Some(Err(e)) => {
                            warn!(queue = %stream_name, error = %e, "Error receiving message");
                        }
                        None => {
                            warn!(queue = %stream_name, "Subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!(queue = %stream_name, "Queue consumer stopped");
        Ok(())
    }

    async fn handle_message(&self, msg: async_nats::jetstream::Message) {
        counter!("gateway_events_received_total", "queue" => self.category.clone()).increment(1);

        let envelope = match serde_json::from_slice::<EventEnvelope>(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(queue = %self.category, error = %e, "Malformed envelope, discarding");
                counter!("gateway_malformed_envelopes_total").increment(1);
                // Terminal ack: malformed input must never loop back.
                self.finish(&msg, AckKind::Term).await;
                return;
            }
        };

        match dispatch(&self.registry, &envelope) {
            Ok(()) => {
                counter!("gateway_events_routed_total", "queue" => self.category.clone())
                    .increment(1);
                self.finish(&msg, AckKind::Ack).await;
            }
            Err(e) => {
                warn!(queue = %self.category, error = %e, "Dispatch failed, discarding");
                counter!("gateway_dispatch_errors_total").increment(1);
                // Single delivery attempt: a message this process cannot
                // dispatch will not fare better on redelivery.
                self.finish(&msg, AckKind::Term).await;
            }
        }
    }

    async fn finish(&self, msg: &async_nats::jetstream::Message, kind: AckKind) {
        if let Err(e) = msg.ack_with(kind).await {
            warn!(queue = %self.category, error = %e, "Failed to acknowledge message");
        }
    }
}

/// Route one envelope through the registry.
///
/// Organization-scoped envelopes broadcast to the organization's
/// subscribers; user-scoped envelopes go to the user's connections. An
/// envelope carrying both targets is delivered to both audiences (the
/// publishers only ever set one, but a foreign publisher setting both
/// loses nothing this way). An envelope with neither is malformed.
pub(crate) fn dispatch(registry: &ConnectionRegistry, envelope: &EventEnvelope) -> Result<()> {
    let message = EventMessage::from_envelope(envelope);
    let mut routed = false;

    if let Some(organization_id) = &envelope.organization_id {
        registry.broadcast_to_organization(organization_id, &message);
        routed = true;
    }
    if let Some(user_id) = &envelope.user_id {
        // A user with no live connections is routine, not a failure; a
        // store-and-forward fallback would hang off this branch.
        if let Err(e) = registry.send_to_user(user_id, &message) {
            debug!(user_id = %user_id, error = %e, "No live connections for user event");
        }
        routed = true;
    }

    if !routed {
        return Err(GatewayError::MalformedEnvelope(
            "envelope has no routing target".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, CONNECTION_CHANNEL_BUFFER_SIZE};
    use axum::extract::ws::Message;
    use events::EventType;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(
        registry: &ConnectionRegistry,
        user_id: &str,
    ) -> (uuid::Uuid, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER_SIZE);
        let id = registry.add(Arc::new(ConnectionHandle::new(user_id, tx)));
        (id, rx)
    }

    fn delivered(rx: &mut mpsc::Receiver<Message>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn organization_envelope_broadcasts() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = connect(&registry, "u1");
        registry.subscribe(id, "o1").unwrap();

        let envelope =
            EventEnvelope::for_organization(EventType::TaskCreated, "o1", json!({"id": "t-1"}));
        dispatch(&registry, &envelope).unwrap();

        assert_eq!(delivered(&mut rx), 1);
    }

    #[test]
    fn user_envelope_goes_to_owner_only() {
        let registry = ConnectionRegistry::new();
        let (_owner, mut rx_owner) = connect(&registry, "u1");
        let (stranger, mut rx_stranger) = connect(&registry, "u2");
        registry.subscribe(stranger, "o1").unwrap();

        let envelope =
            EventEnvelope::for_user(EventType::NotificationCreated, "u1", json!({"id": "n-1"}));
        dispatch(&registry, &envelope).unwrap();

        assert_eq!(delivered(&mut rx_owner), 1);
        assert_eq!(delivered(&mut rx_stranger), 0);
    }

    #[test]
    fn user_envelope_without_connections_still_dispatches() {
        let registry = ConnectionRegistry::new();
        let envelope =
            EventEnvelope::for_user(EventType::NotificationCreated, "ghost", json!({}));
        assert!(dispatch(&registry, &envelope).is_ok());
    }

    #[test]
    fn envelope_with_both_targets_reaches_both_audiences() {
        let registry = ConnectionRegistry::new();
        let (member, mut rx_member) = connect(&registry, "u1");
        registry.subscribe(member, "o1").unwrap();
        let (_direct, mut rx_direct) = connect(&registry, "u2");

        let envelope = EventEnvelope {
            organization_id: Some("o1".to_string()),
            user_id: Some("u2".to_string()),
            event_type: "task.updated".to_string(),
            data: json!({"id": "t-9"}),
        };
        dispatch(&registry, &envelope).unwrap();

        assert_eq!(delivered(&mut rx_member), 1);
        assert_eq!(delivered(&mut rx_direct), 1);
    }

    #[test]
    fn envelope_without_target_is_malformed_and_touches_nothing() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = connect(&registry, "u1");
        registry.subscribe(id, "o1").unwrap();

        let envelope = EventEnvelope {
            organization_id: None,
            user_id: None,
            event_type: "task.created".to_string(),
            data: json!({}),
        };

        let result = dispatch(&registry, &envelope);
        assert!(matches!(result, Err(GatewayError::MalformedEnvelope(_))));
        assert_eq!(delivered(&mut rx), 0);
        assert_eq!(registry.connection_count(), 1);
    }
}
