//! WebSocket server handler using Axum.
//!
//! Owns the connection handshake: credential validation before the
//! upgrade, registration, initial subscriptions from current
//! memberships, the readiness acknowledgment, and the live
//! subscribe/unsubscribe loop.

use crate::directory::{IdentityValidator, Identity, MembershipDirectory};
use crate::error::{GatewayError, RegistryError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{ConnectionHandle, ConnectionRegistry, CONNECTION_CHANNEL_BUFFER_SIZE};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub auth: Arc<dyn IdentityValidator>,
    pub organizations: Arc<dyn MembershipDirectory>,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.registry.connection_count();
    let subscriptions = state.registry.subscription_count();
    format!(
        r#"{{"status":"ok","connections":{},"subscriptions":{}}}"#,
        connections, subscriptions
    )
}

/// Query parameters for the upgrade request. Browsers cannot set headers
/// on a WebSocket handshake, so `?token=` is accepted as a fallback to
/// the `Authorization` header.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

fn bearer_token(headers: &HeaderMap, params: &WsAuthQuery) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
        .or_else(|| params.token.clone())
}

/// WebSocket upgrade handler. The credential is validated before the
/// protocol upgrade: a missing or rejected token fails with `401` and no
/// channel is ever established.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let token = bearer_token(&headers, &params)
        .ok_or_else(|| GatewayError::Unauthenticated("missing bearer credential".to_string()))?;

    let identity = state.auth.validate(&token).await?;

    info!(user_id = %identity.user_id, "WebSocket connection authenticated");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

/// Handle a registered WebSocket connection until it closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Bounded channel to the writer task; the bound is the slow-consumer
    // policy (see the registry).
    let (tx, mut rx) = mpsc::channel::<Message>(CONNECTION_CHANNEL_BUFFER_SIZE);

    let handle = Arc::new(ConnectionHandle::new(identity.user_id.clone(), tx));
    let evicted = handle.cancel_token();
    let connection_id = state.registry.add(handle.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);

    info!(connection_id = %connection_id, user_id = %identity.user_id, "Client connected");

    // Writer task: owns the sink, serializing all writes to this socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Initial subscriptions from the user's current memberships. A fetch
    // failure leaves the connection registered with zero subscriptions;
    // the client can still subscribe explicitly.
    match state.organizations.list_memberships(&identity.user_id).await {
        Ok(memberships) => {
            for membership in &memberships {
                if let Err(e) = state
                    .registry
                    .subscribe(connection_id, &membership.organization_id)
                {
                    debug!(connection_id = %connection_id, error = %e, "Connection gone during initial subscribe");
                    break;
                }
            }
            debug!(
                connection_id = %connection_id,
                count = memberships.len(),
                "Initial subscriptions established"
            );
        }
        Err(e) => {
            warn!(
                connection_id = %connection_id,
                user_id = %identity.user_id,
                error = %e,
                "Membership fetch failed, connection starts with no subscriptions"
            );
        }
    }

    // Acknowledge readiness. If even this write fails the channel is
    // already compromised: evict and bail.
    if handle.send(&ServerMessage::ConnectionEstablished).is_err() {
        warn!(connection_id = %connection_id, "Failed to acknowledge handshake, evicting");
        state.registry.remove(connection_id);
        send_task.abort();
        return;
    }

    // Ping interval for keepalive.
    let mut ping_interval = interval(Duration::from_secs(30));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            // Evicted by the registry (failed write elsewhere, shutdown):
            // stop reading and close the socket instead of lingering.
            _ = evicted.cancelled() => {
                debug!(connection_id = %connection_id, "Connection evicted, closing socket");
                break;
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        if let Err(e) = handle_message(&state, &handle, msg).await {
                            warn!(connection_id = %connection_id, error = %e, "Error handling message");
                            let _ = handle.send(&ServerMessage::Error {
                                message: e.to_string(),
                                code: "PROCESSING_ERROR".to_string(),
                            });
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        // Connection closed
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if !handle.try_send_raw(Message::Ping(vec![].into())) {
                    break;
                }
            }
        }
    }

    // Cleanup runs on every exit path: socket error, client close,
    // eviction, shutdown.
    state.registry.remove(connection_id);
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);

    info!(connection_id = %connection_id, "Client disconnected");
}

/// Handle a single WebSocket message.
async fn handle_message(
    state: &Arc<AppState>,
    handle: &Arc<ConnectionHandle>,
    msg: Message,
) -> Result<()> {
    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = serde_json::from_str(&text)?;
            handle_client_message(state, handle, client_msg).await
        }
        Message::Binary(data) => {
            let client_msg: ClientMessage = serde_json::from_slice(&data)?;
            handle_client_message(state, handle, client_msg).await
        }
        Message::Ping(data) => {
            if !handle.try_send_raw(Message::Pong(data)) {
                return Err(GatewayError::ChannelSend);
            }
            Ok(())
        }
        Message::Pong(_) => Ok(()),
        Message::Close(_) => {
            // Will be handled by the connection loop
            Ok(())
        }
    }
}

/// Handle a parsed client message.
///
/// A client-asserted organization id is never trusted: subscribe targets
/// are re-validated against current membership before the registry is
/// touched.
async fn handle_client_message(
    state: &Arc<AppState>,
    handle: &Arc<ConnectionHandle>,
    msg: ClientMessage,
) -> Result<()> {
    match msg {
        ClientMessage::Subscribe { organization_id } => {
            debug!(connection_id = %handle.id, organization_id = %organization_id, "Subscribe requested");

            if !state
                .organizations
                .is_member(&handle.user_id, &organization_id)
                .await?
            {
                warn!(
                    connection_id = %handle.id,
                    organization_id = %organization_id,
                    "Subscribe rejected, not a member"
                );
                handle.send(&ServerMessage::Error {
                    message: format!("not a member of {}", organization_id),
                    code: "NOT_A_MEMBER".to_string(),
                })?;
                return Ok(());
            }

            match state.registry.subscribe(handle.id, &organization_id) {
                Ok(()) => {
                    handle.send(&ServerMessage::Subscribed { organization_id })?;
                    counter!("gateway_subscriptions_total").increment(1);
                    Ok(())
                }
                // The connection raced its own eviction; it is about to
                // be torn down, nothing to do.
                Err(RegistryError::ConnectionNotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        ClientMessage::Unsubscribe { organization_id } => {
            debug!(connection_id = %handle.id, organization_id = %organization_id, "Unsubscribe requested");

            match state.registry.unsubscribe(handle.id, &organization_id) {
                Ok(()) => {
                    handle.send(&ServerMessage::Unsubscribed { organization_id })?;
                    Ok(())
                }
                Err(RegistryError::ConnectionNotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        ClientMessage::Ping => {
            handle.send(&ServerMessage::Pong)?;
            Ok(())
        }
    }
}
