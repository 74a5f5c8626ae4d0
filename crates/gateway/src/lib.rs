//! Gateway service for real-time event delivery to WebSocket clients.
//!
//! This service:
//! - Accepts authenticated WebSocket connections from task-tracking clients
//! - Seeds each connection's subscriptions from the user's organization
//!   memberships and processes subscribe/unsubscribe requests
//! - Consumes domain events (tasks, comments, users, notifications) from
//!   NATS queues
//! - Routes each event to the connections subscribed to its organization
//!   or owned by its target user
//!
//! ## Architecture
//!
//! ```text
//! NATS: task.> / comment.> / user.> / notification.>
//!         ↓
//! QueueConsumer (one per queue)
//!         ↓
//! ConnectionRegistry (by_id / by_user / by_organization)
//!         ↓
//! WebSocket clients
//! ```
//!
//! The registry is the only shared mutable state: the handshake handler
//! and every consumer reach sockets exclusively through it.

pub mod config;
pub mod consumer;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod ws_server;

pub use config::GatewayConfig;
pub use consumer::QueueConsumer;
pub use directory::{
    AuthServiceClient, DirectoryError, Identity, IdentityValidator, Membership,
    MembershipDirectory, OrganizationServiceClient,
};
pub use error::{GatewayError, RegistryError, Result};
pub use protocol::{ClientMessage, EventMessage, ServerMessage};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use ws_server::{create_router, AppState};
