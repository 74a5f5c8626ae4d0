//! NATS client wrapper with JetStream support.
//!
//! Provides stream provisioning for the domain event queues and
//! ephemeral pull consumers for the gateway side.

pub mod client;

pub use client::{NatsClient, StreamConfig, EVENT_CATEGORIES};
