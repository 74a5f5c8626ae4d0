//! Gateway configuration, read from the environment.

use std::env;

/// Runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// NATS server URL.
    pub nats_url: String,
    /// Port for the WebSocket/HTTP server.
    pub http_port: u16,
    /// Port for the Prometheus metrics exporter.
    pub metrics_port: u16,
    /// Base URL of the auth service (token validation).
    pub auth_service_url: String,
    /// Base URL of the organization service (membership listing).
    pub organization_service_url: String,
}

impl GatewayConfig {
    /// Read configuration from environment variables with defaults
    /// suitable for local development.
    pub fn from_env() -> Self {
        Self {
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "8082".to_string())
                .parse()
                .expect("HTTP_PORT must be a number"),
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9093".to_string())
                .parse()
                .expect("METRICS_PORT must be a number"),
            auth_service_url: env::var("AUTH_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            organization_service_url: env::var("ORGANIZATION_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
        }
    }
}
