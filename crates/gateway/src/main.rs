//! Gateway service entry point.
//!
//! WebSocket gateway for real-time event delivery to task-tracking
//! clients.

use anyhow::Result;
use gateway::{
    create_router, AppState, AuthServiceClient, ConnectionRegistry, GatewayConfig,
    OrganizationServiceClient, QueueConsumer,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use nats_client::{NatsClient, EVENT_CATEGORIES};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let config = GatewayConfig::from_env();
    info!("Configuration:");
    info!("  NATS_URL: {}", config.nats_url);
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  AUTH_SERVICE_URL: {}", config.auth_service_url);
    info!("  ORGANIZATION_SERVICE_URL: {}", config.organization_service_url);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    // Connect to NATS and provision the event streams
    let nats = Arc::new(NatsClient::connect(&config.nats_url).await?);
    for category in EVENT_CATEGORIES {
        nats.ensure_event_stream(category).await?;
    }
    info!("Connected to NATS, event streams ready");

    // Create connection registry and capability clients
    let registry = Arc::new(ConnectionRegistry::new());
    let auth = Arc::new(AuthServiceClient::new(config.auth_service_url.clone()));
    let organizations = Arc::new(OrganizationServiceClient::new(
        config.organization_service_url.clone(),
    ));

    // Spawn one consumer per event queue under a shared shutdown token
    let shutdown = CancellationToken::new();
    let mut consumer_handles = Vec::new();
    for category in EVENT_CATEGORIES {
        let consumer = QueueConsumer::new(nats.clone(), registry.clone(), category);
        let token = shutdown.clone();
        consumer_handles.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(token).await {
                error!(queue = category, "Consumer error: {:?}", e);
            }
        }));
    }

    // Create application state and HTTP router
    let state = Arc::new(AppState {
        registry,
        auth,
        organizations,
    });
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop consumers; unacked messages stay with the broker
    info!("Shutting down consumers...");
    shutdown.cancel();
    for handle in consumer_handles {
        let _ = handle.await;
    }

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
