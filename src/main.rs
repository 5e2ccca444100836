//! classroom-events server binary.
//!
//! Boots the event bus, the WebSocket gateway and the HTTP listener, then
//! tears them down in reverse order on Ctrl-C / SIGTERM.

use std::sync::Arc;

use http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classroom_events::adapters::auth::JwtSessionValidator;
use classroom_events::adapters::websocket::{events_router, ConnectionGateway};
use classroom_events::application::EventBus;
use classroom_events::config::{AppConfig, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate()?;

    let bus = Arc::new(EventBus::from_config(&config)?);
    if let Err(e) = bus.start().await {
        tracing::error!(backend = bus.backend_name(), error = %e, "Event bus failed to start");
        return Err(e.into());
    }

    let validator = Arc::new(JwtSessionValidator::from_config(&config.auth)?);
    let gateway = Arc::new(ConnectionGateway::new(
        Arc::clone(&bus),
        validator,
        config.gateway.clone(),
    ));

    let app = events_router(Arc::clone(&gateway))
        .layer(cors_layer(&config.server))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        address = %addr,
        backend = bus.backend_name(),
        environment = ?config.server.environment,
        "classroom-events listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Upgraded sockets outlive graceful shutdown; close them explicitly.
    gateway.shutdown().await;
    if let Err(e) = bus.shutdown().await {
        tracing::error!(error = %e, "Event bus shutdown failed");
    }
    tracing::info!("Shutdown complete");

    served.map_err(Into::into)
}

fn init_tracing(server: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&server.log_level));

    if server.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
