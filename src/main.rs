mod models;
mod handlers;
mod routes;
mod docs;
mod config;
mod utils;
mod websocket;
mod ws;

use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use routes::{create_api_routes, create_ws_routes};
use docs::ApiDoc;
use config::{Config, SyncSettings};
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::panic;
use ws::coordinator::Coordinator;

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before logging so LOG_LEVEL can take effect
    let loaded = Config::load();
    let log_level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("colabri_sync=debug,tower_http=debug,axum::rejection=trace,{}", log_level).into()
        }))
        .init();

    info!("Starting server...");

    let config = loaded.unwrap_or_else(|e| {
        error!("❌ Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let settings = config.sync_settings().unwrap_or_else(|e| {
        error!("❌ {}", e);
        warn!("Using default sync settings");
        SyncSettings::default()
    });
    info!(
        "Sync settings: idle {}s, hard timeout {}s, lock TTL {}s, session idle {}s",
        settings.idle_threshold.num_seconds(),
        settings.hard_timeout.num_seconds(),
        settings.lock_ttl.num_seconds(),
        settings.session_idle.num_seconds()
    );

    // Start the sync core and its background tasks
    let coordinator = Coordinator::new(settings);
    coordinator.start_background_tasks();

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(coordinator.clone()))
        // Mount the sync WebSocket
        .merge(create_ws_routes(coordinator.clone()))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws?userId=<id>&documentId=<doc>", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal(coordinator.clone()))
        .await
    {
        error!("Server error: {}", e);
    }

    // No-op if the signal handler already ran it
    coordinator.shutdown().await;
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    if !origins.is_empty() {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    } else if config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

async fn shutdown_signal(coordinator: Arc<Coordinator>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutdown signal received");
    coordinator.shutdown().await;
}
