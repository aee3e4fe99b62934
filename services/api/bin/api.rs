//! Main Entrypoint for the Parlare API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting the completion, embedding, image and speech services.
//! 3. Restoring the exercise library and indexing exercise files. The library
//!    rewrites its snapshot after every insert.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server.

use anyhow::Context;
use parlare_api::{
    config::Config,
    router::create_router,
    state::{AppState, Services, SessionDefaults},
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let services = Services::from_config(&config).await?;
    let app_state = Arc::new(AppState::new(services, SessionDefaults::from(&config)));
    info!(
        exercises = app_state.vector_store.len().await,
        tools = app_state.tools.list().len(),
        "Exercise library ready."
    );

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        api_base = %config.openai_api_base,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
