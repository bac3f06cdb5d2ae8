//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the session instructions.
//! 3. Initializing the upstream clients (OpenAI and Perplexity).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use parley_api::{
    config::Config,
    files::FileStore,
    instructions::load_instructions,
    router::create_router,
    state::AppState,
    upstream::{
        openai::{OpenAiImageGenerator, OpenAiSessionMinter},
        perplexity::PerplexitySearcher,
    },
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 2. Load Instructions ---
    let instructions = Arc::new(load_instructions(config.instructions_path.as_deref())?);

    // --- 3. Initialize Upstream Clients ---
    if config.perplexity_api_key.is_none() {
        warn!("PERPLEXITY_API_KEY is not set; web search requests will fail.");
    }
    let app_state = Arc::new(AppState {
        sessions: Arc::new(OpenAiSessionMinter::new(
            config.openai_api_key.clone(),
            config.realtime_model.clone(),
        )),
        images: Arc::new(OpenAiImageGenerator::new(
            &config.openai_api_key,
            config.image_model.clone(),
        )),
        search: Arc::new(PerplexitySearcher::new(
            config.perplexity_api_key.clone(),
            config.search_model.clone(),
        )),
        files: FileStore::new(config.files_dir.clone()),
        instructions,
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.realtime_model,
        voice = %config.default_voice,
        files_dir = %config.files_dir.display(),
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
