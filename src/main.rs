// Stablefund backend server

use anyhow::Result;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use stablefund_backend::config::Config;
use stablefund_backend::handlers;
use stablefund_backend::repository::Database;
use stablefund_backend::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stablefund_backend=info".parse().unwrap())
                .add_directive("sqlx=warn".parse().unwrap()),
        )
        .init();

    info!("Starting Stablefund Backend Server");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Database: {}", config.database_url);
    info!("  Server Port: {}", config.server_port);
    info!(
        "  Derivation Service: {}",
        config.derivation_url.as_deref().unwrap_or("(in-process)")
    );
    info!(
        "  Balance Gateway: {}",
        config
            .balance_gateway_url
            .as_deref()
            .unwrap_or("(in-memory simulation)")
    );

    // Initialize database
    let db = Database::init(&config.database_url).await?;

    // Build the gateway bundle and app state
    let state = Arc::new(AppState::from_config(db, &config));

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = handlers::router(state).layer(cors);

    // Start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Stablefund Backend listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
