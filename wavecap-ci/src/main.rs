//! wavecap-ci - Capture Ingest Service
//!
//! Embedded HTTP server that receives streamed image captures and metadata
//! from the instrument controller and reassembles them into durable capture
//! sessions.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wavecap_common::events::EventBus;

use wavecap_ci::config::{CliArgs, IngestConfig};
use wavecap_ci::services::location::BridgeLocationProvider;
use wavecap_ci::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting wavecap-ci (Capture Ingest) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli = CliArgs::parse();
    let config = IngestConfig::resolve(&cli)?;
    info!("Root folder: {}", config.root_folder.display());

    let db_path = wavecap_common::config::ensure_root_folder(&config.root_folder)?;
    info!("Database: {}", db_path.display());

    let db_pool = wavecap_ci::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Event bus for SSE broadcasting
    let event_bus = EventBus::new(256);

    let location = Arc::new(BridgeLocationProvider::new(
        config.location_endpoint.clone(),
        config.location_timeout,
    ));
    info!("Location bridge: {}", config.location_endpoint);

    let state = AppState::new(
        db_pool,
        event_bus,
        location,
        config.root_folder.clone(),
        config.location_timeout,
    );

    let app = wavecap_ci::build_router(state);

    // The controller connects over the local network; bind all interfaces.
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Listening on http://0.0.0.0:{}", config.port);
    info!("Health check: http://127.0.0.1:{}/health", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
