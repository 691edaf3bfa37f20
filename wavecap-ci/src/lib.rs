//! wavecap-ci library interface
//!
//! Exposes the application state, router, and ingest pipeline for
//! integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod writer;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use wavecap_common::events::EventBus;

use crate::services::burst::BurstTracker;
use crate::services::envcache::PendingEnvCache;
use crate::services::location::LocationProvider;
use crate::services::tracker::RunTracker;
use crate::writer::WriteQueue;

/// Application state shared across handlers
///
/// All mutable ingest state lives here and is passed explicitly to every
/// handler; nothing is ambient.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// In-memory tracking for sectioned runs
    pub run_tracker: Arc<RunTracker>,
    /// In-memory burst reassembly
    pub burst_tracker: Arc<BurstTracker>,
    /// Environment readings awaiting their durable record
    pub env_cache: Arc<PendingEnvCache>,
    /// Fire-and-forget durable write dispatcher
    pub write_queue: WriteQueue,
    /// Device location source
    pub location: Arc<dyn LocationProvider>,
    /// Bound on location resolution per durable write
    pub location_timeout: Duration,
    /// Root folder for captured data
    pub root_folder: PathBuf,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        location: Arc<dyn LocationProvider>,
        root_folder: PathBuf,
        location_timeout: Duration,
    ) -> Self {
        Self {
            db,
            event_bus,
            run_tracker: Arc::new(RunTracker::new()),
            burst_tracker: Arc::new(BurstTracker::new()),
            env_cache: Arc::new(PendingEnvCache::new()),
            write_queue: WriteQueue::new(),
            location,
            location_timeout,
            root_folder,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/health", get(api::health_check))
        .route("/debug", get(api::debug_dump))
        .route("/events", get(api::event_stream))
        .route("/upload", post(api::upload))
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
