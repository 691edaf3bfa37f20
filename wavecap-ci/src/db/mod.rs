//! Database access for wavecap-ci
//!
//! SQLite-backed durable store for capture sessions and calibration runs.

pub mod calibration;
pub mod sessions;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to wavecap.db in the root folder, creating it if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize wavecap-ci tables
///
/// Creates capture_sessions and calibration_runs if they don't exist.
/// Sectioned runs get one row per (run_id, section_index); burst rows reuse
/// the composite key with section_index 0, which makes retried inserts
/// upserts instead of duplicates.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS capture_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            kind TEXT NOT NULL,
            run_id TEXT NOT NULL,
            section_index INTEGER NOT NULL DEFAULT 0,
            label TEXT,
            image_paths TEXT NOT NULL DEFAULT '[]',
            location TEXT,
            env_temp_c REAL,
            env_humidity REAL,
            env_timestamp_utc TEXT,
            config_name TEXT,
            UNIQUE(run_id, section_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calibration_runs (
            run_id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            channel_paths TEXT NOT NULL DEFAULT '{}',
            channel_labels TEXT NOT NULL DEFAULT '{}',
            normalization_json TEXT,
            results_json TEXT,
            target_intensity REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (capture_sessions, calibration_runs)");

    Ok(())
}
