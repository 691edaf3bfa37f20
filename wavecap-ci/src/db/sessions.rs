//! Capture session database operations
//!
//! Every write carries the complete current image-path list for its key, so
//! the stored list is always a consistent snapshot regardless of how many
//! partial uploads produced it.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use wavecap_common::{Error, Result};

use crate::models::{EnvReading, SessionKind, SessionRecord};

/// Insert or update a finalized burst session.
///
/// Burst rows store the session identifier in `run_id` with section 0; a
/// retried finalization lands on the same row instead of inserting a
/// duplicate.
pub async fn upsert_burst_session(
    pool: &SqlitePool,
    session_id: &str,
    image_paths: &[String],
    location: &str,
    env: Option<&EnvReading>,
) -> Result<()> {
    let paths_json = serde_json::to_string(image_paths)
        .map_err(|e| Error::Internal(format!("Failed to serialize image paths: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO capture_sessions (
            created_at, completed_at, kind, run_id, section_index,
            image_paths, location, env_temp_c, env_humidity, env_timestamp_utc
        ) VALUES (?, ?, 'BURST', ?, 0, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id, section_index) DO UPDATE SET
            completed_at = excluded.completed_at,
            image_paths = excluded.image_paths,
            location = excluded.location,
            env_temp_c = COALESCE(excluded.env_temp_c, env_temp_c),
            env_humidity = COALESCE(excluded.env_humidity, env_humidity),
            env_timestamp_utc = COALESCE(excluded.env_timestamp_utc, env_timestamp_utc)
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(session_id)
    .bind(&paths_json)
    .bind(location)
    .bind(env.map(|e| e.temp_c))
    .bind(env.map(|e| e.humidity))
    .bind(env.map(|e| e.ts_utc.as_str()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or update one section of a sectioned run.
///
/// `image_paths` is the complete accumulated list for the section, not a
/// delta. Returns the number of rows affected.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_section(
    pool: &SqlitePool,
    run_id: &str,
    section_index: u32,
    image_paths: &[String],
    label: &str,
    config_name: Option<&str>,
    location: &str,
    env: Option<&EnvReading>,
) -> Result<u64> {
    let paths_json = serde_json::to_string(image_paths)
        .map_err(|e| Error::Internal(format!("Failed to serialize image paths: {}", e)))?;
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO capture_sessions (
            created_at, completed_at, kind, run_id, section_index, label,
            image_paths, location, env_temp_c, env_humidity, env_timestamp_utc,
            config_name
        ) VALUES (?, ?, 'SECTIONED', ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id, section_index) DO UPDATE SET
            completed_at = excluded.completed_at,
            label = excluded.label,
            image_paths = excluded.image_paths,
            location = excluded.location,
            env_temp_c = COALESCE(excluded.env_temp_c, env_temp_c),
            env_humidity = COALESCE(excluded.env_humidity, env_humidity),
            env_timestamp_utc = COALESCE(excluded.env_timestamp_utc, env_timestamp_utc),
            config_name = COALESCE(excluded.config_name, config_name)
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(run_id)
    .bind(section_index as i64)
    .bind(label)
    .bind(&paths_json)
    .bind(location)
    .bind(env.map(|e| e.temp_c))
    .bind(env.map(|e| e.humidity))
    .bind(env.map(|e| e.ts_utc.as_str()))
    .bind(config_name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Apply an environment reading to every existing record of a run.
///
/// Returns rows affected; zero means no record exists yet and the caller
/// should cache the reading for retroactive application.
pub async fn update_environment_by_run_id(
    pool: &SqlitePool,
    run_id: &str,
    reading: &EnvReading,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE capture_sessions
        SET env_temp_c = ?, env_humidity = ?, env_timestamp_utc = ?
        WHERE run_id = ?
        "#,
    )
    .bind(reading.temp_c)
    .bind(reading.humidity)
    .bind(&reading.ts_utc)
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Look up a run's record (lowest section first).
///
/// Used by the run-collision check: any surviving row under the identifier
/// means a previous run already persisted it.
pub async fn find_by_run_id(pool: &SqlitePool, run_id: &str) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, created_at, completed_at, kind, run_id, section_index,
               label, image_paths, location, env_temp_c, env_humidity,
               env_timestamp_utc, config_name
        FROM capture_sessions
        WHERE run_id = ?
        ORDER BY section_index ASC
        LIMIT 1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    row.map(parse_session_row).transpose()
}

fn parse_session_row(row: sqlx::sqlite::SqliteRow) -> Result<SessionRecord> {
    let kind_str: String = row.get("kind");
    let kind = SessionKind::from_db_value(&kind_str)
        .ok_or_else(|| Error::Internal(format!("Unknown session kind: {}", kind_str)))?;

    let paths_json: String = row.get("image_paths");
    let image_paths: Vec<String> = serde_json::from_str(&paths_json)
        .map_err(|e| Error::Internal(format!("Failed to deserialize image paths: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let completed_at: Option<String> = row.get("completed_at");
    let completed_at = completed_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse completed_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    Ok(SessionRecord {
        id: row.get("id"),
        created_at,
        completed_at,
        kind,
        run_id: row.get("run_id"),
        section_index: row.get::<i64, _>("section_index") as u32,
        label: row.get("label"),
        image_paths,
        location: row.get("location"),
        env_temp_c: row.get("env_temp_c"),
        env_humidity: row.get("env_humidity"),
        env_timestamp_utc: row.get("env_timestamp_utc"),
        config_name: row.get("config_name"),
    })
}
