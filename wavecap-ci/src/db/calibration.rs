//! Calibration run database operations
//!
//! One row per calibration run. Channel images arrive one at a time and are
//! merged into JSON object columns keyed by channel; metadata blobs arrive
//! separately and never clobber already-stored channels.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use wavecap_common::{Error, Result};

use crate::models::{CalibrationMetadata, CalibrationRecord};

/// Merge one channel image into a calibration run, creating the row if
/// absent.
pub async fn upsert_calibration_image(
    pool: &SqlitePool,
    run_id: &str,
    channel_key: &str,
    image_path: &str,
    wavelength: &str,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    ensure_run_row(pool, run_id, &now).await?;

    // json_set merges atomically inside SQLite, so two channels arriving
    // concurrently cannot drop each other's entries.
    sqlx::query(
        r#"
        UPDATE calibration_runs
        SET channel_paths = json_set(channel_paths, ?, ?),
            channel_labels = json_set(channel_labels, ?, ?),
            updated_at = ?
        WHERE run_id = ?
        "#,
    )
    .bind(json_path(channel_key))
    .bind(image_path)
    .bind(json_path(channel_key))
    .bind(wavelength)
    .bind(&now)
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge calibration metadata blobs into a run, creating the row if absent.
pub async fn upsert_calibration_metadata(
    pool: &SqlitePool,
    meta: &CalibrationMetadata,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    ensure_run_row(pool, &meta.run_id, &now).await?;

    let normalization = meta
        .normalization
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize normalization: {}", e)))?;
    let results = meta
        .results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize results: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE calibration_runs
        SET normalization_json = COALESCE(?, normalization_json),
            results_json = COALESCE(?, results_json),
            target_intensity = COALESCE(?, target_intensity),
            updated_at = ?
        WHERE run_id = ?
        "#,
    )
    .bind(normalization)
    .bind(results)
    .bind(meta.target_intensity)
    .bind(&now)
    .bind(&meta.run_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a calibration run record.
pub async fn find_calibration_run(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<Option<CalibrationRecord>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, created_at, updated_at, channel_paths, channel_labels,
               normalization_json, results_json, target_intensity
        FROM calibration_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let created_at: String = row.get("created_at");
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
                .with_timezone(&chrono::Utc);

            let updated_at: String = row.get("updated_at");
            let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| Error::Internal(format!("Failed to parse updated_at: {}", e)))?
                .with_timezone(&chrono::Utc);

            let channel_paths: String = row.get("channel_paths");
            let channel_paths = serde_json::from_str(&channel_paths)
                .map_err(|e| Error::Internal(format!("Failed to parse channel_paths: {}", e)))?;

            let channel_labels: String = row.get("channel_labels");
            let channel_labels = serde_json::from_str(&channel_labels)
                .map_err(|e| Error::Internal(format!("Failed to parse channel_labels: {}", e)))?;

            Ok(Some(CalibrationRecord {
                run_id: row.get("run_id"),
                created_at,
                updated_at,
                channel_paths,
                channel_labels,
                normalization_json: row.get("normalization_json"),
                results_json: row.get("results_json"),
                target_intensity: row.get("target_intensity"),
            }))
        }
        None => Ok(None),
    }
}

async fn ensure_run_row(pool: &SqlitePool, run_id: &str, now: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO calibration_runs (run_id, created_at, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(run_id) DO NOTHING
        "#,
    )
    .bind(run_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// JSON1 path expression for a channel key.
fn json_path(channel_key: &str) -> String {
    format!("$.\"{}\"", channel_key)
}
