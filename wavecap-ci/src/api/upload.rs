//! POST /upload - ingestion entry point
//!
//! One endpoint absorbs every payload the instrument controller produces:
//! environment metadata, section archives, raw section frames, calibration
//! frames, and burst images. The body is classified exactly once into an
//! `UploadKind` and dispatched; handlers never re-inspect mode strings.

use axum::body::{to_bytes, Bytes};
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, StatusCode};
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;
use wavecap_common::events::IngestEvent;

use crate::error::{ApiError, ApiResult};
use crate::models::{CalibrationMetadata, EnvMetadata, EnvReading, UploadMode, UploadParams};
use crate::services::burst::{BurstProgress, BURST_SIZE};
use crate::services::envcache::EnvOutcome;
use crate::services::sniff::{self, UploadFormat};
use crate::services::tracker::IDLE_TIMEOUT;
use crate::services::{archive, calibration, location, sanitize_component, sections};
use crate::{db, AppState};

/// Upper bound on an upload body; a section archive of full-resolution
/// frames stays well under this.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Pipeline an upload is dispatched into, computed once per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Metadata,
    SectionArchive,
    SectionImage,
    CalibrationFrame,
    BurstImage,
}

fn dispatch_kind(format: UploadFormat, mode: UploadMode) -> UploadKind {
    match (format, mode) {
        (UploadFormat::Json, _) => UploadKind::Metadata,
        (UploadFormat::Zip, UploadMode::Sectioned) => UploadKind::SectionArchive,
        (_, UploadMode::Sectioned) => UploadKind::SectionImage,
        (_, UploadMode::Calibration) => UploadKind::CalibrationFrame,
        (_, UploadMode::Burst) => UploadKind::BurstImage,
    }
}

/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    req: Request,
) -> ApiResult<(StatusCode, String)> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let disposition_filename = req
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_disposition_filename);

    let (part_filename, bytes) = read_body(req, content_type.as_deref()).await?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Missing file part".to_string()));
    }

    let filename_hint = part_filename
        .or(disposition_filename)
        .or_else(|| params.filename.clone());

    let format = sniff::classify(content_type.as_deref(), filename_hint.as_deref(), &bytes);
    let kind = dispatch_kind(format, params.mode());
    info!(
        "Upload classified as {:?} ({} bytes, filename hint {:?})",
        kind,
        bytes.len(),
        filename_hint
    );

    let message = match kind {
        UploadKind::Metadata => handle_metadata(&state, &params, &bytes).await?,
        UploadKind::SectionArchive => {
            handle_section_archive(&state, &params, filename_hint, &bytes).await?
        }
        UploadKind::SectionImage => {
            handle_section_image(&state, &params, filename_hint, &bytes).await?
        }
        UploadKind::CalibrationFrame => handle_calibration_frame(&state, &params, &bytes).await?,
        UploadKind::BurstImage => {
            handle_burst_image(&state, &params, filename_hint, &bytes).await?
        }
    };

    // Opportunistic staleness sweep; no timer thread exists.
    state.run_tracker.sweep(IDLE_TIMEOUT, &state.event_bus).await;
    state.burst_tracker.sweep(IDLE_TIMEOUT, &state.event_bus).await;

    Ok((StatusCode::OK, message))
}

/// Read the upload body: the first part of a multipart form, or the raw
/// request body.
async fn read_body(
    req: Request,
    content_type: Option<&str>,
) -> ApiResult<(Option<String>, Bytes)> {
    let is_multipart = content_type
        .map(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
        {
            let filename = field.file_name().map(str::to_string);
            let name = field.name().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file part: {}", e)))?;
            if bytes.is_empty() && filename.is_none() {
                continue;
            }
            return Ok((filename.or(name), bytes));
        }
        Err(ApiError::BadRequest("Missing file part".to_string()))
    } else {
        let bytes = to_bytes(req.into_body(), MAX_UPLOAD_BYTES)
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read body: {}", e)))?;
        Ok((None, bytes))
    }
}

/// `filename="..."` from a content-disposition header, if present.
fn parse_disposition_filename(value: &str) -> Option<String> {
    let start = value.find("filename=")? + "filename=".len();
    let rest = value[start..].trim();
    let name = rest
        .strip_prefix('"')
        .and_then(|r| r.split('"').next())
        .unwrap_or_else(|| rest.split(';').next().unwrap_or(rest).trim());
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

async fn handle_metadata(
    state: &AppState,
    params: &UploadParams,
    bytes: &[u8],
) -> ApiResult<String> {
    if params.mode() == UploadMode::Calibration {
        let meta: CalibrationMetadata = serde_json::from_slice(bytes)
            .map_err(|e| ApiError::BadRequest(format!("Unparseable metadata JSON: {}", e)))?;
        db::calibration::upsert_calibration_metadata(&state.db, &meta).await?;
        return Ok(format!("calibration metadata accepted for run {}", meta.run_id));
    }

    let meta: EnvMetadata = serde_json::from_slice(bytes)
        .map_err(|e| ApiError::BadRequest(format!("Unparseable metadata JSON: {}", e)))?;
    if meta.run_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Missing run identifier in metadata".to_string(),
        ));
    }

    let effective = state.run_tracker.resolve_alias(&meta.run_id).await;
    let reading = EnvReading {
        temp_c: meta.temp_c,
        humidity: meta.humidity,
        ts_utc: meta.ts_utc,
    };
    match state.env_cache.apply(&state.db, &effective, reading).await? {
        EnvOutcome::Applied => Ok(format!("environment applied to run {}", effective)),
        EnvOutcome::Cached => Ok(format!("environment cached for run {}", effective)),
    }
}

/// Shared preamble of the sectioned pipelines: collision-checked run
/// identifier, tracker bookkeeping, and the section directory.
struct SectionTarget {
    run_id: String,
    section_index: u32,
    label: String,
    dir: PathBuf,
}

async fn resolve_section_target(
    state: &AppState,
    params: &UploadParams,
) -> ApiResult<SectionTarget> {
    let claimed = params
        .run_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest("Missing runId for sectioned upload".to_string()))?;
    let section_index = params.section_index.unwrap_or(0);

    let effective = state
        .run_tracker
        .resolve_run_id(
            &claimed,
            section_index,
            params.part.as_deref(),
            &state.db,
            &state.event_bus,
        )
        .await?;
    if effective != claimed {
        state.env_cache.rename(&claimed, &effective).await;
    }

    state
        .run_tracker
        .touch(&effective, params.ini.as_deref())
        .await;
    if let Some(hint) = params.frames_per_section {
        state
            .run_tracker
            .set_expected_frames(&effective, section_index, hint)
            .await;
    }

    let label = params
        .section
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("section {}", section_index));

    let run_dir_name = match params.ini.as_deref() {
        Some(ini) if !ini.trim().is_empty() => {
            format!("{}__{}", sanitize_component(&effective), sanitize_component(ini))
        }
        _ => sanitize_component(&effective),
    };
    let dir = state
        .root_folder
        .join("runs")
        .join(run_dir_name)
        .join(format!(
            "section_{:02}__{}",
            section_index,
            sanitize_component(&label)
        ));

    Ok(SectionTarget {
        run_id: effective,
        section_index,
        label,
        dir,
    })
}

async fn handle_section_archive(
    state: &AppState,
    params: &UploadParams,
    filename_hint: Option<String>,
    bytes: &[u8],
) -> ApiResult<String> {
    let target = resolve_section_target(state, params).await?;

    if let Some(part) = params.part.as_deref() {
        let newly_seen = state
            .run_tracker
            .mark_part_seen(&target.run_id, target.section_index, part)
            .await;
        if !newly_seen {
            return Ok(format!(
                "duplicate part {} for run {} section {} ignored",
                part, target.run_id, target.section_index
            ));
        }
    }

    fs::create_dir_all(&target.dir)?;
    let archive_name = filename_hint
        .map(|n| sanitize_component(&n))
        .unwrap_or_else(|| {
            format!("part_{}.zip", params.part.as_deref().unwrap_or("1"))
        });
    let archive_path = target.dir.join(archive_name);
    fs::write(&archive_path, bytes)?;

    let extracted = archive::extract_images(&archive_path, &target.dir)?;
    let count = extracted.len();
    let paths: Vec<String> = extracted.iter().map(|p| p.display().to_string()).collect();

    sections::merge_section(state, &target.run_id, target.section_index, &target.label, paths)
        .await;

    Ok(format!(
        "accepted {} image(s) for run {} section {}",
        count, target.run_id, target.section_index
    ))
}

async fn handle_section_image(
    state: &AppState,
    params: &UploadParams,
    filename_hint: Option<String>,
    bytes: &[u8],
) -> ApiResult<String> {
    let target = resolve_section_target(state, params).await?;

    fs::create_dir_all(&target.dir)?;
    let filename = filename_hint
        .map(|n| sanitize_component(&n))
        .unwrap_or_else(|| format!("frame_{}.png", Utc::now().timestamp_millis()));
    let path = target.dir.join(filename);
    fs::write(&path, bytes)?;

    sections::merge_section(
        state,
        &target.run_id,
        target.section_index,
        &target.label,
        vec![path.display().to_string()],
    )
    .await;

    Ok(format!(
        "accepted image for run {} section {}",
        target.run_id, target.section_index
    ))
}

async fn handle_burst_image(
    state: &AppState,
    params: &UploadParams,
    filename_hint: Option<String>,
    bytes: &[u8],
) -> ApiResult<String> {
    let session_id = params
        .session_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest("Missing sessionId for burst upload".to_string()))?;

    let dir = state.root_folder.join("bursts").join(sanitize_component(&session_id));
    fs::create_dir_all(&dir)?;
    let filename = filename_hint
        .map(|n| sanitize_component(&n))
        .unwrap_or_else(|| format!("img_{}.png", Uuid::new_v4()));
    let path = dir.join(filename);
    fs::write(&path, bytes)?;

    let progress = state
        .burst_tracker
        .add_image(&session_id, path.display().to_string())
        .await;

    match progress {
        BurstProgress::Accumulating { count } => {
            state.event_bus.emit(IngestEvent::BurstImageReceived {
                session_id: session_id.clone(),
                current_count: count,
                timestamp: Utc::now(),
            });
            Ok(format!(
                "accepted image {}/{} for session {}",
                count, BURST_SIZE, session_id
            ))
        }
        BurstProgress::Finalized { images } => {
            state.event_bus.emit(IngestEvent::BurstImageReceived {
                session_id: session_id.clone(),
                current_count: images.len(),
                timestamp: Utc::now(),
            });
            state.event_bus.emit(IngestEvent::BurstFinalized {
                session_id: session_id.clone(),
                image_count: images.len(),
                timestamp: Utc::now(),
            });

            let pool = state.db.clone();
            let env_cache = state.env_cache.clone();
            let provider = state.location.clone();
            let timeout = state.location_timeout;
            let finalized_id = session_id.clone();
            state.write_queue.enqueue("upsert_burst_session", async move {
                let resolved_location = location::resolve(provider.as_ref(), timeout).await;
                let env = env_cache.take(&finalized_id).await;
                db::sessions::upsert_burst_session(
                    &pool,
                    &finalized_id,
                    &images,
                    &resolved_location,
                    env.as_ref(),
                )
                .await
            });

            Ok(format!("session {} complete", session_id))
        }
        BurstProgress::AlreadyFinalized { .. } => Ok(format!(
            "session {} already finalized; image stored",
            session_id
        )),
    }
}

async fn handle_calibration_frame(
    state: &AppState,
    params: &UploadParams,
    bytes: &[u8],
) -> ApiResult<String> {
    let run_id = params
        .run_id
        .clone()
        .or_else(|| params.session_id.clone())
        .ok_or_else(|| ApiError::BadRequest("Missing runId for calibration upload".to_string()))?;

    let wavelength = params.wavelength.clone().unwrap_or_default();
    let path = calibration::store_calibration_frame(
        state,
        &run_id,
        params.channel,
        params.image_type.as_deref(),
        &wavelength,
        bytes,
    )
    .await?;

    Ok(format!(
        "calibration frame stored as {}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_kind_is_exhaustive_over_format_and_mode() {
        assert_eq!(
            dispatch_kind(UploadFormat::Json, UploadMode::Sectioned),
            UploadKind::Metadata
        );
        assert_eq!(
            dispatch_kind(UploadFormat::Zip, UploadMode::Sectioned),
            UploadKind::SectionArchive
        );
        assert_eq!(
            dispatch_kind(UploadFormat::Raw, UploadMode::Sectioned),
            UploadKind::SectionImage
        );
        assert_eq!(
            dispatch_kind(UploadFormat::Raw, UploadMode::Calibration),
            UploadKind::CalibrationFrame
        );
        assert_eq!(
            dispatch_kind(UploadFormat::Raw, UploadMode::Burst),
            UploadKind::BurstImage
        );
        // A ZIP outside sectioned mode is just an opaque file for its mode.
        assert_eq!(
            dispatch_kind(UploadFormat::Zip, UploadMode::Burst),
            UploadKind::BurstImage
        );
    }

    #[test]
    fn disposition_filename_parsing() {
        assert_eq!(
            parse_disposition_filename("attachment; filename=\"scan_001.zip\""),
            Some("scan_001.zip".to_string())
        );
        assert_eq!(
            parse_disposition_filename("attachment; filename=frame.png"),
            Some("frame.png".to_string())
        );
        assert_eq!(parse_disposition_filename("inline"), None);
    }
}
