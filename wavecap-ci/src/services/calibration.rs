//! Calibration frame handling
//!
//! Calibration runs capture one reference frame per illumination channel
//! plus dark frames. Filenames are deterministic so a retried frame lands on
//! the same path instead of accumulating copies.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use wavecap_common::events::IngestEvent;
use wavecap_common::Result;

use crate::db;
use crate::AppState;

/// Deterministic filename and channel key for a calibration frame.
///
/// Dark frames (empty wavelength) get the dark-specific name; lit frames
/// the zero-padded channel name; frames with neither fall back to a
/// timestamp-based name.
pub fn frame_filename(channel: Option<u32>, image_type: Option<&str>) -> (String, String) {
    let is_dark = image_type
        .map(|t| t.eq_ignore_ascii_case("dark"))
        .unwrap_or(false);

    if is_dark {
        let index = channel.unwrap_or(0);
        (format!("dark_{:02}.png", index), "dark".to_string())
    } else if let Some(index) = channel {
        (format!("channel_{:02}.png", index), format!("{:02}", index))
    } else {
        let millis = Utc::now().timestamp_millis();
        (format!("frame_{}.png", millis), format!("frame_{}", millis))
    }
}

/// Store one calibration frame and merge it into the run's durable record.
///
/// The file write is synchronous (acceptance requires the frame on disk);
/// the record merge rides the write queue.
pub async fn store_calibration_frame(
    state: &AppState,
    run_id: &str,
    channel: Option<u32>,
    image_type: Option<&str>,
    wavelength: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let (filename, channel_key) = frame_filename(channel, image_type);

    let run_dir = state
        .root_folder
        .join("calibration")
        .join(super::sanitize_component(run_id));
    fs::create_dir_all(&run_dir)?;
    let path = run_dir.join(&filename);
    fs::write(&path, bytes)?;

    state.event_bus.emit(IngestEvent::CalibrationFrameStored {
        run_id: run_id.to_string(),
        channel: channel_key.clone(),
        timestamp: Utc::now(),
    });

    let pool = state.db.clone();
    let run_id = run_id.to_string();
    let wavelength = wavelength.to_string();
    let stored_path = path.display().to_string();
    state.write_queue.enqueue("upsert_calibration_image", async move {
        db::calibration::upsert_calibration_image(
            &pool,
            &run_id,
            &channel_key,
            &stored_path,
            &wavelength,
        )
        .await
    });

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dark_frames_get_dark_names() {
        let (name, key) = frame_filename(Some(3), Some("dark"));
        assert_eq!(name, "dark_03.png");
        assert_eq!(key, "dark");

        let (name, _) = frame_filename(None, Some("DARK"));
        assert_eq!(name, "dark_00.png");
    }

    #[test]
    fn lit_frames_get_zero_padded_channel_names() {
        let (name, key) = frame_filename(Some(7), None);
        assert_eq!(name, "channel_07.png");
        assert_eq!(key, "07");

        let (name, _) = frame_filename(Some(12), Some("lit"));
        assert_eq!(name, "channel_12.png");
    }

    #[test]
    fn unidentified_frames_fall_back_to_timestamp_names() {
        let (name, key) = frame_filename(None, None);
        assert!(name.starts_with("frame_"));
        assert!(name.ends_with(".png"));
        assert!(key.starts_with("frame_"));
    }
}
