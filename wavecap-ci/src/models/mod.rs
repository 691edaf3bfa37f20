//! Data types for the capture-ingest service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a durable capture session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Burst,
    Sectioned,
    Calibration,
}

impl SessionKind {
    /// Stable column value for the durable store
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Burst => "BURST",
            SessionKind::Sectioned => "SECTIONED",
            SessionKind::Calibration => "CALIBRATION",
        }
    }

    pub fn from_db_value(s: &str) -> Option<Self> {
        match s {
            "BURST" => Some(SessionKind::Burst),
            "SECTIONED" => Some(SessionKind::Sectioned),
            "CALIBRATION" => Some(SessionKind::Calibration),
            _ => None,
        }
    }
}

/// Durable capture session record (one row per (run_id, section_index))
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub kind: SessionKind,
    pub run_id: String,
    pub section_index: u32,
    pub label: Option<String>,
    pub image_paths: Vec<String>,
    pub location: Option<String>,
    pub env_temp_c: Option<f64>,
    pub env_humidity: Option<f64>,
    pub env_timestamp_utc: Option<String>,
    pub config_name: Option<String>,
}

/// Durable calibration run record
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRecord {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Channel key ("dark" or zero-padded index) to stored image path
    pub channel_paths: std::collections::BTreeMap<String, String>,
    /// Channel key to wavelength label
    pub channel_labels: std::collections::BTreeMap<String, String>,
    pub normalization_json: Option<String>,
    pub results_json: Option<String>,
    pub target_intensity: Option<f64>,
}

/// Environment reading attached to a run, immediately or retroactively
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvReading {
    pub temp_c: f64,
    pub humidity: f64,
    pub ts_utc: String,
}

/// Environment metadata body uploaded by the controller
///
/// The run identifier is mandatory; a metadata blob that cannot be tied to a
/// run is a client error.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvMetadata {
    #[serde(alias = "runId")]
    pub run_id: String,
    pub temp_c: f64,
    pub humidity: f64,
    pub ts_utc: String,
}

/// Calibration metadata body (normalization factors, result set)
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationMetadata {
    #[serde(alias = "runId")]
    pub run_id: String,
    #[serde(default)]
    pub normalization: Option<serde_json::Value>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
    #[serde(default)]
    pub target_intensity: Option<f64>,
}

/// Recognized query parameters of `POST /upload`
///
/// Controllers in the field send several spellings for the same knob; the
/// aliases here absorb all of them so the handlers never re-read raw strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadParams {
    #[serde(rename = "sessionId", alias = "sid")]
    pub session_id: Option<String>,
    pub mode: Option<String>,
    /// Human-readable section/profile name
    pub section: Option<String>,
    #[serde(rename = "runId")]
    pub run_id: Option<String>,
    /// Recipe/configuration file name for the run
    pub ini: Option<String>,
    #[serde(rename = "sectionIndex")]
    pub section_index: Option<u32>,
    pub part: Option<String>,
    #[serde(alias = "channel_index")]
    pub channel: Option<u32>,
    pub wavelength: Option<String>,
    pub image_type: Option<String>,
    #[serde(
        rename = "framesPerSection",
        alias = "sectionFrames",
        alias = "sectionTotalFrames"
    )]
    pub frames_per_section: Option<u32>,
    #[serde(rename = "totalFrames")]
    pub total_frames: Option<u32>,
    #[serde(rename = "totalSections")]
    pub total_sections: Option<u32>,
    pub filename: Option<String>,
}

/// Upload mode declared by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Burst,
    Sectioned,
    Calibration,
}

impl UploadParams {
    /// Declared mode; anything unrecognized falls back to burst.
    pub fn mode(&self) -> UploadMode {
        match self.mode.as_deref() {
            Some("sectioned") => UploadMode::Sectioned,
            Some("calibration") => UploadMode::Calibration,
            _ => UploadMode::Burst,
        }
    }
}
