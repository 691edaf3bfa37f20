//! Best-effort device location resolution
//!
//! Durable records carry a formatted coordinate string when the platform can
//! produce one within the bound, and an explicit unavailable marker
//! otherwise. Resolution never fails the caller and never outlives its
//! timeout.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Marker stored when no coordinate could be resolved in time.
pub const LOCATION_UNAVAILABLE: &str = "location not available";

/// A resolved device coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Source of device coordinates
///
/// The production implementation asks the host platform's location bridge;
/// tests substitute stubs.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Query the current device location. `Ok(None)` means the platform
    /// answered but has no fix.
    async fn current_location(&self) -> anyhow::Result<Option<Coordinates>>;
}

/// Resolve the current location within `timeout`.
///
/// Races the provider against the deadline; whichever completes first wins
/// and the loser is dropped. Every failure path (timeout, provider error,
/// no fix) degrades to the unavailable marker.
pub async fn resolve(provider: &dyn LocationProvider, timeout: Duration) -> String {
    match tokio::time::timeout(timeout, provider.current_location()).await {
        Ok(Ok(Some(coords))) => format!("{:.6}, {:.6}", coords.lat, coords.lon),
        Ok(Ok(None)) => {
            debug!("Location provider has no fix");
            LOCATION_UNAVAILABLE.to_string()
        }
        Ok(Err(e)) => {
            warn!("Location provider failed: {}", e);
            LOCATION_UNAVAILABLE.to_string()
        }
        Err(_) => {
            warn!("Location resolution timed out after {:?}", timeout);
            LOCATION_UNAVAILABLE.to_string()
        }
    }
}

/// Location provider backed by the device platform bridge
///
/// The host application exposes the platform location service on a local
/// HTTP endpoint; this client queries it with its own transport timeout so a
/// dead bridge surfaces as an error rather than a hang.
pub struct BridgeLocationProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(alias = "latitude")]
    lat: Option<f64>,
    #[serde(alias = "longitude")]
    lon: Option<f64>,
}

impl BridgeLocationProvider {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }
}

#[async_trait]
impl LocationProvider for BridgeLocationProvider {
    async fn current_location(&self) -> anyhow::Result<Option<Coordinates>> {
        let response = self.client.get(&self.endpoint).send().await?;
        let body: BridgeResponse = response.error_for_status()?.json().await?;
        match (body.lat, body.lon) {
            (Some(lat), Some(lon)) => Ok(Some(Coordinates { lat, lon })),
            _ => Ok(None),
        }
    }
}
