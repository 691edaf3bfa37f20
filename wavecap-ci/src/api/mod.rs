//! HTTP API for wavecap-ci

mod debug;
mod health;
mod sse;
mod upload;

pub use debug::debug_dump;
pub use health::health_check;
pub use sse::event_stream;
pub use upload::upload;

use axum::http::StatusCode;

/// Fallback for unknown paths
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}
