//! Health check endpoint

/// GET /health
///
/// The controller firmware polls this before starting an upload series and
/// expects the literal body `OK`.
pub async fn health_check() -> &'static str {
    "OK"
}
