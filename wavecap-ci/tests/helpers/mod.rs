//! Shared helpers for wavecap-ci integration tests

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wavecap_ci::services::location::{Coordinates, LocationProvider};
use wavecap_ci::{build_router, AppState};
use wavecap_common::events::EventBus;
use zip::write::SimpleFileOptions;

/// Fixed location returned by the stub provider.
pub const STUB_LOCATION: &str = "1.500000, 2.500000";

struct StubLocationProvider;

#[async_trait]
impl LocationProvider for StubLocationProvider {
    async fn current_location(&self) -> anyhow::Result<Option<Coordinates>> {
        Ok(Some(Coordinates { lat: 1.5, lon: 2.5 }))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    _root: tempfile::TempDir,
}

/// App state over an in-memory database, a temp root folder, and a stub
/// location provider.
pub async fn test_app() -> TestApp {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    wavecap_ci::db::init_tables(&pool).await.unwrap();

    let root = tempfile::tempdir().unwrap();
    let event_bus = EventBus::new(256);
    let state = AppState::new(
        pool,
        event_bus,
        Arc::new(StubLocationProvider),
        root.path().to_path_buf(),
        Duration::from_millis(200),
    );

    TestApp {
        router: build_router(state.clone()),
        state,
        _root: root,
    }
}

/// POST a raw body to the given uri and return (status, body text).
pub async fn post(router: &Router, uri: &str, body: &[u8], content_type: Option<&str>) -> (StatusCode, String) {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body.to_vec())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// GET the given uri and return (status, body text).
pub async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Build an in-memory ZIP with the given members.
pub fn build_zip(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();
        for (name, contents) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// A multipart/form-data body with one file part.
pub fn multipart_body(boundary: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
