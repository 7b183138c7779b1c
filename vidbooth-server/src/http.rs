//! Vidbooth HTTP REST API
//!
//! Axum-based endpoint layer exposing the session lifecycle to kiosk
//! devices and visitors' phones.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function. The inner functions are directly testable without axum
//! dispatch machinery.
//!
//! Endpoints:
//! - GET  /api/health                    — liveness
//! - POST /api/start-recording           — create session, notify displays
//! - POST /api/stop-recording/:id        — optional upload, QR, completion
//! - GET  /api/download/:id              — stream the stored video
//! - GET  /api/session/:id               — session snapshot
//! - GET  /ws                            — display notification channel
//! - GET  /uploads/*                     — static read-only upload dir

use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Host, Multipart, Path, State, WebSocketUpgrade};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use vidbooth_core::qr::QrEncoder;
use vidbooth_core::{SessionStatus, SessionStore, VidboothConfig};

use crate::bus::{handle_socket, Envelope, NotificationBus};
use crate::upload::{receive_video, StoredVideo};

/// Slack on top of the upload cap for multipart framing overhead.
const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: SessionStore,
    pub bus: NotificationBus,
    pub qr: Arc<dyn QrEncoder>,
    pub config: VidboothConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let upload_dir = state.config.upload_dir();
    let body_limit = state.config.storage.max_upload_bytes + BODY_LIMIT_SLACK;

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/start-recording", post(start_recording_handler))
        .route("/api/stop-recording/:session_id", post(stop_recording_handler))
        .route("/api/download/:session_id", get(download_handler))
        .route("/api/session/:session_id", get(session_handler))
        .route("/ws", get(ws_handler))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.service.host, state.config.service.port
    );
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Vidbooth API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health — static liveness plus the live session count.
pub fn health_inner(store: &SessionStore) -> (StatusCode, Value) {
    (
        StatusCode::OK,
        json!({
            "status": "OK",
            "message": "Video Kiosk API is running",
            "version": env!("CARGO_PKG_VERSION"),
            "activeSessions": store.len(),
        }),
    )
}

/// Inner start-recording — create a session and notify every display.
pub fn start_recording_inner(store: &SessionStore, bus: &NotificationBus) -> (StatusCode, Value) {
    let session = store.create();
    let receivers = bus.broadcast(Envelope::start_recording(session.id));

    tracing::info!(
        "Recording started: session {} ({} displays notified)",
        session.id,
        receivers
    );

    (
        StatusCode::OK,
        json!({
            "success": true,
            "sessionId": session.id,
            "message": "Recording started",
        }),
    )
}

/// Inner stop-recording — optional upload, QR encoding, then the single
/// completion mutation. Nothing in the session record changes until the
/// encoder has succeeded, so an encoder failure leaves the session
/// queryable in `recording` with no half-written fields.
pub async fn stop_recording_inner(
    state: &HttpState,
    raw_session_id: &str,
    host: &str,
    multipart: Option<Multipart>,
) -> (StatusCode, Value) {
    let session_id = match parse_session_id(raw_session_id) {
        Some(id) => id,
        None => return not_found("Session not found"),
    };
    let session = match state.store.get(session_id) {
        Some(s) => s,
        None => return not_found("Session not found"),
    };
    if session.is_completed() {
        return (
            StatusCode::CONFLICT,
            json!({ "error": "Session already completed" }),
        );
    }

    let stored = match multipart {
        Some(multipart) => {
            let dir = state.config.upload_dir();
            match receive_video(multipart, &dir, state.config.storage.max_upload_bytes).await {
                Ok(stored) => stored,
                Err(e) if e.is_rejection() => {
                    tracing::warn!("Upload rejected for session {}: {}", session_id, e);
                    return (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }));
                }
                Err(e) => {
                    tracing::error!("Upload storage failed for session {}: {}", session_id, e);
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error": "Failed to store video" }),
                    );
                }
            }
        }
        None => None,
    };

    if stored.is_none() {
        tracing::info!(
            "No video uploaded for session {}, continuing with QR generation",
            session_id
        );
    }

    let download_url = download_url_for(&state.config, host, session_id);

    let qr_payload = match state.qr.encode(&download_url).await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("QR encoding failed for session {}: {}", session_id, e);
            discard_upload(&stored).await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to generate QR code" }),
            );
        }
    };

    let video_path = stored
        .as_ref()
        .map(|v| v.path.to_string_lossy().into_owned());
    let end_time = Utc::now();

    // One guarded mutation: skipped entirely if the reaper removed the
    // session while we were suspended on the upload or the encoder, and a
    // no-op if a concurrent stop already completed it.
    let mut already_completed = false;
    let updated = state.store.update(session_id, |s| {
        if s.is_completed() {
            already_completed = true;
            return;
        }
        s.status = SessionStatus::Completed;
        s.end_time = Some(end_time);
        s.video_path = video_path.clone();
        s.qr_code = Some(qr_payload.clone());
    });

    if updated.is_none() {
        tracing::warn!("Session {} reaped during stop-recording", session_id);
        discard_upload(&stored).await;
        return not_found("Session not found");
    }
    if already_completed {
        discard_upload(&stored).await;
        return (
            StatusCode::CONFLICT,
            json!({ "error": "Session already completed" }),
        );
    }

    state.bus.broadcast(Envelope::recording_completed(
        session_id,
        &qr_payload,
        &download_url,
    ));

    tracing::info!("Recording completed: session {}", session_id);

    (
        StatusCode::OK,
        json!({
            "success": true,
            "qrCode": qr_payload,
            "downloadUrl": download_url,
            "message": "Recording completed and QR code generated",
        }),
    )
}

/// Inner get-session — full snapshot or 404.
pub fn session_inner(store: &SessionStore, raw_session_id: &str) -> (StatusCode, Value) {
    let session = parse_session_id(raw_session_id).and_then(|id| store.get(id));
    match session {
        Some(session) => match serde_json::to_value(&session) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }),
            ),
        },
        None => not_found("Session not found"),
    }
}

/// Inner download — resolve the session to an open file handle.
/// A file missing on disk is NotFound, not a server fault.
pub async fn download_inner(
    store: &SessionStore,
    raw_session_id: &str,
) -> std::result::Result<(tokio::fs::File, u64), (StatusCode, Value)> {
    let session = parse_session_id(raw_session_id)
        .and_then(|id| store.get(id))
        .ok_or_else(|| not_found("Session not found"))?;

    let path = session
        .video_path
        .ok_or_else(|| not_found("Video not available yet"))?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(not_found("Video file not found"));
        }
        Err(e) => {
            tracing::error!("Failed to open {} for download: {}", path, e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to read video" }),
            ));
        }
    };

    let size = file
        .metadata()
        .await
        .map_err(|e| {
            tracing::error!("Failed to stat {}: {}", path, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Failed to read video" }),
            )
        })?
        .len();

    Ok((file, size))
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.store);
    (status, Json(body))
}

pub async fn start_recording_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = start_recording_inner(&state.store, &state.bus);
    (status, Json(body))
}

pub async fn stop_recording_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
    Host(host): Host,
    multipart: Option<Multipart>,
) -> impl IntoResponse {
    let (status, body) = stop_recording_inner(&state, &session_id, &host, multipart).await;
    (status, Json(body))
}

pub async fn download_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
) -> Response {
    match download_inner(&state.store, &session_id).await {
        Ok((file, size)) => {
            let headers: [(HeaderName, String); 3] = [
                (header::CONTENT_TYPE, "video/mp4".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"kiosk-video-{}.mp4\"", session_id),
                ),
                (header::CONTENT_LENGTH, size.to_string()),
            ];
            (StatusCode::OK, headers, Body::from_stream(ReaderStream::new(file))).into_response()
        }
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

pub async fn session_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = session_inner(&state.store, &session_id);
    (status, Json(body))
}

pub async fn ws_handler(
    State(state): State<Arc<HttpState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let bus = state.bus.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, bus))
}

// ============================================================================
// Helpers
// ============================================================================

/// Download URL seen by the visitor's phone: the configured public base URL
/// when set, otherwise the request's own Host header.
pub fn download_url_for(config: &VidboothConfig, host: &str, session_id: Uuid) -> String {
    match &config.service.public_url {
        Some(base) => format!("{}/api/download/{}", base.trim_end_matches('/'), session_id),
        None => format!("http://{}/api/download/{}", host, session_id),
    }
}

/// Unknown tokens map to NotFound, like any unknown session id.
fn parse_session_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

fn not_found(message: &str) -> (StatusCode, Value) {
    (StatusCode::NOT_FOUND, json!({ "error": message }))
}

async fn discard_upload(stored: &Option<StoredVideo>) {
    if let Some(video) = stored {
        if let Err(e) = tokio::fs::remove_file(&video.path).await {
            tracing::warn!("Failed to discard upload {}: {}", video.path.display(), e);
        }
    }
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vidbooth_core::qr::{PngQrEncoder, QrError};

    struct FailingQrEncoder;

    #[async_trait]
    impl QrEncoder for FailingQrEncoder {
        async fn encode(&self, _url: &str) -> std::result::Result<String, QrError> {
            Err(QrError::Encode("renderer offline".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn make_state(dir: &std::path::Path, qr: Arc<dyn QrEncoder>) -> HttpState {
        let mut config = VidboothConfig::default();
        config.storage.upload_dir = dir.to_string_lossy().into_owned();
        HttpState {
            store: SessionStore::new(),
            bus: NotificationBus::new(16),
            qr,
            config,
        }
    }

    // ========================================================================
    // TEST 1: health reports OK and the live session count
    // ========================================================================
    #[test]
    fn test_health_inner() {
        let store = SessionStore::new();
        store.create();

        let (status, body) = health_inner(&store);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert!(body["message"].is_string());
        assert_eq!(body["activeSessions"], 1);
    }

    // ========================================================================
    // TEST 2: start-recording creates a retrievable session and notifies
    // ========================================================================
    #[test]
    fn test_start_recording_inner() {
        let store = SessionStore::new();
        let bus = NotificationBus::new(16);
        let mut rx = bus.subscribe();

        let (status, body) = start_recording_inner(&store, &bus);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let session_id: Uuid = body["sessionId"].as_str().unwrap().parse().unwrap();
        let session = store.get(session_id).expect("session must be retrievable");
        assert_eq!(session.status, SessionStatus::Recording);

        let event = rx.try_recv().expect("start event must be broadcast");
        assert_eq!(event.event, crate::bus::START_RECORDING);
        assert_eq!(event.data["sessionId"], session_id.to_string());
    }

    // ========================================================================
    // TEST 3: stop-recording on an unknown id is 404 and creates nothing
    // ========================================================================
    #[tokio::test]
    async fn test_stop_recording_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), Arc::new(PngQrEncoder::new()));

        let (status, body) =
            stop_recording_inner(&state, &Uuid::new_v4().to_string(), "localhost:5000", None)
                .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");
        assert!(state.store.is_empty());
    }

    // ========================================================================
    // TEST 4: non-uuid token behaves like any unknown session
    // ========================================================================
    #[tokio::test]
    async fn test_stop_recording_malformed_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), Arc::new(PngQrEncoder::new()));

        let (status, _) =
            stop_recording_inner(&state, "not-a-session", "localhost:5000", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ========================================================================
    // TEST 5: stop without an upload completes with videoPath null
    // ========================================================================
    #[tokio::test]
    async fn test_stop_recording_without_upload_completes() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), Arc::new(PngQrEncoder::new()));
        let session = state.store.create();
        let mut rx = state.bus.subscribe();

        let (status, body) =
            stop_recording_inner(&state, &session.id.to_string(), "localhost:5000", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["qrCode"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert!(body["downloadUrl"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/api/download/{}", session.id)));

        let updated = state.store.get(session.id).unwrap();
        assert!(updated.is_completed());
        assert!(updated.end_time.is_some());
        assert!(updated.video_path.is_none());
        assert!(updated.qr_code.is_some());

        let event = rx.try_recv().expect("completion event must be broadcast");
        assert_eq!(event.event, crate::bus::RECORDING_COMPLETED);
        assert_eq!(event.data["downloadUrl"], body["downloadUrl"]);
    }

    // ========================================================================
    // TEST 6: encoder failure is 500 and leaves the session recording
    // ========================================================================
    #[tokio::test]
    async fn test_stop_recording_encoder_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), Arc::new(FailingQrEncoder));
        let session = state.store.create();

        let (status, body) =
            stop_recording_inner(&state, &session.id.to_string(), "localhost:5000", None).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to generate QR code");

        let unchanged = state.store.get(session.id).unwrap();
        assert_eq!(unchanged.status, SessionStatus::Recording);
        assert!(unchanged.end_time.is_none());
        assert!(unchanged.qr_code.is_none());
    }

    // ========================================================================
    // TEST 7: second stop on a completed session is 409
    // ========================================================================
    #[tokio::test]
    async fn test_stop_recording_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(dir.path(), Arc::new(PngQrEncoder::new()));
        let session = state.store.create();

        let (first, _) =
            stop_recording_inner(&state, &session.id.to_string(), "localhost:5000", None).await;
        assert_eq!(first, StatusCode::OK);

        let (second, body) =
            stop_recording_inner(&state, &session.id.to_string(), "localhost:5000", None).await;
        assert_eq!(second, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Session already completed");
    }

    // ========================================================================
    // TEST 8: session snapshot round trip and 404
    // ========================================================================
    #[test]
    fn test_session_inner() {
        let store = SessionStore::new();
        let session = store.create();

        let (status, body) = session_inner(&store, &session.id.to_string());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], session.id.to_string());
        assert_eq!(body["status"], "recording");

        let (status, body) = session_inner(&store, &Uuid::new_v4().to_string());
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");
    }

    // ========================================================================
    // TEST 9: download before completion is "Video not available yet"
    // ========================================================================
    #[tokio::test]
    async fn test_download_inner_before_stop() {
        let store = SessionStore::new();
        let session = store.create();

        let err = download_inner(&store, &session.id.to_string())
            .await
            .expect_err("no file yet");
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(err.1["error"], "Video not available yet");
    }

    // ========================================================================
    // TEST 10: file deleted externally still 404s despite a videoPath
    // ========================================================================
    #[tokio::test]
    async fn test_download_inner_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new();
        let session = store.create();
        store.update(session.id, |s| {
            s.video_path = Some(
                dir.path()
                    .join("vanished.mp4")
                    .to_string_lossy()
                    .into_owned(),
            );
        });

        let err = download_inner(&store, &session.id.to_string())
            .await
            .expect_err("file is gone");
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(err.1["error"], "Video file not found");
    }

    // ========================================================================
    // TEST 11: download resolves a stored file with its size
    // ========================================================================
    #[tokio::test]
    async fn test_download_inner_resolves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video-7-7.mp4");
        std::fs::write(&path, b"mp4 bytes").unwrap();

        let store = SessionStore::new();
        let session = store.create();
        store.update(session.id, |s| {
            s.video_path = Some(path.to_string_lossy().into_owned());
        });

        let (_file, size) = download_inner(&store, &session.id.to_string())
            .await
            .expect("stored file must resolve");
        assert_eq!(size, 9);
    }

    // ========================================================================
    // TEST 12: public_url wins over the Host header
    // ========================================================================
    #[test]
    fn test_download_url_for() {
        let id = Uuid::new_v4();
        let mut config = VidboothConfig::default();

        let from_host = download_url_for(&config, "kiosk.local:5000", id);
        assert_eq!(from_host, format!("http://kiosk.local:5000/api/download/{}", id));

        config.service.public_url = Some("https://booth.example.com/".to_string());
        let from_config = download_url_for(&config, "kiosk.local:5000", id);
        assert_eq!(
            from_config,
            format!("https://booth.example.com/api/download/{}", id)
        );
    }
}
