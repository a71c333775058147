//! HTTP/SSE server for the command surface and the live event stream.
//!
//! ```text
//! +--------------------------------------------------+
//! |  Axum HTTP Server                                |
//! |  /health                     -> liveness         |
//! |  /api/recording/*            -> capture session  |
//! |  /api/screenshot(s)/*        -> screenshots      |
//! |  /api/voice/*                -> transcription    |
//! |  /api/workflow/generate      -> synthesis queue  |
//! |  /api/analysis/*             -> analysis jobs    |
//! |  /api/activity/*             -> usage queries    |
//! |  /api/system/*               -> folders          |
//! |  /api/events                 -> SSE snapshot+tail|
//! +--------------------------------------------------+
//! ```

mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::state::AppContext;

/// Create the router with all routes configured. Separated from
/// `start_server` so handler tests can drive it directly.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/recording/start", post(handlers::start_recording))
        .route("/api/recording/stop", post(handlers::stop_recording))
        .route("/api/recording/status", get(handlers::recording_status))
        .route("/api/recordings/list", get(handlers::list_recordings))
        .route("/api/screenshot/capture", post(handlers::capture_screenshot))
        .route("/api/screenshots/list", get(handlers::list_screenshots))
        .route("/api/voice/start", post(handlers::start_voice))
        .route("/api/voice/stop", post(handlers::stop_voice))
        .route("/api/voice/status", get(handlers::voice_status))
        .route("/api/voice/transcripts", get(handlers::list_transcripts))
        .route("/api/workflow/generate", post(handlers::generate_workflow))
        .route("/api/analysis/quick", post(handlers::quick_analysis))
        .route("/api/analysis/detailed", post(handlers::detailed_analysis))
        .route("/api/activity/status", get(handlers::activity_status))
        .route("/api/activity/usage", get(handlers::usage))
        .route("/api/activity/chart-data", get(handlers::chart_data))
        .route("/api/system/folders", get(handlers::folders))
        .route("/api/system/open-folder", post(handlers::open_folder))
        .route("/api/events", get(handlers::events))
        .with_state(ctx)
}

/// Bind and serve. Returns the actual bound address (useful with port 0)
/// plus a token that triggers graceful shutdown.
pub async fn start_server(
    ctx: Arc<AppContext>,
    addr: SocketAddr,
) -> anyhow::Result<(SocketAddr, CancellationToken)> {
    let app = create_router(ctx);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("HTTP server listening on {}", actual_addr);

    let shutdown_token = CancellationToken::new();
    let server_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!("server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::SessionState;
    use crate::capture::device::{CaptureBackend, CaptureStream};
    use crate::error::Result;
    use crate::settings::TraqSettings;
    use crate::state::Backends;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::path::Path;
    use tower::ServiceExt;

    struct LoopingCaptureBackend;

    #[async_trait]
    impl CaptureBackend for LoopingCaptureBackend {
        async fn open(&self, _output: &Path, _fps: u32) -> Result<Box<dyn CaptureStream>> {
            Ok(Box::new(LoopingCaptureStream))
        }
    }

    struct LoopingCaptureStream;

    #[async_trait]
    impl CaptureStream for LoopingCaptureStream {
        async fn record_frame(&mut self) -> Result<()> {
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn test_context(dir: &tempfile::TempDir, working_capture: bool) -> Arc<AppContext> {
        let mut settings = TraqSettings::default();
        settings.data.dir = dir.path().to_path_buf();
        let mut backends = Backends::disabled();
        if working_capture {
            backends.capture = Arc::new(LoopingCaptureBackend);
        }
        AppContext::new(settings, backends)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok_with_version() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn recording_round_trip_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, true);
        let app = create_router(ctx.clone());

        let response = app
            .clone()
            .oneshot(post_json("/api/recording/start", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["recording"], true);
        assert!(json["filename"].as_str().unwrap().starts_with("recording_"));

        let response = app
            .clone()
            .oneshot(get_request("/api/recording/status"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["recording"], true);
        assert_eq!(json["state"], "active");

        let response = app
            .clone()
            .oneshot(post_json("/api/recording/stop", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.capture.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn lifecycle_violations_map_to_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, true);
        let app = create_router(ctx);

        // Stop with nothing active.
        let response = app
            .clone()
            .oneshot(post_json("/api/recording/stop", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], "NOT_ACTIVE");

        // Double start.
        app.clone()
            .oneshot(post_json("/api/recording/start", "{}"))
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(post_json("/api/recording/start", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], "ALREADY_ACTIVE");
    }

    #[tokio::test]
    async fn unconfigured_devices_report_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        for uri in [
            "/api/recording/start",
            "/api/voice/start",
            "/api/screenshot/capture",
        ] {
            let response = app.clone().oneshot(post_json(uri, "{}")).await.unwrap();
            assert_eq!(
                response.status(),
                StatusCode::SERVICE_UNAVAILABLE,
                "unexpected status for {uri}"
            );
        }
    }

    #[tokio::test]
    async fn workflow_generation_is_accepted_not_streamed_inline() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/workflow/generate",
                r#"{"transcript": "open terminal, run git status"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["accepted"], true);
        assert!(json["request_id"].is_string());

        // Too short to synthesize.
        let response = app
            .clone()
            .oneshot(post_json("/api/workflow/generate", r#"{"transcript": "hi"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analysis_requires_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        let response = app
            .clone()
            .oneshot(post_json("/api/analysis/quick", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/analysis/detailed",
                r#"{"text": "wrote the quarterly report"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn usage_endpoint_validates_dates() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        let response = app
            .clone()
            .oneshot(get_request("/api/activity/usage?date=not-a-date"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(get_request("/api/activity/usage?date=2026-08-07"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 0);
    }

    #[tokio::test]
    async fn listings_are_empty_on_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        for uri in [
            "/api/recordings/list",
            "/api/screenshots/list",
            "/api/voice/transcripts",
        ] {
            let response = app.clone().oneshot(get_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "unexpected status for {uri}");
            let json = body_json(response).await;
            assert_eq!(json["count"], 0, "unexpected count for {uri}");
        }
    }

    #[tokio::test]
    async fn event_stream_is_server_sent_events() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        let response = app.oneshot(get_request("/api/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("text/event-stream"));
    }

    #[tokio::test]
    async fn folders_reports_the_artifact_layout() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        let response = app.oneshot(get_request("/api/system/folders")).await.unwrap();
        let json = body_json(response).await;
        for key in ["recordings", "screenshots", "transcripts", "workflows", "analyses"] {
            assert!(
                json[key].as_str().unwrap().contains(key),
                "folder path for {key} missing"
            );
        }
    }

    #[tokio::test]
    async fn open_folder_rejects_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_context(&dir, false));

        let response = app
            .oneshot(post_json(
                "/api/system/open-folder",
                r#"{"path": "/definitely/not/here"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_server_binds_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(&dir, false);
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let (bound, shutdown) = start_server(ctx, addr).await.unwrap();
        assert!(bound.port() > 0);
        assert!(!shutdown.is_cancelled());
        shutdown.cancel();
    }
}
