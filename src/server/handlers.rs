//! HTTP handlers for the command surface and the live event stream.
//!
//! Commands return success data or a structured error synchronously;
//! AI-backed operations acknowledge and deliver their results only via the
//! event stream.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, Stream, StreamExt};

use super::types::*;
use crate::bus::events::EventKind;
use crate::error::TraqError;
use crate::state::AppContext;
use crate::storage::ArtifactKind;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

// =============================================================================
// Recording
// =============================================================================

pub async fn start_recording(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<RecordingControlResponse>, ApiError> {
    let info = ctx.capture.start().await?;
    Ok(Json(RecordingControlResponse {
        success: true,
        recording: true,
        filename: info
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned()),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

pub async fn stop_recording(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<RecordingControlResponse>, ApiError> {
    let info = ctx.capture.stop().await?;
    Ok(Json(RecordingControlResponse {
        success: true,
        recording: false,
        filename: info
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned()),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

pub async fn recording_status(
    State(ctx): State<Arc<AppContext>>,
) -> Json<RecordingStatusResponse> {
    let status = ctx.capture.status();
    Json(RecordingStatusResponse {
        state: status.state,
        recording: status.recording,
        current_file: status.current_file,
    })
}

pub async fn list_recordings(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<RecordingListResponse>, ApiError> {
    let recordings = ctx.artifacts.list(ArtifactKind::Recording).await?;
    Ok(Json(RecordingListResponse {
        count: recordings.len(),
        recordings,
    }))
}

// =============================================================================
// Screenshots
// =============================================================================

pub async fn capture_screenshot(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ScreenshotResponse>, ApiError> {
    let now = Utc::now();
    let path = ctx.artifacts.timestamped_path(ArtifactKind::Screenshot, now);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(TraqError::from)?;
    }
    ctx.screenshot.capture(&path).await?;
    ctx.bus
        .publish(EventKind::ScreenshotCaptured { path: path.clone() });
    Ok(Json(ScreenshotResponse {
        success: true,
        filename: path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default(),
        timestamp: now.to_rfc3339(),
    }))
}

pub async fn list_screenshots(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ScreenshotListResponse>, ApiError> {
    let screenshots = ctx.artifacts.list(ArtifactKind::Screenshot).await?;
    Ok(Json(ScreenshotListResponse {
        count: screenshots.len(),
        screenshots,
    }))
}

// =============================================================================
// Voice
// =============================================================================

pub async fn start_voice(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<VoiceControlResponse>, ApiError> {
    let info = ctx.voice.start().await?;
    Ok(Json(VoiceControlResponse {
        recording: true,
        device_name: info.device_name,
        transcript: None,
    }))
}

pub async fn stop_voice(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<VoiceControlResponse>, ApiError> {
    let info = ctx.voice.stop().await?;
    Ok(Json(VoiceControlResponse {
        recording: false,
        device_name: None,
        transcript: Some(info.transcript),
    }))
}

pub async fn voice_status(State(ctx): State<Arc<AppContext>>) -> Json<VoiceStatusResponse> {
    let status = ctx.voice.status();
    Json(VoiceStatusResponse {
        state: status.state,
        recording: status.recording,
    })
}

pub async fn list_transcripts(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<TranscriptListResponse>, ApiError> {
    let transcripts = ctx.artifacts.list(ArtifactKind::Transcript).await?;
    Ok(Json(TranscriptListResponse {
        count: transcripts.len(),
        transcripts,
    }))
}

// =============================================================================
// Workflow and analysis
// =============================================================================

pub async fn generate_workflow(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<GenerateWorkflowRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let ticket = ctx.synthesizer.submit(req.transcript)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            request_id: ticket.request_id,
        }),
    ))
}

pub async fn quick_analysis(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    submit_analysis(&ctx, req, false)
}

pub async fn detailed_analysis(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    submit_analysis(&ctx, req, true)
}

fn submit_analysis(
    ctx: &Arc<AppContext>,
    req: AnalysisRequest,
    detailed: bool,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let job_id = match (req.video_path, req.text) {
        (Some(video_path), _) => ctx
            .analysis
            .submit_video(PathBuf::from(video_path), detailed)?,
        (None, Some(text)) => ctx.analysis.submit_text(text, detailed)?,
        (None, None) => {
            return Err(TraqError::Validation(
                "either video_path or text is required".to_string(),
            )
            .into())
        }
    };
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            request_id: job_id,
        }),
    ))
}

// =============================================================================
// Activity
// =============================================================================

pub async fn activity_status() -> Json<ActivityStatusResponse> {
    // The sampler is created at process start and lives for the process.
    Json(ActivityStatusResponse { tracking: true })
}

pub async fn usage(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, ApiError> {
    let totals = usage_totals(&ctx, query.date.as_deref()).await?;
    let usage: Vec<UsageEntry> = totals
        .into_iter()
        .map(|t| UsageEntry {
            app: t.app_name,
            seconds: t.seconds,
            minutes: (t.seconds / 60.0 * 100.0).round() / 100.0,
        })
        .collect();
    Ok(Json(UsageResponse {
        count: usage.len(),
        usage,
    }))
}

pub async fn chart_data(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Json<ChartDataResponse>, ApiError> {
    let totals = usage_totals(&ctx, None).await?;
    Ok(Json(ChartDataResponse {
        labels: totals.iter().map(|t| t.app_name.clone()).collect(),
        data: totals
            .iter()
            .map(|t| (t.seconds / 60.0 * 100.0).round() / 100.0)
            .collect(),
    }))
}

async fn usage_totals(
    ctx: &AppContext,
    date: Option<&str>,
) -> Result<Vec<crate::storage::UsageTotal>, ApiError> {
    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| TraqError::Validation(format!("invalid date '{raw}', expected YYYY-MM-DD")))?,
        None => Utc::now().date_naive(),
    };
    Ok(ctx.usage.totals_for_date(date).await?)
}

// =============================================================================
// System
// =============================================================================

pub async fn folders(State(ctx): State<Arc<AppContext>>) -> Json<FoldersResponse> {
    let dir = |kind: ArtifactKind| ctx.artifacts.dir(kind).to_string_lossy().into_owned();
    Json(FoldersResponse {
        recordings: dir(ArtifactKind::Recording),
        screenshots: dir(ArtifactKind::Screenshot),
        transcripts: dir(ArtifactKind::Transcript),
        workflows: dir(ArtifactKind::Workflow),
        analyses: dir(ArtifactKind::Analysis),
    })
}

pub async fn open_folder(
    Json(req): Json<OpenFolderRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let path = PathBuf::from(&req.path);
    if !path.is_dir() {
        return Err(TraqError::Validation(format!("folder not found: {}", req.path)).into());
    }

    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "windows")]
    let opener = "explorer";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let opener = "xdg-open";

    if let Err(e) = std::process::Command::new(opener).arg(&path).spawn() {
        tracing::warn!("failed to open folder {}: {e}", path.display());
    }
    Ok(Json(SuccessResponse { success: true }))
}

// =============================================================================
// Event stream
// =============================================================================

/// The persistent streaming connection: one `snapshot` SSE event, then the
/// live tail starting at the next sequence number. Dropping the connection
/// unsubscribes; reconnecting clients resynchronize from a fresh snapshot.
pub async fn events(
    State(ctx): State<Arc<AppContext>>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let subscription = ctx.bus.subscribe();
    let snapshot = serde_json::to_string(&subscription.snapshot)
        .map_err(|e| TraqError::Internal(format!("encode snapshot: {e}")))?;

    let first = stream::once(std::future::ready(Ok::<SseEvent, Infallible>(
        SseEvent::default().event("snapshot").data(snapshot),
    )));
    let tail = stream::unfold(subscription, |subscription| async move {
        let event = subscription.recv().await?;
        let sse = match serde_json::to_string(&event) {
            Ok(data) => SseEvent::default().event(event.kind.name()).data(data),
            Err(e) => {
                tracing::warn!("failed to encode event: {e}");
                SseEvent::default().event("error").data("{}")
            }
        };
        Some((Ok::<SseEvent, Infallible>(sse), subscription))
    });

    Ok(Sse::new(first.chain(tail)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
