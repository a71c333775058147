//! Request/response types for the HTTP command surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::events::SessionState;
use crate::error::TraqError;
use crate::storage::ArtifactInfo;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Server status (always "ok" when healthy)
    pub status: String,
    /// Server version from Cargo.toml
    pub version: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response body. Commands return success data or this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: Some(code.into()),
        }
    }
}

/// Adapter mapping the error taxonomy onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub TraqError);

impl From<TraqError> for ApiError {
    fn from(err: TraqError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TraqError::Validation(_) => StatusCode::BAD_REQUEST,
            TraqError::AlreadyActive | TraqError::NotActive => StatusCode::CONFLICT,
            TraqError::ResourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TraqError::Upstream(_) => StatusCode::BAD_GATEWAY,
            TraqError::Io(_) | TraqError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse::with_code(self.0.to_string(), self.0.code());
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Recording and voice
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingControlResponse {
    pub success: bool,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatusResponse {
    pub state: SessionState,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingListResponse {
    pub recordings: Vec<ArtifactInfo>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotResponse {
    pub success: bool,
    pub filename: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotListResponse {
    pub screenshots: Vec<ArtifactInfo>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceControlResponse {
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStatusResponse {
    pub state: SessionState,
    pub recording: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptListResponse {
    pub transcripts: Vec<ArtifactInfo>,
    pub count: usize,
}

// =============================================================================
// Workflow and analysis
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateWorkflowRequest {
    pub transcript: String,
}

/// AI-backed commands acknowledge; results arrive only on the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub video_path: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

// =============================================================================
// Activity and system
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStatusResponse {
    pub tracking: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub app: String,
    pub seconds: f64,
    pub minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub usage: Vec<UsageEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartDataResponse {
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldersResponse {
    pub recordings: String,
    pub screenshots: String,
    pub transcripts: String,
    pub workflows: String,
    pub analyses: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFolderRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}
