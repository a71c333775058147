//! Screen capture session lifecycle.
//!
//! One exclusive device, one active session. The capture loop runs on its
//! own task and observes a cooperative cancellation flag. Every exit path
//! (stop, device loss, shutdown) releases the device before the session
//! settles back to idle.

pub mod device;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::events::{EventKind, SessionKind, SessionState};
use crate::bus::EventBus;
use crate::error::{Result, TraqError};
use crate::settings::CaptureSettings;
use crate::storage::{ArtifactKind, ArtifactStore};
use device::{CaptureBackend, CaptureStream};

/// Returned by `start`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub session_id: Uuid,
    pub path: PathBuf,
}

/// Returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub state: SessionState,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

struct ActiveCapture {
    session_id: Uuid,
    output: PathBuf,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct CaptureInner {
    state: SessionState,
    active: Option<ActiveCapture>,
}

pub struct CaptureSession {
    bus: Arc<EventBus>,
    backend: Arc<dyn CaptureBackend>,
    artifacts: Arc<ArtifactStore>,
    settings: CaptureSettings,
    inner: Mutex<CaptureInner>,
}

impl CaptureSession {
    pub fn new(
        bus: Arc<EventBus>,
        backend: Arc<dyn CaptureBackend>,
        artifacts: Arc<ArtifactStore>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            bus,
            backend,
            artifacts,
            settings,
            inner: Mutex::new(CaptureInner {
                state: SessionState::Idle,
                active: None,
            }),
        }
    }

    /// Start recording. Fails with `AlreadyActive` unless the session is
    /// settled; acquires the device exclusively and emits
    /// `recording_started` once the capture loop is live.
    pub async fn start(self: &Arc<Self>) -> Result<RecordingInfo> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.accepts_start() {
                return Err(TraqError::AlreadyActive);
            }
            inner.state = SessionState::Starting;
        }

        let output = self
            .artifacts
            .timestamped_path(ArtifactKind::Recording, Utc::now());

        let stream = match self.backend.open(&output, self.settings.fps).await {
            Ok(stream) => stream,
            Err(e) => {
                // Error auto-resolves to Idle once the fault is broadcast.
                self.inner.lock().state = SessionState::Idle;
                self.bus.publish(EventKind::SessionError {
                    source: SessionKind::Capture,
                    message: format!("failed to acquire capture device: {e}"),
                });
                return Err(e);
            }
        };

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        // The loop waits for the gate so it can never report a failure
        // before this session is registered as the active one.
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(capture_loop(
            stream,
            self.settings.fps,
            cancel.clone(),
            Arc::clone(self),
            session_id,
            ready_rx,
        ));

        {
            let mut inner = self.inner.lock();
            inner.state = SessionState::Active;
            inner.active = Some(ActiveCapture {
                session_id,
                output: output.clone(),
                cancel,
                task,
            });
        }
        self.bus.publish(EventKind::RecordingStarted {
            source: SessionKind::Capture,
            session_id,
        });
        let _ = ready_tx.send(());

        tracing::info!(%session_id, path = %output.display(), "recording started");
        Ok(RecordingInfo {
            session_id,
            path: output,
        })
    }

    /// Stop recording. Fails with `NotActive` unless the session is active;
    /// waits a bounded interval for the loop to observe cancellation, then
    /// emits `recording_stopped` carrying the artifact path.
    pub async fn stop(&self) -> Result<RecordingInfo> {
        let active = {
            let mut inner = self.inner.lock();
            if !inner.state.accepts_stop() {
                return Err(TraqError::NotActive);
            }
            let Some(active) = inner.active.take() else {
                inner.state = SessionState::Idle;
                return Err(TraqError::Internal(
                    "active capture state without a session".to_string(),
                ));
            };
            inner.state = SessionState::Stopping;
            active
        };

        active.cancel.cancel();
        let stop_timeout = Duration::from_millis(self.settings.stop_timeout_ms);
        if tokio::time::timeout(stop_timeout, active.task).await.is_err() {
            tracing::warn!(
                session_id = %active.session_id,
                "capture loop did not stop within {:?}",
                stop_timeout
            );
        }

        self.inner.lock().state = SessionState::Idle;
        self.bus.publish(EventKind::RecordingStopped {
            source: SessionKind::Capture,
            session_id: active.session_id,
            artifact: Some(active.output.clone()),
        });

        tracing::info!(session_id = %active.session_id, "recording stopped");
        Ok(RecordingInfo {
            session_id: active.session_id,
            path: active.output,
        })
    }

    pub fn status(&self) -> CaptureStatus {
        let inner = self.inner.lock();
        CaptureStatus {
            state: inner.state,
            recording: inner.state == SessionState::Active,
            current_file: inner.active.as_ref().and_then(|a| {
                a.output
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
            }),
        }
    }

    /// Tear down from inside the capture loop after a device fault. The
    /// session settles to Idle (Error auto-resolves) once the fault event is
    /// out; the loop returning releases the device.
    fn fail_active(&self, session_id: Uuid, err: &TraqError) {
        {
            let mut inner = self.inner.lock();
            let is_current = inner
                .active
                .as_ref()
                .map(|a| a.session_id == session_id)
                .unwrap_or(false);
            if !is_current {
                // A concurrent stop already claimed the session.
                return;
            }
            inner.active = None;
            inner.state = SessionState::Idle;
        }
        tracing::error!(%session_id, "capture failed: {err}");
        self.bus.publish(EventKind::SessionError {
            source: SessionKind::Capture,
            message: format!("capture failed: {err}"),
        });
    }

    /// Release the device on process shutdown.
    pub async fn shutdown(&self) {
        if self.inner.lock().state.accepts_stop() {
            let _ = self.stop().await;
        }
    }
}

async fn capture_loop(
    mut stream: Box<dyn CaptureStream>,
    fps: u32,
    cancel: CancellationToken,
    session: Arc<CaptureSession>,
    session_id: Uuid,
    ready: oneshot::Receiver<()>,
) {
    let _ = ready.await;
    let frame_delay = Duration::from_millis(1000 / u64::from(fps.max(1)));
    let mut ticker = tokio::time::interval(frame_delay);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = stream.finish().await {
                    tracing::warn!(%session_id, "failed to finalize recording: {e}");
                }
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = stream.record_frame().await {
                    session.fail_active(session_id, &e);
                    return;
                }
            }
        }
    }
}
