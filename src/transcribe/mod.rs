//! Streaming speech transcription session.
//!
//! One exclusive audio device, one active session. The loop reads frames,
//! publishes advisory level telemetry, batches samples into chunks for the
//! speech engine, and emits word/partial/final transcript events. Stopping
//! flushes any in-flight partial as a final utterance and, when the
//! accumulated transcript is substantial, hands it to the workflow
//! synthesizer.

pub mod engine;

use std::path::{Path, PathBuf};
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
use crate::settings::AudioSettings;
use crate::storage::{ArtifactKind, ArtifactStore};
use crate::workflow::WorkflowSynthesizer;
use engine::{AudioInput, AudioStream, SpeechEngine};

/// Fine-grained phase of the transcription machine. The Listening and
/// Transcribing pair cycles as speech segments start and stop within one
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePhase {
    Idle,
    Starting,
    Listening,
    Transcribing,
    Finalizing,
}

impl VoicePhase {
    /// Projection onto the coarse state shared with the snapshot.
    pub fn as_session_state(self) -> SessionState {
        match self {
            VoicePhase::Idle => SessionState::Idle,
            VoicePhase::Starting => SessionState::Starting,
            VoicePhase::Listening | VoicePhase::Transcribing => SessionState::Active,
            VoicePhase::Finalizing => SessionState::Stopping,
        }
    }

    fn accepts_start(self) -> bool {
        matches!(self, VoicePhase::Idle)
    }

    fn accepts_stop(self) -> bool {
        matches!(self, VoicePhase::Listening | VoicePhase::Transcribing)
    }
}

/// Word-level transcript accumulator shared between the capture loop and
/// Stop. Appends carry a suffix-dedup check so an engine redelivering the
/// same trailing word does not duplicate it.
#[derive(Debug, Default)]
pub struct TranscriptState {
    words: Vec<String>,
    finals: Vec<String>,
}

impl TranscriptState {
    /// Append one word unless it repeats the current trailing word.
    /// Returns whether the word was actually appended.
    pub fn append_word(&mut self, word: &str) -> bool {
        if self.words.last().map(|w| w == word).unwrap_or(false) {
            return false;
        }
        self.words.push(word.to_string());
        true
    }

    /// The in-flight hypothesis as displayed.
    pub fn partial_text(&self) -> String {
        self.words.join(" ")
    }

    /// Promote the in-flight words to a finalized utterance.
    pub fn finalize(&mut self) -> Option<String> {
        if self.words.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.words).join(" ");
        self.finals.push(text.clone());
        Some(text)
    }

    /// All finalized utterances of the session, space-joined.
    pub fn accumulated(&self) -> String {
        self.finals.join(" ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceStartInfo {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceStopInfo {
    pub session_id: Uuid,
    pub transcript: String,
    pub transcript_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceStatus {
    pub state: SessionState,
    pub recording: bool,
}

struct ActiveVoice {
    session_id: Uuid,
    transcript_path: PathBuf,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
    shared: Arc<Mutex<TranscriptState>>,
}

struct VoiceInner {
    phase: VoicePhase,
    active: Option<ActiveVoice>,
}

pub struct TranscriptionSession {
    bus: Arc<EventBus>,
    audio: Arc<dyn AudioInput>,
    engine: Arc<dyn SpeechEngine>,
    artifacts: Arc<ArtifactStore>,
    synthesizer: Arc<WorkflowSynthesizer>,
    settings: AudioSettings,
    inner: Mutex<VoiceInner>,
}

impl TranscriptionSession {
    pub fn new(
        bus: Arc<EventBus>,
        audio: Arc<dyn AudioInput>,
        engine: Arc<dyn SpeechEngine>,
        artifacts: Arc<ArtifactStore>,
        synthesizer: Arc<WorkflowSynthesizer>,
        settings: AudioSettings,
    ) -> Self {
        Self {
            bus,
            audio,
            engine,
            artifacts,
            synthesizer,
            settings,
            inner: Mutex::new(VoiceInner {
                phase: VoicePhase::Idle,
                active: None,
            }),
        }
    }

    /// Acquire the audio device and start listening. Emits
    /// `recording_started`, then `device_info` when the device name
    /// resolves; a name lookup failure only omits the latter.
    pub async fn start(self: &Arc<Self>) -> Result<VoiceStartInfo> {
        {
            let mut inner = self.inner.lock();
            if !inner.phase.accepts_start() {
                return Err(TraqError::AlreadyActive);
            }
            inner.phase = VoicePhase::Starting;
        }

        let stream = match self.audio.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.lock().phase = VoicePhase::Idle;
                self.bus.publish(EventKind::SessionError {
                    source: SessionKind::Voice,
                    message: format!("failed to acquire audio device: {e}"),
                });
                return Err(e);
            }
        };
        let device_name = stream.device_name();

        let now = Utc::now();
        let transcript_path = self.artifacts.timestamped_path(ArtifactKind::Transcript, now);
        let header = format!(
            "Voice session - {}\n{}\n\n",
            now.format("%Y-%m-%d %H:%M:%S"),
            "=".repeat(80)
        );
        if let Err(e) = self.artifacts.append_text(&transcript_path, &header).await {
            tracing::warn!("failed to create transcript file: {e}");
        }

        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let shared = Arc::new(Mutex::new(TranscriptState::default()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(voice_loop(
            stream,
            Arc::clone(self),
            session_id,
            shared.clone(),
            transcript_path.clone(),
            cancel.clone(),
            ready_rx,
        ));

        {
            let mut inner = self.inner.lock();
            inner.phase = VoicePhase::Listening;
            inner.active = Some(ActiveVoice {
                session_id,
                transcript_path,
                cancel,
                task,
                shared,
            });
        }
        self.bus.publish(EventKind::RecordingStarted {
            source: SessionKind::Voice,
            session_id,
        });
        if let Some(name) = &device_name {
            self.bus.publish(EventKind::DeviceInfo {
                device_name: name.clone(),
            });
        }
        let _ = ready_tx.send(());

        tracing::info!(%session_id, device = ?device_name, "voice session started");
        Ok(VoiceStartInfo {
            session_id,
            device_name,
        })
    }

    /// Stop listening: cancel the loop, flush any in-flight partial as a
    /// final transcript, release the device, emit `recording_stopped`, and
    /// hand a substantial accumulated transcript to the synthesizer.
    pub async fn stop(&self) -> Result<VoiceStopInfo> {
        let active = {
            let mut inner = self.inner.lock();
            if !inner.phase.accepts_stop() {
                return Err(TraqError::NotActive);
            }
            let Some(active) = inner.active.take() else {
                inner.phase = VoicePhase::Idle;
                return Err(TraqError::Internal(
                    "active voice state without a session".to_string(),
                ));
            };
            inner.phase = VoicePhase::Finalizing;
            active
        };

        active.cancel.cancel();
        let stop_timeout = Duration::from_millis(self.settings.stop_timeout_ms);
        if tokio::time::timeout(stop_timeout, active.task).await.is_err() {
            tracing::warn!(
                session_id = %active.session_id,
                "voice loop did not stop within {:?}",
                stop_timeout
            );
        }

        // Flush an in-flight hypothesis left behind by the loop.
        let flushed = active.shared.lock().finalize();
        if let Some(text) = flushed {
            self.bus.publish(EventKind::FinalTranscript { text: text.clone() });
            self.log_utterance(&active.transcript_path, &text).await;
        }

        let transcript = active.shared.lock().accumulated();
        self.inner.lock().phase = VoicePhase::Idle;
        self.bus.publish(EventKind::RecordingStopped {
            source: SessionKind::Voice,
            session_id: active.session_id,
            artifact: Some(active.transcript_path.clone()),
        });

        if transcript.chars().count() > self.settings.min_synthesis_chars {
            match self.synthesizer.submit(transcript.clone()) {
                Ok(ticket) => {
                    tracing::info!(request_id = %ticket.request_id, "transcript handed to synthesis");
                }
                Err(e) => tracing::warn!("could not queue workflow generation: {e}"),
            }
        }

        tracing::info!(session_id = %active.session_id, "voice session stopped");
        Ok(VoiceStopInfo {
            session_id: active.session_id,
            transcript,
            transcript_path: active.transcript_path,
        })
    }

    pub fn status(&self) -> VoiceStatus {
        let inner = self.inner.lock();
        let state = inner.phase.as_session_state();
        VoiceStatus {
            state,
            recording: state == SessionState::Active,
        }
    }

    /// Release the device on process shutdown.
    pub async fn shutdown(&self) {
        if self.inner.lock().phase.accepts_stop() {
            let _ = self.stop().await;
        }
    }

    fn set_phase_if_running(&self, phase: VoicePhase) {
        let mut inner = self.inner.lock();
        if matches!(inner.phase, VoicePhase::Listening | VoicePhase::Transcribing) {
            inner.phase = phase;
        }
    }

    /// Tear down from inside the loop after the device is lost.
    fn fail_active(&self, session_id: Uuid, err: &TraqError) {
        {
            let mut inner = self.inner.lock();
            let is_current = inner
                .active
                .as_ref()
                .map(|a| a.session_id == session_id)
                .unwrap_or(false);
            if !is_current {
                return;
            }
            inner.active = None;
            inner.phase = VoicePhase::Idle;
        }
        tracing::error!(%session_id, "voice capture failed: {err}");
        self.bus.publish(EventKind::SessionError {
            source: SessionKind::Voice,
            message: format!("voice capture failed: {err}"),
        });
    }

    /// Run one chunk of audio through the engine and publish its events.
    async fn process_chunk(
        &self,
        chunk: &[i16],
        shared: &Mutex<TranscriptState>,
        transcript_path: &Path,
    ) {
        if !engine::has_speech(chunk, self.settings.silence_rms) {
            return;
        }

        self.set_phase_if_running(VoicePhase::Transcribing);
        let result = self.engine.transcribe(chunk, self.settings.sample_rate).await;
        self.set_phase_if_running(VoicePhase::Listening);

        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                // Transient upstream fault: the session keeps listening and
                // the next chunk gets a fresh attempt.
                tracing::warn!("transcription failed: {e}");
                return;
            }
        };
        if text.chars().count() < self.settings.min_transcript_chars {
            return;
        }

        let final_text = {
            let mut state = shared.lock();
            for word in text.split_whitespace() {
                if state.append_word(word) {
                    self.bus.publish(EventKind::WordDetected {
                        word: word.to_string(),
                    });
                    self.bus.publish(EventKind::PartialTranscript {
                        text: state.partial_text(),
                    });
                }
            }
            state.finalize()
        };

        if let Some(final_text) = final_text {
            self.bus.publish(EventKind::FinalTranscript {
                text: final_text.clone(),
            });
            self.log_utterance(transcript_path, &final_text).await;
        }
    }

    async fn log_utterance(&self, transcript_path: &Path, text: &str) {
        let stamp = Utc::now().format("%H:%M:%S");
        let line = format!("[{stamp}] User: {text}\n\n");
        if let Err(e) = self.artifacts.append_text(transcript_path, &line).await {
            tracing::warn!("failed to log transcript: {e}");
        }
    }
}

async fn voice_loop(
    mut stream: Box<dyn AudioStream>,
    session: Arc<TranscriptionSession>,
    session_id: Uuid,
    shared: Arc<Mutex<TranscriptState>>,
    transcript_path: PathBuf,
    cancel: CancellationToken,
    ready: oneshot::Receiver<()>,
) {
    let _ = ready.await;
    let settings = &session.settings;
    let chunk_samples = (settings.sample_rate as usize)
        .saturating_mul(settings.chunk_secs as usize)
        .max(1);
    let throttle = Duration::from_millis(settings.level_throttle_ms);
    let mut last_level: Option<tokio::time::Instant> = None;
    let mut buffer: Vec<i16> = Vec::new();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.read_frame() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                session.fail_active(session_id, &e);
                return;
            }
        };

        // Advisory level telemetry, throttled at the source.
        let now = tokio::time::Instant::now();
        let due = last_level
            .map(|t| now.duration_since(t) >= throttle)
            .unwrap_or(true);
        if due {
            last_level = Some(now);
            session.bus.publish(EventKind::AudioLevel {
                level: engine::normalized_level(&frame.samples, settings.level_sensitivity),
            });
        }

        buffer.extend_from_slice(&frame.samples);
        if buffer.len() >= chunk_samples {
            let chunk = std::mem::take(&mut buffer);
            session
                .process_chunk(&chunk, &shared, &transcript_path)
                .await;
        }
    }
    // Dropping the stream releases the audio device; un-transcribed buffered
    // audio is abandoned, matching the bounded-stop contract.
}
