//! Event types flowing through the coordination bus.
//!
//! Every event is fully self-describing: consumers key off `type`, never off
//! relative order across producers. The wire envelope is
//! `{type, data, sequence, timestamp}` with the payload under `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::storage::UsageRecord;
use crate::workflow::models::Workflow;

/// Coarse lifecycle state of a producer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    Error,
}

impl SessionState {
    /// A new session may begin only from a settled state. `Error`
    /// auto-resolves, so it is start-eligible too.
    pub fn accepts_start(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Error)
    }

    pub fn accepts_stop(self) -> bool {
        matches!(self, SessionState::Active)
    }
}

/// Which producer an event or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Capture,
    Voice,
    Workflow,
    Analysis,
}

/// Coarse stages of a workflow generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Starting,
    Processing,
    Formatting,
    Completed,
    Error,
}

impl WorkflowStage {
    /// Terminal stages end exactly one generation run.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStage::Completed | WorkflowStage::Error)
    }
}

/// Delivery class for per-subscriber queues: advisory events may be shed
/// under backpressure, critical events may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    Advisory,
    Critical,
}

/// Typed payloads published by the producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventKind {
    /// A capture or voice session began
    RecordingStarted {
        source: SessionKind,
        session_id: Uuid,
    },

    /// A capture or voice session ended; capture carries its artifact path
    RecordingStopped {
        source: SessionKind,
        session_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<PathBuf>,
    },

    /// A screenshot was written by the capture collaborator
    ScreenshotCaptured { path: PathBuf },

    /// In-progress hypothesis; replaces the currently displayed partial
    PartialTranscript { text: String },

    /// Token-by-token engine output; appended with a suffix-dedup check
    WordDetected { word: String },

    /// Confirmed utterance; clears the partial, extends the accumulated transcript
    FinalTranscript { text: String },

    /// Normalized input amplitude, 0.0..=1.0. Advisory: stale values are harmless.
    AudioLevel { level: f32 },

    /// Resolved input device name, once available
    DeviceInfo { device_name: String },

    /// Coarse progress of one generation run
    WorkflowProgress {
        stage: WorkflowStage,
        message: String,
    },

    /// Terminal success payload of a generation run
    WorkflowGenerated {
        workflow: Workflow,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<PathBuf>,
    },

    /// Result of a quick or detailed analysis request
    AnalysisComplete {
        analysis: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        workflow: Option<Workflow>,
    },

    /// A session hit a device or upstream fault; broadcast so every client
    /// sees it, not just the requester
    SessionError {
        source: SessionKind,
        message: String,
    },
}

impl EventKind {
    /// Wire name of this event type.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RecordingStarted { .. } => "recording_started",
            EventKind::RecordingStopped { .. } => "recording_stopped",
            EventKind::ScreenshotCaptured { .. } => "screenshot_captured",
            EventKind::PartialTranscript { .. } => "partial_transcript",
            EventKind::WordDetected { .. } => "word_detected",
            EventKind::FinalTranscript { .. } => "final_transcript",
            EventKind::AudioLevel { .. } => "audio_level",
            EventKind::DeviceInfo { .. } => "device_info",
            EventKind::WorkflowProgress { .. } => "workflow_progress",
            EventKind::WorkflowGenerated { .. } => "workflow_generated",
            EventKind::AnalysisComplete { .. } => "analysis_complete",
            EventKind::SessionError { .. } => "session_error",
        }
    }

    pub fn delivery_class(&self) -> DeliveryClass {
        match self {
            EventKind::AudioLevel { .. } => DeliveryClass::Advisory,
            _ => DeliveryClass::Critical,
        }
    }
}

/// The bus envelope. Sequence numbers are assigned at publish time, strictly
/// increasing, never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Number of usage records retained in the snapshot tail.
pub const SNAPSHOT_USAGE_TAIL: usize = 50;

/// Current truth handed to a new subscriber: per-producer states plus the
/// accumulated material a late joiner needs to render correct UI state
/// without replaying history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence of the last event folded into this snapshot
    pub as_of_sequence: u64,
    pub capture: SessionState,
    pub voice: SessionState,
    pub workflow: SessionState,
    /// Currently displayed in-progress hypothesis
    pub partial_transcript: String,
    /// Finalized utterances of the current/most recent voice session
    pub transcript: String,
    pub last_workflow: Option<Workflow>,
    /// Bounded tail of recent usage records
    pub recent_usage: Vec<UsageRecord>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            as_of_sequence: 0,
            capture: SessionState::Idle,
            voice: SessionState::Idle,
            workflow: SessionState::Idle,
            partial_transcript: String::new(),
            transcript: String::new(),
            last_workflow: None,
            recent_usage: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Fold one published event into the snapshot. Called under the bus
    /// lock, atomically with sequence assignment, so a subscriber never
    /// observes a snapshot older than the events it missed.
    pub fn apply(&mut self, event: &Event) {
        self.as_of_sequence = event.sequence;
        match &event.kind {
            EventKind::RecordingStarted { source, .. } => match source {
                SessionKind::Capture => self.capture = SessionState::Active,
                SessionKind::Voice => {
                    self.voice = SessionState::Active;
                    self.partial_transcript.clear();
                    self.transcript.clear();
                }
                _ => {}
            },
            EventKind::RecordingStopped { source, .. } => match source {
                SessionKind::Capture => self.capture = SessionState::Idle,
                SessionKind::Voice => {
                    self.voice = SessionState::Idle;
                    self.partial_transcript.clear();
                }
                _ => {}
            },
            EventKind::PartialTranscript { text } => {
                self.partial_transcript = text.clone();
            }
            EventKind::FinalTranscript { text } => {
                self.partial_transcript.clear();
                if !self.transcript.is_empty() {
                    self.transcript.push(' ');
                }
                self.transcript.push_str(text);
            }
            EventKind::WorkflowProgress { stage, .. } => {
                self.workflow = if stage.is_terminal() {
                    SessionState::Idle
                } else {
                    SessionState::Active
                };
            }
            EventKind::WorkflowGenerated { workflow, .. } => {
                self.last_workflow = Some(workflow.clone());
            }
            EventKind::SessionError { source, .. } => match source {
                SessionKind::Capture => self.capture = SessionState::Error,
                SessionKind::Voice => self.voice = SessionState::Error,
                SessionKind::Workflow => self.workflow = SessionState::Error,
                SessionKind::Analysis => {}
            },
            EventKind::ScreenshotCaptured { .. }
            | EventKind::WordDetected { .. }
            | EventKind::AudioLevel { .. }
            | EventKind::DeviceInfo { .. }
            | EventKind::AnalysisComplete { .. } => {}
        }
    }

    /// Record a usage delta in the bounded tail.
    pub fn push_usage(&mut self, record: UsageRecord) {
        self.recent_usage.push(record);
        if self.recent_usage.len() > SNAPSHOT_USAGE_TAIL {
            let excess = self.recent_usage.len() - SNAPSHOT_USAGE_TAIL;
            self.recent_usage.drain(..excess);
        }
    }
}
