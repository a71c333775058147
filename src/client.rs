//! Client-side connection contract.
//!
//! On unexpected disconnect the manager reconnects after a policy-driven
//! delay, retried indefinitely, and replaces its local view wholesale from
//! the fresh snapshot rather than patching stale state. Events published
//! during the disconnect window are accepted as lost; sequence gaps across a
//! reconnect are explicit accepted loss, not corruption.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::events::{Event, EventKind, SessionState, Snapshot};
use crate::bus::{EventBus, Subscription};
use crate::error::{Result, TraqError};
use crate::workflow::models::Workflow;

/// Retry policy: delay before reconnect attempt `attempt` (0-based).
/// Independent of any transport so it is testable on its own.
pub type ReconnectPolicy = fn(attempt: u32) -> Duration;

/// The shipping policy: a fixed three-second delay, forever.
pub fn fixed_reconnect_delay(_attempt: u32) -> Duration {
    Duration::from_secs(3)
}

/// Transport seam: anything that can produce a fresh subscription.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self) -> Result<Subscription>;
}

/// In-process transport straight to the bus.
pub struct BusConnect {
    bus: Arc<EventBus>,
}

impl BusConnect {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Connect for BusConnect {
    async fn connect(&self) -> Result<Subscription> {
        Ok(self.bus.subscribe())
    }
}

/// The client's rendering of current truth, rebuilt from each snapshot and
/// advanced by the live tail.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientView {
    pub capture: SessionState,
    pub voice: SessionState,
    pub workflow: SessionState,
    pub partial_transcript: String,
    pub transcript: String,
    pub last_workflow: Option<Workflow>,
    pub audio_level: f32,
    pub last_sequence: u64,
}

impl ClientView {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            capture: snapshot.capture,
            voice: snapshot.voice,
            workflow: snapshot.workflow,
            partial_transcript: snapshot.partial_transcript.clone(),
            transcript: snapshot.transcript.clone(),
            last_workflow: snapshot.last_workflow.clone(),
            audio_level: 0.0,
            last_sequence: snapshot.as_of_sequence,
        }
    }

    /// Advance by one delivered event. Sequences must be strictly
    /// increasing within a connection; gaps are fine (shed advisory events),
    /// regressions and duplicates are not.
    pub fn apply(&mut self, event: &Event) -> Result<()> {
        if event.sequence <= self.last_sequence {
            return Err(TraqError::Internal(format!(
                "sequence regression: {} after {}",
                event.sequence, self.last_sequence
            )));
        }
        self.last_sequence = event.sequence;

        match &event.kind {
            EventKind::AudioLevel { level } => self.audio_level = *level,
            EventKind::RecordingStopped { .. } => self.audio_level = 0.0,
            _ => {}
        }

        // The shared folding logic keeps view and snapshot semantics aligned.
        let mut as_snapshot = Snapshot {
            as_of_sequence: self.last_sequence,
            capture: self.capture,
            voice: self.voice,
            workflow: self.workflow,
            partial_transcript: std::mem::take(&mut self.partial_transcript),
            transcript: std::mem::take(&mut self.transcript),
            last_workflow: self.last_workflow.take(),
            recent_usage: Vec::new(),
        };
        as_snapshot.apply(event);
        self.capture = as_snapshot.capture;
        self.voice = as_snapshot.voice;
        self.workflow = as_snapshot.workflow;
        self.partial_transcript = as_snapshot.partial_transcript;
        self.transcript = as_snapshot.transcript;
        self.last_workflow = as_snapshot.last_workflow;
        Ok(())
    }
}

impl Default for ClientView {
    fn default() -> Self {
        Self::from_snapshot(&Snapshot::default())
    }
}

/// Maintains one persistent subscription and the view derived from it.
pub struct ConnectionManager {
    connect: Arc<dyn Connect>,
    policy: ReconnectPolicy,
    view: Mutex<ClientView>,
    connections: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connect: Arc<dyn Connect>) -> Self {
        Self::with_policy(connect, fixed_reconnect_delay)
    }

    pub fn with_policy(connect: Arc<dyn Connect>, policy: ReconnectPolicy) -> Self {
        Self {
            connect,
            policy,
            view: Mutex::new(ClientView::default()),
            connections: AtomicU64::new(0),
        }
    }

    pub fn view(&self) -> ClientView {
        self.view.lock().clone()
    }

    /// Times a connection was (re)established.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Run until cancelled: subscribe, consume the tail, reconnect with the
    /// policy delay whenever the feed ends.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            match self.connect.connect().await {
                Ok(subscription) => {
                    attempt = 0;
                    self.connections.fetch_add(1, Ordering::SeqCst);
                    // Replace, never patch: the snapshot is the new truth.
                    *self.view.lock() = ClientView::from_snapshot(&subscription.snapshot);
                    tracing::debug!(
                        connection = %subscription.connection_id,
                        "connected, state resynchronized"
                    );

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            event = subscription.recv() => match event {
                                Some(event) => {
                                    if let Err(e) = self.view.lock().apply(&event) {
                                        tracing::warn!("dropping inconsistent event: {e}");
                                    }
                                }
                                None => {
                                    tracing::warn!("event feed closed, scheduling reconnect");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("connect failed: {e}");
                }
            }

            let delay = (self.policy)(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
