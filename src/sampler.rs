//! Foreground activity sampling.
//!
//! A fixed-interval poll of the foreground application identity. When the
//! identity changes, the elapsed stretch for the previous app becomes a
//! [`UsageRecord`] on the persistence path; this is low-frequency,
//! non-interactive data and does not ride the live event feed. A poll that
//! cannot resolve an identity counts as "no change observed this tick".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::storage::{UsageRecord, UsageStore};

/// Collaborator resolving the current foreground application. Returns `None`
/// on permission denial or transient OS errors.
pub trait ForegroundProbe: Send + Sync {
    fn active_app(&self) -> Option<String>;
}

/// Probe for builds without a platform integration; observes nothing.
pub struct DisabledProbe;

impl ForegroundProbe for DisabledProbe {
    fn active_app(&self) -> Option<String> {
        None
    }
}

/// The pure observation step: current foreground app plus the remembered
/// `(app, since)` pair in, an optional finished usage stretch out.
#[derive(Debug, Default)]
pub struct SamplerState {
    current: Option<(String, DateTime<Utc>)>,
}

impl SamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one poll result. Emits a record only when the foreground
    /// identity changed; an unresolved identity leaves everything untouched.
    pub fn observe(&mut self, now: DateTime<Utc>, identity: Option<String>) -> Option<UsageRecord> {
        let app = identity?;
        match self.current.take() {
            Some((current, since)) if current == app => {
                self.current = Some((current, since));
                None
            }
            Some((previous, since)) => {
                self.current = Some((app, now));
                let seconds = (now - since).num_milliseconds() as f64 / 1000.0;
                Some(UsageRecord {
                    app_name: previous,
                    seconds,
                    captured_at: now,
                })
            }
            None => {
                self.current = Some((app, now));
                None
            }
        }
    }

    /// The still-open stretch, if any.
    pub fn current_app(&self) -> Option<&str> {
        self.current.as_ref().map(|(app, _)| app.as_str())
    }
}

pub struct ActivitySampler {
    probe: Arc<dyn ForegroundProbe>,
    store: Arc<dyn UsageStore>,
    bus: Arc<EventBus>,
    interval: Duration,
}

impl ActivitySampler {
    pub fn new(
        probe: Arc<dyn ForegroundProbe>,
        store: Arc<dyn UsageStore>,
        bus: Arc<EventBus>,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            store,
            bus,
            interval,
        }
    }

    /// Run the polling loop until cancelled. Created once at process start
    /// and lives for the process lifetime.
    pub async fn run(self, cancel: CancellationToken) {
        let mut state = SamplerState::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("activity sampler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let identity = self.probe.active_app();
                    if let Some(record) = state.observe(Utc::now(), identity) {
                        self.record(record).await;
                    }
                }
            }
        }
    }

    async fn record(&self, record: UsageRecord) {
        tracing::debug!(app = %record.app_name, seconds = record.seconds, "usage recorded");
        if let Err(e) = self.store.append(&record).await {
            // A failed poll or write must never become a session-level error.
            tracing::warn!("failed to persist usage record: {e}");
        }
        self.bus.record_usage(record);
    }
}
