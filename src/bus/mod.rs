//! The in-process event hub.
//!
//! Producers publish typed events; the bus assigns a strictly increasing
//! sequence number, folds state transitions into the current [`Snapshot`],
//! and fans out to every subscriber. A producer is never suspended on a slow
//! consumer: `publish` is synchronous and pushes into an unbounded staging
//! channel per subscriber, and a per-subscriber forwarder task applies the
//! delivery classes against that subscriber's bounded outbound queue.
//!
//! ```text
//! producer --publish--> [lock: seq + snapshot + fan-out]
//!                              |            |
//!                        staging (sub A)  staging (sub B)
//!                              |            |
//!                        forwarder A      forwarder B      <- backoff/retry,
//!                              |            |                 congestion cut-off
//!                        bounded queue    bounded queue
//!                              |            |
//!                        connection A     connection B
//! ```

pub mod events;
pub mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::storage::UsageRecord;
use events::{DeliveryClass, Event, EventKind, Snapshot};
use queue::{OutboundQueue, PushOutcome};

/// Default bound of each subscriber's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default window a congested subscriber gets before it is treated as
/// unreachable and disconnected.
pub const DEFAULT_CONGESTION_WINDOW: Duration = Duration::from_secs(5);

const RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const RETRY_BACKOFF_MAX: Duration = Duration::from_millis(250);

struct SubscriberHandle {
    staging: mpsc::UnboundedSender<Event>,
}

struct BusInner {
    next_sequence: u64,
    snapshot: Snapshot,
    subscribers: HashMap<Uuid, SubscriberHandle>,
}

pub struct EventBus {
    inner: Mutex<BusInner>,
    queue_capacity: usize,
    congestion_window: Duration,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_CONGESTION_WINDOW)
    }
}

impl EventBus {
    pub fn new(queue_capacity: usize, congestion_window: Duration) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_sequence: 0,
                snapshot: Snapshot::default(),
                subscribers: HashMap::new(),
            }),
            queue_capacity: queue_capacity.max(1),
            congestion_window,
        }
    }

    /// Publish an event: assign the next sequence number, fold it into the
    /// snapshot, and hand it to every subscriber's forwarder. Synchronous and
    /// non-blocking; producers only contend on the bus lock.
    pub fn publish(&self, kind: EventKind) -> Event {
        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let event = Event {
            sequence: inner.next_sequence,
            timestamp: Utc::now(),
            kind,
        };
        inner.snapshot.apply(&event);
        inner.subscribers.retain(|id, handle| {
            if handle.staging.send(event.clone()).is_ok() {
                true
            } else {
                tracing::debug!(connection = %id, "pruning disconnected subscriber");
                false
            }
        });
        event
    }

    /// Register a subscriber. Returns the current snapshot plus a live feed
    /// that begins at the next sequence number, atomically, so no state
    /// transition can fall between the snapshot and the feed.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (staging_tx, staging_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(OutboundQueue::new(self.queue_capacity));
        let connection_id = Uuid::new_v4();

        let snapshot = {
            let mut inner = self.inner.lock();
            inner
                .subscribers
                .insert(connection_id, SubscriberHandle { staging: staging_tx });
            inner.snapshot.clone()
        };

        tokio::spawn(forward(
            staging_rx,
            queue.clone(),
            self.congestion_window,
            connection_id,
        ));

        tracing::debug!(connection = %connection_id, "subscriber attached");
        Subscription {
            connection_id,
            snapshot,
            queue,
            bus: Arc::downgrade(self),
        }
    }

    /// Drop a subscriber. Its queue drains and closes; producers are
    /// unaffected.
    pub fn unsubscribe(&self, connection_id: &Uuid) {
        if self.inner.lock().subscribers.remove(connection_id).is_some() {
            tracing::debug!(connection = %connection_id, "subscriber detached");
        }
    }

    /// Current truth, for status commands that do not want a live feed.
    pub fn current_snapshot(&self) -> Snapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Fold a usage delta into the snapshot's bounded tail. Usage records
    /// travel on the low-frequency persistence path, not the live feed.
    pub fn record_usage(&self, record: UsageRecord) {
        self.inner.lock().snapshot.push_usage(record);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Per-subscriber delivery loop. Advisory events are shed by the queue under
/// overflow; critical events are retried with doubling backoff until the
/// congestion window elapses, at which point the subscriber is disconnected
/// rather than allowed to stall the bus.
async fn forward(
    mut staging: mpsc::UnboundedReceiver<Event>,
    queue: Arc<OutboundQueue>,
    congestion_window: Duration,
    connection_id: Uuid,
) {
    while let Some(event) = staging.recv().await {
        match event.kind.delivery_class() {
            DeliveryClass::Advisory => {
                if queue.try_push(event) == PushOutcome::Closed {
                    return;
                }
            }
            DeliveryClass::Critical => {
                let deadline = Instant::now() + congestion_window;
                let mut backoff = RETRY_BACKOFF_INITIAL;
                loop {
                    match queue.try_push(event.clone()) {
                        PushOutcome::Delivered | PushOutcome::ShedAdvisory => break,
                        PushOutcome::Closed => return,
                        PushOutcome::Full => {
                            if Instant::now() >= deadline {
                                tracing::warn!(
                                    connection = %connection_id,
                                    "subscriber congested beyond retry window, disconnecting"
                                );
                                queue.close();
                                return;
                            }
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
                        }
                    }
                }
            }
        }
    }
    // Bus dropped the staging sender (unsubscribe); let the consumer drain.
    queue.close();
}

/// A live subscription: the snapshot taken at attach time plus the event
/// feed starting at the next sequence number.
pub struct Subscription {
    pub connection_id: Uuid,
    pub snapshot: Snapshot,
    queue: Arc<OutboundQueue>,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Next event, or `None` once the subscription is closed (unsubscribe or
    /// congestion disconnect).
    pub async fn recv(&self) -> Option<Event> {
        self.queue.recv().await
    }

    /// True once the bus has cut this subscriber off.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{SessionKind, SessionState};

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::default())
    }

    fn final_transcript(text: &str) -> EventKind {
        EventKind::FinalTranscript { text: text.into() }
    }

    // =========================================================================
    // Sequence discipline
    // =========================================================================

    #[tokio::test]
    async fn sequences_are_strictly_increasing_for_one_subscriber() {
        let bus = bus();
        let sub = bus.subscribe();

        for i in 0..100 {
            bus.publish(final_transcript(&format!("utterance {i}")));
        }

        let mut last = 0u64;
        for _ in 0..100 {
            let event = sub.recv().await.unwrap();
            assert!(event.sequence > last, "sequence regressed: {} -> {}", last, event.sequence);
            last = event.sequence;
        }
    }

    #[tokio::test]
    async fn concurrent_publishes_never_reuse_a_sequence() {
        let bus = bus();
        let sub = bus.subscribe();

        let mut handles = Vec::new();
        for producer in 0..8 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    bus.publish(final_transcript(&format!("p{producer} u{i}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut last = 0u64;
        for _ in 0..400 {
            let event = sub.recv().await.unwrap();
            assert!(seen.insert(event.sequence), "duplicate sequence {}", event.sequence);
            assert!(event.sequence > last);
            last = event.sequence;
        }
    }

    // =========================================================================
    // Snapshot consistency
    // =========================================================================

    #[tokio::test]
    async fn late_subscriber_sees_latest_state_in_snapshot() {
        let bus = bus();
        bus.publish(EventKind::RecordingStarted {
            source: SessionKind::Capture,
            session_id: Uuid::new_v4(),
        });
        bus.publish(final_transcript("open chrome"));

        let sub = bus.subscribe();
        assert_eq!(sub.snapshot.capture, SessionState::Active);
        assert_eq!(sub.snapshot.transcript, "open chrome");
        assert_eq!(sub.snapshot.as_of_sequence, 2);

        // The live tail starts strictly after the snapshot.
        bus.publish(final_transcript("and search cats"));
        let event = sub.recv().await.unwrap();
        assert!(event.sequence > sub.snapshot.as_of_sequence);
        assert_eq!(event.kind, final_transcript("and search cats"));
    }

    #[tokio::test]
    async fn usage_records_land_in_the_snapshot_tail() {
        let bus = bus();
        bus.record_usage(UsageRecord {
            app_name: "chrome.exe".into(),
            seconds: 2.0,
            captured_at: Utc::now(),
        });
        let sub = bus.subscribe();
        assert_eq!(sub.snapshot.recent_usage.len(), 1);
        assert_eq!(sub.snapshot.recent_usage[0].app_name, "chrome.exe");
    }

    // =========================================================================
    // Fan-out and isolation
    // =========================================================================

    #[tokio::test]
    async fn every_subscriber_receives_every_critical_event() {
        let bus = bus();
        let sub_a = bus.subscribe();
        let sub_b = bus.subscribe();

        bus.publish(final_transcript("one"));
        bus.publish(final_transcript("two"));

        for sub in [&sub_a, &sub_b] {
            assert_eq!(sub.recv().await.unwrap().kind, final_transcript("one"));
            assert_eq!(sub.recv().await.unwrap().kind, final_transcript("two"));
        }
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_queue_without_affecting_others() {
        let bus = bus();
        let sub_a = bus.subscribe();
        let sub_b = bus.subscribe();

        bus.unsubscribe(&sub_a.connection_id);
        bus.publish(final_transcript("still flowing"));

        assert_eq!(
            sub_b.recv().await.unwrap().kind,
            final_transcript("still flowing")
        );
        // The dropped subscriber's feed terminates.
        assert!(sub_a.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_a_subscription_detaches_it() {
        let bus = bus();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    // =========================================================================
    // Backpressure policies
    // =========================================================================

    #[tokio::test]
    async fn slow_consumer_sheds_advisory_but_keeps_transitions() {
        let bus = Arc::new(EventBus::new(4, DEFAULT_CONGESTION_WINDOW));
        let sub = bus.subscribe();

        // Nobody drains while a burst of levels and one transition arrive.
        for i in 0..20 {
            bus.publish(EventKind::AudioLevel {
                level: i as f32 / 20.0,
            });
        }
        bus.publish(final_transcript("kept"));

        // Give the forwarder time to work through staging.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut kinds = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await {
            kinds.push(event.kind);
            if kinds.last() == Some(&final_transcript("kept")) {
                break;
            }
        }
        let advisory_count = kinds
            .iter()
            .filter(|k| matches!(k, EventKind::AudioLevel { .. }))
            .count();
        assert!(advisory_count <= 4, "queue bound exceeded: {advisory_count}");
        assert_eq!(kinds.last(), Some(&final_transcript("kept")));
    }

    #[tokio::test]
    async fn congested_subscriber_is_disconnected_not_stalled() {
        let bus = Arc::new(EventBus::new(2, Duration::from_millis(100)));
        let stuck = bus.subscribe();
        let healthy = bus.subscribe();

        for i in 0..6 {
            bus.publish(final_transcript(&format!("t{i}")));
        }

        // The healthy consumer drains everything promptly.
        for i in 0..6 {
            let event = tokio::time::timeout(Duration::from_secs(2), healthy.recv())
                .await
                .expect("healthy subscriber must not stall")
                .unwrap();
            assert_eq!(event.kind, final_transcript(&format!("t{i}")));
        }

        // The stuck one is cut off after the congestion window.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(stuck.is_closed());

        // And the bus prunes it on the next publish.
        bus.publish(final_transcript("after"));
        assert_eq!(bus.subscriber_count(), 1);
    }
}
