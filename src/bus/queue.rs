//! Bounded per-subscriber outbound queue.
//!
//! The queue enforces the two delivery classes: advisory events are shed
//! oldest-first under overflow (a stale audio level is harmless), while
//! state-transition events are never displaced here; the caller retries
//! them and eventually disconnects the subscriber instead.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::events::{DeliveryClass, Event};

/// Outcome of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued normally
    Delivered,
    /// Enqueued (or discarded) at the cost of an advisory event
    ShedAdvisory,
    /// Queue is full of critical events; caller must retry or give up
    Full,
    /// Consumer is gone
    Closed,
}

struct QueueInner {
    items: VecDeque<Event>,
    closed: bool,
    shed_advisory: u64,
}

pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "outbound queue capacity must be non-zero");
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
                shed_advisory: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Push without blocking. Never awaits and never sheds a critical event.
    pub fn try_push(&self, event: Event) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        if inner.items.len() < self.capacity {
            inner.items.push_back(event);
            drop(inner);
            self.notify.notify_one();
            return PushOutcome::Delivered;
        }

        match event.kind.delivery_class() {
            DeliveryClass::Advisory => {
                // Evict the oldest advisory entry to make room; if the queue
                // holds only critical events, the incoming advisory loses.
                inner.shed_advisory += 1;
                let oldest_advisory = inner
                    .items
                    .iter()
                    .position(|e| e.kind.delivery_class() == DeliveryClass::Advisory);
                if let Some(pos) = oldest_advisory {
                    inner.items.remove(pos);
                    inner.items.push_back(event);
                    drop(inner);
                    self.notify.notify_one();
                }
                PushOutcome::ShedAdvisory
            }
            DeliveryClass::Critical => PushOutcome::Full,
        }
    }

    /// Receive the next event, waiting if the queue is empty. Returns `None`
    /// once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(event) = inner.items.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Pending events remain readable; pushes are rejected.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory events shed since creation.
    pub fn shed_advisory(&self) -> u64 {
        self.inner.lock().shed_advisory
    }
}
