//! Typed multi-consumer event channels with progress coalescing.
//!
//! Observers subscribe to a bounded queue. When a queue fills up,
//! consecutive `SessionProgress` events for the same session collapse into
//! the newest one instead of blocking the producer or growing without
//! bound; every other event class is preserved. Ordering within a session
//! (`Started → Progress* → terminal`) survives coalescing because only
//! progress events are replaced, in place.

use crate::session::TransferSession;
use lanbeam_discovery::Peer;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// An incoming transfer request awaiting a UI decision.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// The requesting peer's id for this transfer.
    pub transfer_id: Uuid,
    /// Requester endpoint to reply to.
    pub reply_to: std::net::SocketAddr,
    /// Requester display name.
    pub peer_name: String,
    /// Requester signature (trust key for remembered save locations).
    pub peer_signature: String,
    /// Aggregate payload size.
    pub total_bytes: u64,
    /// Number of items offered.
    pub item_count: u64,
    /// Bounded preview of item names/sizes/kinds.
    pub preview: Vec<(String, i64, String)>,
    /// Whether the preview was truncated to fit the datagram.
    pub truncated: bool,
}

/// Everything the engine tells its observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A peer appeared.
    PeerFound(Peer),
    /// A peer expired or said goodbye.
    PeerLost(Peer),
    /// A peer wants to send us something; reply via the session manager.
    TransferRequest(IncomingRequest),
    /// A session moved from pending to streaming.
    SessionStarted(TransferSession),
    /// Progress snapshot; throttled and coalescible.
    SessionProgress(TransferSession),
    /// A session delivered everything.
    SessionCompleted(TransferSession),
    /// A session ended in failure or cancellation; the session's status
    /// distinguishes the two.
    SessionFailed {
        /// Terminal session snapshot.
        session: TransferSession,
        /// Failure detail.
        error: String,
    },
}

impl EngineEvent {
    /// The session id this event belongs to, when any.
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Self::SessionStarted(s)
            | Self::SessionProgress(s)
            | Self::SessionCompleted(s) => Some(s.id),
            Self::SessionFailed { session, .. } => Some(session.id),
            _ => None,
        }
    }
}

struct SubscriberQueue {
    events: Mutex<VecDeque<EngineEvent>>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    fn push(&self, event: EngineEvent) {
        let mut queue = self.events.lock().expect("event queue lock");

        // Coalesce: a queued progress snapshot for the same session is
        // superseded by the newer one.
        if let EngineEvent::SessionProgress(session) = &event {
            if let Some(slot) = queue.iter_mut().rev().find(|queued| {
                matches!(queued, EngineEvent::SessionProgress(s) if s.id == session.id)
            }) {
                *slot = event;
                drop(queue);
                self.notify.notify_one();
                return;
            }
        }

        if queue.len() >= self.capacity {
            // Sacrifice the oldest progress event; non-progress events are
            // load-bearing and only dropped when nothing else remains.
            if let Some(pos) = queue
                .iter()
                .position(|e| matches!(e, EngineEvent::SessionProgress(_)))
            {
                queue.remove(pos);
            } else {
                queue.pop_front();
            }
        }

        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }
}

/// One observer's receive end.
pub struct EventStream {
    queue: Arc<SubscriberQueue>,
}

impl EventStream {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> EngineEvent {
        loop {
            if let Some(event) = self.queue.events.lock().expect("event queue lock").pop_front() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Take the next event if one is already queued.
    #[must_use]
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.queue.events.lock().expect("event queue lock").pop_front()
    }
}

/// Multi-consumer event dispatcher.
///
/// Emission never blocks: each subscriber gets a bounded queue with
/// progress coalescing. Subscribers that dropped their stream are pruned on
/// the next emit.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Arc<SubscriberQueue>>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer with the default queue capacity.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.subscribe_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Register a new observer with an explicit queue capacity.
    #[must_use]
    pub fn subscribe_with_capacity(&self, capacity: usize) -> EventStream {
        let queue = Arc::new(SubscriberQueue {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity: capacity.max(1),
        });
        self.subscribers
            .lock()
            .expect("subscriber list lock")
            .push(Arc::clone(&queue));
        EventStream { queue }
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock().expect("subscriber list lock");
        subscribers.retain(|queue| Arc::strong_count(queue) > 1);
        for queue in subscribers.iter() {
            queue.push(event.clone());
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().expect("subscriber list lock");
        subscribers.retain(|queue| Arc::strong_count(queue) > 1);
        subscribers.len()
    }
}
