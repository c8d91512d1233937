//! In-process typed pub/sub event bus (§4.1).
//!
//! Grounded on `sven-gateway/src/http/ws.rs`'s `tokio::select!` loop over a
//! `tokio::sync::broadcast::Receiver`: one slow subscriber must never block
//! another. `broadcast` itself only offers drop-oldest-for-everyone via
//! `Lagged`; the spec instead wants drop-newest scoped to the one lagging
//! subscriber, so each subscriber gets its own bounded `mpsc` channel and a
//! non-blocking `try_send` fan-out task per publish.

mod error;
mod event;

pub use error::BusError;
pub use event::{Event, EventSource, EventType};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;
const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// `SubscribeChan` gets its own `mpsc` channel and never blocks the
/// publisher (drop-newest on backpressure); `Subscribe` instead runs its
/// handler inline during `publish`, synchronously, in registration order —
/// the two operations §4.1 names as distinct contract points.
enum SubscriberKind {
    Channel { tx: mpsc::Sender<Event>, dropped: Arc<AtomicU64> },
    Handler(Arc<dyn Fn(Event) + Send + Sync>),
}

struct Subscriber {
    filter: Option<Vec<EventType>>,
    kind: SubscriberKind,
}

impl Subscriber {
    fn matches(&self, event_type: EventType) -> bool {
        match &self.filter {
            None => true,
            Some(types) => types.contains(&event_type),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub published_total: u64,
    pub subscriber_count: usize,
    pub dropped_total: u64,
}

struct Inner {
    history: Mutex<VecDeque<Event>>,
    history_capacity: usize,
    subscribers: Mutex<HashMap<Uuid, Subscriber>>,
    closed: AtomicBool,
    published_total: AtomicU64,
}

/// Handle to the bus. Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(VecDeque::with_capacity(history_capacity)),
                history_capacity,
                subscribers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                published_total: AtomicU64::new(0),
            }),
        }
    }

    /// Publish `event` to the ring buffer and fan it out to every matching
    /// subscriber. Never blocks on a slow subscriber: each delivery runs in
    /// its own task and drops the event for that subscriber alone if its
    /// channel is full.
    pub fn publish(&self, event: Event) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        {
            let mut history = self.inner.history.lock().unwrap();
            if history.len() >= self.inner.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        self.inner.published_total.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.inner.subscribers.lock().unwrap();
        for sub in subscribers.values() {
            if !sub.matches(event.event_type) {
                continue;
            }
            match &sub.kind {
                SubscriberKind::Channel { tx, dropped } => {
                    let tx = tx.clone();
                    let dropped = dropped.clone();
                    let event_type = event.event_type;
                    let ev = event.clone();
                    tokio::spawn(async move {
                        if tx.try_send(ev).is_err() {
                            let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                            if n == 1 || n % 50 == 0 {
                                tracing::warn!(
                                    event_type = event_type.as_str(),
                                    dropped_for_subscriber = n,
                                    "dropping event: subscriber channel full"
                                );
                            }
                        }
                    });
                }
                SubscriberKind::Handler(handler) => handler(event.clone()),
            }
        }

        Ok(())
    }

    /// `SubscribeChan` (§4.1): subscribe to every event, or only to `types`
    /// when `Some`, over a bounded channel. Returns the subscription id (for
    /// `unsubscribe`) and the receiving end.
    pub fn subscribe(&self, types: Option<Vec<EventType>>) -> (Uuid, mpsc::Receiver<Event>) {
        self.subscribe_with_capacity(types, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn subscribe_with_capacity(
        &self,
        types: Option<Vec<EventType>>,
        capacity: usize,
    ) -> (Uuid, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = Uuid::new_v4();
        self.inner.subscribers.lock().unwrap().insert(
            id,
            Subscriber {
                filter: types,
                kind: SubscriberKind::Channel { tx, dropped: Arc::new(AtomicU64::new(0)) },
            },
        );
        (id, rx)
    }

    /// `Subscribe` (§4.1): register `handler` to be called inline, on the
    /// publisher's task, for every matching event. Unlike `SubscribeChan` a
    /// slow handler here *does* slow `publish` down — callers that can't
    /// guarantee a cheap handler should use the channel variant instead.
    /// Returns the subscription id; pass it to `unsubscribe` to remove it.
    pub fn subscribe_handler<F>(&self, types: Option<Vec<EventType>>, handler: F) -> Uuid
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .insert(id, Subscriber { filter: types, kind: SubscriberKind::Handler(Arc::new(handler)) });
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.subscribers.lock().unwrap().remove(&id);
    }

    /// Most-recent `n` events from the ring buffer, oldest first.
    pub fn history(&self, n: usize) -> Vec<Event> {
        let history = self.inner.history.lock().unwrap();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Close the bus: further `publish` calls fail and all subscriber
    /// channels are dropped, ending their receive loops.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.subscribers.lock().unwrap().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BusStats {
        let subscribers = self.inner.subscribers.lock().unwrap();
        let dropped_total = subscribers
            .values()
            .map(|s| match &s.kind {
                SubscriberKind::Channel { dropped, .. } => dropped.load(Ordering::Relaxed),
                SubscriberKind::Handler(_) => 0,
            })
            .sum();
        BusStats {
            published_total: self.inner.published_total.load(Ordering::Relaxed),
            subscriber_count: subscribers.len(),
            dropped_total,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn ev(event_type: EventType) -> Event {
        Event::new(event_type, EventSource::Agent, None, json!({}))
    }

    #[tokio::test]
    async fn subscriber_receives_matching_events() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe(Some(vec![EventType::UserMessage]));
        bus.publish(ev(EventType::UserMessage)).unwrap();
        bus.publish(ev(EventType::TaskCreated)).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got.event_type, EventType::UserMessage);

        // The non-matching event was never sent to this subscriber.
        let second = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(second.is_err(), "expected no second matching event");
    }

    #[tokio::test]
    async fn full_subscriber_channel_drops_newest_without_blocking_others() {
        let bus = EventBus::new();
        let (_slow_id, mut slow_rx) = bus.subscribe_with_capacity(None, 1);
        let (_fast_id, mut fast_rx) = bus.subscribe_with_capacity(None, 16);

        for _ in 0..5 {
            bus.publish(ev(EventType::TaskCreated)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The fast subscriber got everything; the slow one didn't block it.
        let mut fast_count = 0;
        while fast_rx.try_recv().is_ok() {
            fast_count += 1;
        }
        assert_eq!(fast_count, 5);

        assert!(slow_rx.try_recv().is_ok(), "slow subscriber kept its first event");
        let stats = bus.stats();
        assert!(stats.dropped_total > 0);
    }

    #[tokio::test]
    async fn history_returns_most_recent_events_oldest_first() {
        let bus = EventBus::with_history_capacity(2);
        bus.publish(ev(EventType::TaskCreated)).unwrap();
        bus.publish(ev(EventType::TaskStarted)).unwrap();
        bus.publish(ev(EventType::TaskCompleted)).unwrap();

        let h = bus.history(10);
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].event_type, EventType::TaskStarted);
        assert_eq!(h[1].event_type, EventType::TaskCompleted);
    }

    #[tokio::test]
    async fn two_handler_subscribers_both_observe_a_publish() {
        let bus = EventBus::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let a = seen_a.clone();
        bus.subscribe_handler(None, move |e| a.lock().unwrap().push(e.event_type));
        let b = seen_b.clone();
        bus.subscribe_handler(None, move |e| b.lock().unwrap().push(e.event_type));

        bus.publish(ev(EventType::UserMessage)).unwrap();

        assert_eq!(*seen_a.lock().unwrap(), vec![EventType::UserMessage]);
        assert_eq!(*seen_b.lock().unwrap(), vec![EventType::UserMessage]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_handler_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let id = bus.subscribe_handler(None, move |e| s.lock().unwrap().push(e.event_type));
        bus.unsubscribe(id);
        bus.publish(ev(EventType::UserMessage)).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_bus_rejects_publish() {
        let bus = EventBus::new();
        bus.close();
        assert!(matches!(bus.publish(ev(EventType::TaskCreated)), Err(BusError::Closed)));
    }
}
