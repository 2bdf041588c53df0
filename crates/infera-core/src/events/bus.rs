//! In-process publish/subscribe for supervisor events.
//!
//! Two addressing modes:
//!
//! - a global channel carrying every event (optionally restricted to one
//!   [`EventSource`]);
//! - one channel per entity id carrying only that entity's events.
//!
//! [`EventBus::publish`] delivers to both. Each subscriber owns an unbounded
//! queue, so a subscriber registered before a `publish` call always observes
//! the event and per-entity events arrive in publish order. Slow subscribers
//! grow their own queue; nothing is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::trace;

use super::{Event, EventSource};

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event from every source.
    All,
    /// Every event from one source.
    Source(EventSource),
    /// Only events about one entity id.
    Entity(String),
}

impl EventFilter {
    pub fn entity(id: impl Into<String>) -> Self {
        Self::Entity(id.into())
    }
}

type Sender = mpsc::UnboundedSender<Event>;

#[derive(Default)]
struct Registry {
    global: HashMap<u64, (Option<EventSource>, Sender)>,
    by_entity: HashMap<String, HashMap<u64, Sender>>,
}

impl Registry {
    fn insert(&mut self, id: u64, filter: &EventFilter, tx: Sender) {
        match filter {
            EventFilter::All => {
                self.global.insert(id, (None, tx));
            }
            EventFilter::Source(source) => {
                self.global.insert(id, (Some(*source), tx));
            }
            EventFilter::Entity(entity) => {
                self.by_entity.entry(entity.clone()).or_default().insert(id, tx);
            }
        }
    }

    fn remove(&mut self, id: u64, filter: &EventFilter) {
        match filter {
            EventFilter::All | EventFilter::Source(_) => {
                self.global.remove(&id);
            }
            EventFilter::Entity(entity) => {
                if let Some(subs) = self.by_entity.get_mut(entity) {
                    subs.remove(&id);
                    if subs.is_empty() {
                        self.by_entity.remove(entity);
                    }
                }
            }
        }
    }
}

struct BusInner {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

/// Event bus shared by both supervisors and the transport layer.
///
/// Cheap to clone; all clones share the same subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Deliver an event to the global channel and to its entity channel.
    ///
    /// Never blocks on subscribers. Closed subscriber queues are pruned.
    pub fn publish(&self, event: Event) {
        let mut registry = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        registry.global.retain(|_, (source, tx)| {
            if source.is_some_and(|s| s != event.source) {
                return true;
            }
            tx.send(event.clone()).is_ok()
        });

        if let Some(subs) = registry.by_entity.get_mut(&event.entity_id) {
            subs.retain(|_, tx| tx.send(event.clone()).is_ok());
            if subs.is_empty() {
                registry.by_entity.remove(&event.entity_id);
            }
        }

        trace!(kind = ?event.kind, entity = %event.entity_id, "published event");
    }

    /// Subscribe to live events matching `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.register(filter, None)
    }

    /// Subscribe and enqueue `init` ahead of every live event.
    ///
    /// The snapshot is queued while the registry lock is held, so no
    /// concurrent `publish` can slip in front of it.
    pub fn subscribe_with_snapshot(&self, filter: EventFilter, init: Event) -> Subscription {
        self.register(filter, Some(init))
    }

    fn register(&self, filter: EventFilter, init: Option<Event>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut registry = self
                .inner
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(event) = init {
                // Receiver is alive in this scope; send cannot fail.
                let _ = tx.send(event);
            }
            registry.insert(id, &filter, tx);
        }
        Subscription {
            id,
            filter,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscriptions across both addressing modes.
    pub fn subscriber_count(&self) -> usize {
        let registry = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registry.global.len() + registry.by_entity.values().map(HashMap::len).sum::<usize>()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    id: u64,
    filter: EventFilter,
    rx: mpsc::UnboundedReceiver<Event>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Explicitly unsubscribe (same as dropping the handle).
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id, &self.filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LaunchConfig, LogLine, LogStream, ProcessId, ProcessRecord};
    use crate::events::{EventKind, EventPayload};
    use std::path::PathBuf;

    fn log_event(id: &str, text: &str) -> Event {
        Event::process_log(&ProcessId::from(id), LogLine::now(LogStream::Stdout, text))
    }

    fn line_of(event: &Event) -> &str {
        match &event.payload {
            EventPayload::Log { line } => &line.line,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_publish_reaches_global_and_entity_subscribers() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(EventFilter::All);
        let mut one = bus.subscribe(EventFilter::entity("p1"));
        let mut other = bus.subscribe(EventFilter::entity("p2"));

        bus.publish(log_event("p1", "hello"));

        assert_eq!(line_of(&all.try_recv().unwrap()), "hello");
        assert_eq!(line_of(&one.try_recv().unwrap()), "hello");
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn test_source_filter() {
        let bus = EventBus::new();
        let mut downloads = bus.subscribe(EventFilter::Source(EventSource::Download));
        let mut processes = bus.subscribe(EventFilter::Source(EventSource::Process));

        bus.publish(log_event("p1", "x"));

        assert!(downloads.try_recv().is_none());
        assert!(processes.try_recv().is_some());
    }

    #[test]
    fn test_entity_order_is_preserved() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::entity("p1"));
        for i in 0..100 {
            bus.publish(log_event("p1", &i.to_string()));
        }
        for i in 0..100 {
            assert_eq!(line_of(&sub.try_recv().unwrap()), i.to_string());
        }
    }

    #[test]
    fn test_snapshot_precedes_live_events() {
        let bus = EventBus::new();
        let record = ProcessRecord::starting("a", "m", PathBuf::from("/m"), LaunchConfig::default());
        let init = Event::process_snapshot("", vec![record], Default::default());
        let mut sub = bus.subscribe_with_snapshot(EventFilter::All, init);
        bus.publish(log_event("p1", "live"));

        assert_eq!(sub.try_recv().unwrap().kind, EventKind::Init);
        assert_eq!(sub.try_recv().unwrap().kind, EventKind::Log);
    }

    #[test]
    fn test_unsubscribe_removes_handle() {
        let bus = EventBus::new();
        let a = bus.subscribe(EventFilter::All);
        let b = bus.subscribe(EventFilter::entity("p1"));
        assert_eq!(bus.subscriber_count(), 2);
        a.unsubscribe();
        drop(b);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(log_event("p1", "nobody listening"));
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::All);
        let mut handles = Vec::new();
        for t in 0..4 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    bus.publish(log_event(&format!("p{t}"), &i.to_string()));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut count = 0;
        while sub.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
