//! Entity write events and their subscribers.
//!
//! # Responsibility
//! - Describe what a committed write changed, per entity.
//! - Fan events out to registered subscribers (indexers, cache invalidation).
//!
//! # Invariants
//! - Events are dispatched only after the write transaction committed.
//! - A failing subscriber is logged and skipped; it never fails the write
//!   and never stops later subscribers.

use crate::context::Context;
use log::{error, info};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteKind {
    Written,
    Deleted,
}

/// All rows of one entity touched by a write call.
///
/// Translation events carry the parent ids, mapping events the owner ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityWrittenEvent {
    pub entity_name: String,
    pub kind: WriteKind,
    pub ids: Vec<String>,
    /// Written values (or pre-delete snapshots), one per affected row.
    pub payloads: Vec<Map<String, Value>>,
    /// Foreign keys as stored before an update replaced them, keyed by
    /// property. One entry per updated row that rewrote a reference.
    pub replaced_references: Vec<Map<String, Value>>,
    pub context: Context,
}

impl EntityWrittenEvent {
    pub fn new(entity_name: impl Into<String>, kind: WriteKind, context: Context) -> Self {
        Self {
            entity_name: entity_name.into(),
            kind,
            ids: Vec::new(),
            payloads: Vec::new(),
            replaced_references: Vec::new(),
            context,
        }
    }

    pub(crate) fn push(&mut self, id: String, payload: Map<String, Value>) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        self.payloads.push(payload);
    }
}

/// Finds the event of `entity_name`, if the write touched it.
pub fn find_event<'e>(events: &'e [EntityWrittenEvent], entity_name: &str) -> Option<&'e EntityWrittenEvent> {
    events.iter().find(|event| event.entity_name == entity_name)
}

#[derive(Debug)]
pub struct SubscriberError {
    pub subscriber: String,
    pub message: String,
}

impl SubscriberError {
    pub fn new(subscriber: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            message: message.into(),
        }
    }
}

impl Display for SubscriberError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber `{}` failed: {}", self.subscriber, self.message)
    }
}

impl Error for SubscriberError {}

/// Consumer of committed write events.
pub trait EntityWrittenSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn on_entity_written(
        &self,
        conn: &Connection,
        events: &[EntityWrittenEvent],
    ) -> Result<(), SubscriberError>;
}

/// Ordered list of subscribers notified after each committed write.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    subscribers: Vec<Arc<dyn EntityWrittenSubscriber>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn EntityWrittenSubscriber>) -> &mut Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Notifies every subscriber; returns the failures that were logged.
    pub fn dispatch(&self, conn: &Connection, events: &[EntityWrittenEvent]) -> Vec<SubscriberError> {
        if events.is_empty() {
            return Vec::new();
        }

        let mut failures = Vec::new();
        for subscriber in &self.subscribers {
            let started_at = Instant::now();
            match subscriber.on_entity_written(conn, events) {
                Ok(()) => info!(
                    "event=event_dispatch module=event status=ok subscriber={} events={} duration_ms={}",
                    subscriber.name(),
                    events.len(),
                    started_at.elapsed().as_millis()
                ),
                Err(err) => {
                    error!(
                        "event=event_dispatch module=event status=error subscriber={} events={} duration_ms={} error={}",
                        subscriber.name(),
                        events.len(),
                        started_at.elapsed().as_millis(),
                        err
                    );
                    failures.push(err);
                }
            }
        }
        failures
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|subscriber| subscriber.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EntityWrittenEvent, EntityWrittenSubscriber, EventDispatcher, SubscriberError, WriteKind,
    };
    use crate::context::Context;
    use rusqlite::Connection;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting(AtomicUsize);

    impl EntityWrittenSubscriber for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_entity_written(
            &self,
            _conn: &Connection,
            events: &[EntityWrittenEvent],
        ) -> Result<(), SubscriberError> {
            self.0.fetch_add(events.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl EntityWrittenSubscriber for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_entity_written(
            &self,
            _conn: &Connection,
            _events: &[EntityWrittenEvent],
        ) -> Result<(), SubscriberError> {
            Err(SubscriberError::new("failing", "boom"))
        }
    }

    #[test]
    fn failing_subscriber_does_not_stop_later_ones() {
        let conn = Connection::open_in_memory().unwrap();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let mut dispatcher = EventDispatcher::new();
        dispatcher
            .subscribe(Arc::new(Failing))
            .subscribe(counting.clone());

        let mut event = EntityWrittenEvent::new("product", WriteKind::Written, Context::default());
        event.push("a".repeat(32), Map::new());
        let failures = dispatcher.dispatch(&conn, &[event]);

        assert_eq!(failures.len(), 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn push_deduplicates_ids_but_keeps_payloads() {
        let mut event = EntityWrittenEvent::new("product", WriteKind::Written, Context::default());
        event.push("a".into(), Map::new());
        event.push("a".into(), Map::new());
        assert_eq!(event.ids.len(), 1);
        assert_eq!(event.payloads.len(), 2);
    }
}
