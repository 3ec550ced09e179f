//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

use super::ForgeEvent;

/// Receives progress events from the executor.
///
/// Sinks must not fail the run: errors are theirs to log and swallow.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &ForgeEvent);

    /// Emits an event without waiting. Must never block or panic.
    fn try_emit(&self, event: &ForgeEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &ForgeEvent) {}

    fn try_emit(&self, _event: &ForgeEvent) {}
}

/// Writes events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`. Anything but DEBUG logs at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &ForgeEvent) {
        let event_type = event.event_type();
        let data = event.data();
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = %data, "Event: {event_type}");
        } else {
            info!(event_type, event_data = %data, "Event: {event_type}");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &ForgeEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &ForgeEvent) {
        self.log_event(event);
    }
}

/// Keeps every event in memory, for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<ForgeEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ForgeEvent> {
        self.events.read().clone()
    }

    /// Returns the dotted names of all collected events, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(ForgeEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose name starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<ForgeEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &ForgeEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &ForgeEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_done(row: i64) -> ForgeEvent {
        ForgeEvent::RowCompleted {
            stage: "summary".into(),
            row,
            attempts: 1,
            chars: 12,
        }
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(&row_done(1)).await;
        LoggingEventSink::default().emit(&row_done(1)).await;
        LoggingEventSink::debug().try_emit(&row_done(2));
    }

    #[tokio::test]
    async fn test_collecting_sink_filters_by_prefix() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&ForgeEvent::StageStarted {
            stage: "summary".into(),
            eligible: 2,
            completed: 0,
        })
        .await;
        sink.emit(&row_done(1)).await;
        sink.try_emit(&row_done(2));

        assert_eq!(sink.len(), 3);
        assert_eq!(
            sink.event_types(),
            vec!["stage.started", "row.completed", "row.completed"]
        );
        assert_eq!(sink.events_of_type("row.").len(), 2);
    }
}
