//! Event sink trait and implementations.

use tracing::{debug, info, Level};

/// Receives run lifecycle events.
///
/// Called from the driver task and from runner tasks; implementations must
/// be cheap and must never fail.
pub trait EventSink: Send + Sync {
    /// Emits an event without blocking.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that logs events using the tracing framework.
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
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let data = data.map(|d| d.to_string()).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
        }
    }
}

/// A collecting event sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event types, in order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
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

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_and_logging_sinks() {
        NoOpEventSink.try_emit("run.started", Some(serde_json::json!({"items": 3})));
        LoggingEventSink::default().try_emit("stage.started", None);
        LoggingEventSink::debug().try_emit("stage.classified", Some(serde_json::json!({})));
    }

    #[test]
    fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.try_emit("stage.started", None);
        sink.try_emit("item.failed", Some(serde_json::json!({"item": "a"})));
        sink.try_emit("stage.completed", None);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(
            sink.types(),
            vec!["stage.started", "item.failed", "stage.completed"]
        );
        assert_eq!(sink.events()[1].1.as_ref().unwrap()["item"], "a");
    }
}
