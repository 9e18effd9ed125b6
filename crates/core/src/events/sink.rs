use std::sync::Mutex;

use super::{EventEnvelope, SyncEvent};

/// Destination for drained sync events.
pub trait EventSink: Send + Sync {
    fn record(&self, envelope: &EventEnvelope);
}

/// Writes events to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, envelope: &EventEnvelope) {
        let payload = serde_json::to_string(&envelope.event).unwrap_or_default();
        if envelope.event.is_warning() {
            tracing::warn!(
                event_type = envelope.event.event_type(),
                at = %envelope.timestamp,
                "{}",
                payload
            );
        } else {
            tracing::info!(
                event_type = envelope.event.event_type(),
                at = %envelope.timestamp,
                "{}",
                payload
            );
        }
    }
}

/// Keeps events in memory. Used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().map(|e| e.event.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|e| e.event.clone()).collect(),
        }
    }
}

impl EventSink for MemorySink {
    fn record(&self, envelope: &EventEnvelope) {
        match self.events.lock() {
            Ok(mut events) => events.push(envelope.clone()),
            Err(poisoned) => poisoned.into_inner().push(envelope.clone()),
        }
    }
}
