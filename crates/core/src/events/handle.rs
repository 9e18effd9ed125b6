use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::SyncEvent;

/// Envelope wrapping a sync event with metadata
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: SyncEvent,
}

/// Handle for emitting sync events
///
/// This is cheaply cloneable and can be shared across tasks.
/// Events are sent through an async channel to be written by the EventWriter.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    /// Create a new event handle from a channel sender
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit an event asynchronously
    ///
    /// If the channel is closed, the error is logged but the caller is not failed.
    pub async fn emit(&self, event: SyncEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit sync event: {}", e);
        }
    }

    /// Try to emit an event without blocking
    ///
    /// Returns true if the event was sent successfully, false otherwise.
    pub fn try_emit(&self, event: SyncEvent) -> bool {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit sync event: {}", e);
                false
            }
        }
    }
}

/// Emit through an optional handle.
pub(crate) async fn emit_opt(handle: &Option<EventHandle>, event: SyncEvent) {
    if let Some(h) = handle {
        h.emit(event).await;
    }
}
