use std::sync::Arc;

use tokio::sync::mpsc;

use super::{EventEnvelope, EventHandle, EventSink};

/// Background task that receives sync events and hands them to a sink
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
    sink: Arc<dyn EventSink>,
}

impl EventWriter {
    /// Create a new event writer
    pub fn new(rx: mpsc::Receiver<EventEnvelope>, sink: Arc<dyn EventSink>) -> Self {
        Self { rx, sink }
    }

    /// Run the writer, consuming events until the channel is closed
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        tracing::debug!("Event writer started");

        while let Some(envelope) = self.rx.recv().await {
            self.sink.record(&envelope);
        }

        tracing::debug!("Event writer shutting down");
    }
}

/// Create a complete event system
///
/// Returns:
/// - `EventHandle` - for emitting events (clone this to share across tasks)
/// - `EventWriter` - spawn this as a background task with `tokio::spawn(writer.run())`
pub fn create_event_system(
    sink: Arc<dyn EventSink>,
    buffer_size: usize,
) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let handle = EventHandle::new(tx);
    let writer = EventWriter::new(rx, sink);
    (handle, writer)
}
