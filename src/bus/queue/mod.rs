use crate::bus::{AgentEvent, EventEnvelope};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1024;

/// Publish-and-forget telemetry channel.
///
/// Implementations must not block and must swallow their own failures; the
/// invocation loop never looks at the outcome.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, event: AgentEvent);
}

/// Discards every event.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn publish(&self, _event: AgentEvent) {}
}

/// In-process fan-out of agent events to any number of subscribers.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TelemetrySink for EventBus {
    fn publish(&self, event: AgentEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        // No subscribers is the common case outside the server
        if self.tx.send(envelope).is_err() {
            debug!("telemetry event dropped: no subscribers");
        }
    }
}
