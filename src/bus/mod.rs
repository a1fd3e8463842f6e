pub mod events;
pub mod queue;

pub use events::{AgentEvent, EventEnvelope};
pub use queue::{EventBus, NoopTelemetry, TelemetrySink};
