use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Telemetry emitted by the invocation loop while an agent works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Text the model wrote around its tool-call fences.
    Reasoning {
        run_id: String,
        agent_id: String,
        turn: usize,
        text: String,
    },
    ToolCall {
        run_id: String,
        agent_id: String,
        turn: usize,
        tool: String,
        args: Value,
    },
    ToolResult {
        run_id: String,
        agent_id: String,
        turn: usize,
        tool: String,
        success: bool,
        duration_ms: u64,
    },
}

impl AgentEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Reasoning { run_id, .. }
            | Self::ToolCall { run_id, .. }
            | Self::ToolResult { run_id, .. } => run_id,
        }
    }

    pub fn agent_id(&self) -> &str {
        match self {
            Self::Reasoning { agent_id, .. }
            | Self::ToolCall { agent_id, .. }
            | Self::ToolResult { agent_id, .. } => agent_id,
        }
    }
}

/// An event stamped with its publish time, as delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

#[cfg(test)]
mod tests;
