use crate::agent::tools::ToolResult;
use crate::providers::{LLMResponse, Message};
use crate::utils::truncate_chars;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const MACHINE_CONTEXT_PAYLOAD_CHARS: usize = 500;

/// Why an invocation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    /// The model answered without calling a tool.
    NoTools,
    /// The turn cap was hit; the result is best-effort.
    MaxTurns,
    /// A staged mock ended the invocation.
    MockTerminated,
}

/// Per-invocation accumulators. Owned by one loop and dropped with it.
#[derive(Debug)]
pub struct InvocationState {
    pub run_id: String,
    pub agent_id: String,
    pub turn_count: usize,
    pub max_turns: usize,
    history: Vec<Message>,
    files: Vec<String>,
    seen_files: HashSet<String>,
    machine_context: Vec<String>,
    last_model_text: String,
    last_tool_text: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl InvocationState {
    pub fn new(run_id: &str, agent_id: &str, max_turns: usize, conversation: Vec<Message>) -> Self {
        Self {
            run_id: run_id.to_string(),
            agent_id: agent_id.to_string(),
            turn_count: 0,
            max_turns,
            history: conversation,
            files: Vec::new(),
            seen_files: HashSet::new(),
            machine_context: Vec::new(),
            last_model_text: String::new(),
            last_tool_text: None,
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
        }
    }

    pub fn has_turns_left(&self) -> bool {
        self.turn_count < self.max_turns
    }

    /// Start the next turn and return its 1-based number.
    pub fn begin_turn(&mut self) -> usize {
        self.turn_count += 1;
        self.turn_count
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn record_usage(&mut self, response: &LLMResponse) {
        self.input_tokens += response.input_tokens.unwrap_or(0);
        self.output_tokens += response.output_tokens.unwrap_or(0);
        self.cached_tokens += response.cached_tokens.unwrap_or(0);
    }

    pub fn push_model_turn(&mut self, text: &str) {
        self.last_model_text = text.to_string();
        self.history.push(Message::model(text));
    }

    pub fn push_tool_turn(&mut self, text: String) {
        self.history.push(Message::user(text));
    }

    pub fn record_tool(&mut self, turn: usize, tool: &str, result: &ToolResult) {
        for file in result.files_generated() {
            if self.seen_files.insert(file.clone()) {
                self.files.push(file.clone());
            }
        }
        let status = if result.is_success() { "ok" } else { "error" };
        let payload = truncate_chars(result.text(), MACHINE_CONTEXT_PAYLOAD_CHARS, "...");
        self.machine_context
            .push(format!("[turn {}] {} -> {}: {}", turn, tool, status, payload));
        self.last_tool_text = Some(result.text().to_string());
    }

    pub fn last_model_text(&self) -> &str {
        &self.last_model_text
    }

    pub fn last_tool_text(&self) -> Option<&str> {
        self.last_tool_text.as_deref()
    }

    /// Generated files across every turn, first-seen order, no duplicates.
    pub fn files_generated(&self) -> &[String] {
        &self.files
    }

    pub fn machine_context(&self) -> Option<String> {
        (!self.machine_context.is_empty()).then(|| self.machine_context.join("\n"))
    }
}
