use crate::agent::tools::ToolResult;
use base64::Engine;
use chrono::Local;

pub(super) const PROMOTED_PREFIX: &str = "[SYSTEM: Tool output promoted as final answer]\n";

/// Opaque continuity token: base64 of `{agent}_{local timestamp}`.
pub fn thought_signature(agent_id: &str) -> String {
    let stamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.6f");
    base64::engine::general_purpose::STANDARD.encode(format!("{}_{}", agent_id, stamp))
}

/// One section of the synthetic tool-result turn.
pub(super) fn tool_result_section(tool: &str, result: &ToolResult) -> String {
    format!("[TOOL RESULT: {}]\n{}", tool, result.to_envelope())
}

/// Final text for an invocation, promoting the last tool output when the
/// model left nothing to return.
pub(super) fn finalize_text(text: &str, last_tool_text: Option<&str>) -> String {
    if !text.trim().is_empty() {
        return text.to_string();
    }
    match last_tool_text {
        Some(payload) => format!("{}{}", PROMOTED_PREFIX, payload),
        None => text.to_string(),
    }
}
