use super::*;
use serde_json::json;

#[test]
fn accessors_cover_every_variant() {
    let events = [
        AgentEvent::Reasoning {
            run_id: "r".into(),
            agent_id: "a".into(),
            turn: 1,
            text: "thinking".into(),
        },
        AgentEvent::ToolCall {
            run_id: "r".into(),
            agent_id: "a".into(),
            turn: 1,
            tool: "web_search".into(),
            args: json!({"query": "x"}),
        },
        AgentEvent::ToolResult {
            run_id: "r".into(),
            agent_id: "a".into(),
            turn: 1,
            tool: "web_search".into(),
            success: true,
            duration_ms: 12,
        },
    ];
    for event in &events {
        assert_eq!(event.run_id(), "r");
        assert_eq!(event.agent_id(), "a");
    }
}

#[test]
fn envelope_serializes_flat_with_type_tag() {
    let envelope = EventEnvelope {
        timestamp: Utc::now(),
        event: AgentEvent::ToolResult {
            run_id: "run1".into(),
            agent_id: "coder_1".into(),
            turn: 2,
            tool: "execute_python".into(),
            success: false,
            duration_ms: 40,
        },
    };
    let value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(value["type"], "tool_result");
    assert_eq!(value["agent_id"], "coder_1");
    assert_eq!(value["success"], false);
    assert!(value["timestamp"].is_string());
}
