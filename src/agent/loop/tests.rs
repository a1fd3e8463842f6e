use super::helpers::PROMOTED_PREFIX;
use super::*;
use crate::agent::mock::MockPayload;
use crate::agent::tools::{NoToolsDispatcher, ToolResult};
use crate::bus::EventBus;
use crate::providers::{ChatRequest, LLMProvider};
use async_trait::async_trait;
use base64::Engine;
use std::collections::VecDeque;
use std::sync::Mutex;

struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<usize>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(&self, req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        self.calls.lock().unwrap().push(req.messages.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "done".to_string());
        Ok(LLMResponse {
            content: Some(text),
            input_tokens: Some(10),
            output_tokens: Some(5),
            cached_tokens: None,
        })
    }

    fn default_model(&self) -> &'static str {
        "scripted"
    }
}

/// Succeeds for every tool, reporting `report.txt` from `write_file`.
struct EchoDispatcher {
    seen: Mutex<Vec<String>>,
}

impl EchoDispatcher {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolDispatcher for EchoDispatcher {
    async fn dispatch(&self, name: &str, args: Value, _run_id: &str) -> ToolResult {
        self.seen.lock().unwrap().push(name.to_string());
        match name {
            "write_file" => ToolResult::with_files("Successfully saved to report.txt", vec![
                "report.txt".into(),
            ]),
            "fail" => ToolResult::error("boom"),
            _ => ToolResult::ok(format!("{} ran with {}", name, args)),
        }
    }

    fn definitions(&self, _names: &[String]) -> Vec<Value> {
        Vec::new()
    }
}

fn call(name: &str) -> String {
    format!(
        "```json:function\n{{\"name\": \"{}\", \"args\": {{\"x\": 1}}}}\n```",
        name
    )
}

fn test_config(
    provider: Arc<ScriptedProvider>,
    dispatcher: Arc<dyn ToolDispatcher>,
) -> AgentLoopConfig {
    AgentLoopConfig {
        client: ClientAvailability::Ready(ModelClient::new(provider)),
        dispatcher,
        models: ModelsConfig::default(),
        context: ContextConfig::default(),
        max_turns: 5,
        temperature: 1.0,
        max_output_tokens: None,
        model_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        },
        mocks: Some(Arc::new(InMemoryMockStore::new(Duration::from_secs(60)))),
        probe: None,
        telemetry: Arc::new(NoopTelemetry),
    }
}

fn request() -> InvocationRequest {
    InvocationRequest {
        run_id: "run1".into(),
        agent_id: Some("coder_1".into()),
        model: "fast".into(),
        tools: vec!["write_file".into()],
        ..Default::default()
    }
}

#[test]
fn agent_label_defaults_to_unknown() {
    let mut req = request();
    assert_eq!(req.agent_label(), "coder_1");
    req.agent_id = Some(String::new());
    assert_eq!(req.agent_label(), "unknown");
    req.agent_id = None;
    assert_eq!(req.agent_label(), "unknown");
}

#[test]
fn thought_signature_decodes_to_agent_and_time() {
    let sig = thought_signature("research_1");
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(sig)
        .unwrap();
    let decoded = String::from_utf8(decoded).unwrap();
    let stamp = decoded.strip_prefix("research_1_").unwrap();
    chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
}

#[test]
fn state_dedups_files_in_first_seen_order() {
    let mut state = InvocationState::new("r", "a", 3, Vec::new());
    state.record_tool(1, "write_file", &ToolResult::with_files("ok", vec!["b.txt".into()]));
    state.record_tool(
        2,
        "execute_python",
        &ToolResult::with_files("ok", vec!["a.png".into(), "b.txt".into()]),
    );
    state.record_tool(2, "read_file", &ToolResult::error("File not found: z"));
    assert_eq!(state.files_generated(), ["b.txt", "a.png"]);
    assert_eq!(
        state.machine_context().unwrap(),
        "[turn 1] write_file -> ok: ok\n[turn 2] execute_python -> ok: ok\n[turn 2] read_file -> error: File not found: z"
    );
    assert_eq!(state.last_tool_text(), Some("File not found: z"));
}

#[test]
fn state_machine_context_is_none_without_tools() {
    let state = InvocationState::new("r", "a", 3, Vec::new());
    assert!(state.machine_context().is_none());
    assert!(state.has_turns_left());
}

#[test]
fn finalize_promotes_tool_output_only_when_text_empty() {
    assert_eq!(finalize_text("answer", Some("tool")), "answer");
    assert_eq!(
        finalize_text("  \n", Some("tool out")),
        format!("{}tool out", PROMOTED_PREFIX)
    );
    assert_eq!(finalize_text("", None), "");
}

#[tokio::test]
async fn no_tool_reply_is_final() {
    let provider = Arc::new(ScriptedProvider::new(&["The answer is 4."]));
    let agent = AgentLoop::new(test_config(provider.clone(), Arc::new(NoToolsDispatcher)));
    let result = agent.invoke(&request()).await.unwrap();
    assert_eq!(result.text, "The answer is 4.");
    assert_eq!(result.terminal, Some(Terminal::NoTools));
    assert_eq!(result.input_tokens, 10);
    assert_eq!(result.output_tokens, 5);
    assert!(result.machine_context.is_none());
    assert!(result.thought_signature.is_some());
    assert!(!result.cache_hit);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn tool_results_feed_next_turn() {
    let first = format!("Saving now.\n{}", call("write_file"));
    let provider = Arc::new(ScriptedProvider::new(&[&first, "Saved the report."]));
    let dispatcher = Arc::new(EchoDispatcher::new());
    let bus = Arc::new(EventBus::new(16));
    let mut rx = bus.subscribe();
    let config = test_config(provider.clone(), dispatcher.clone()).with_telemetry(bus.clone());
    let result = AgentLoop::new(config).invoke(&request()).await.unwrap();

    assert_eq!(result.text, "Saved the report.");
    assert_eq!(result.files_generated, vec!["report.txt"]);
    assert_eq!(result.input_tokens, 20);
    assert_eq!(
        result.machine_context.as_deref(),
        Some("[turn 1] write_file -> ok: Successfully saved to report.txt")
    );
    // user, model, tool-result user turn
    assert_eq!(*provider.calls.lock().unwrap(), vec![1, 3]);

    let reasoning = rx.recv().await.unwrap().event;
    assert!(matches!(reasoning, AgentEvent::Reasoning { ref text, .. } if text == "Saving now."));
    assert!(matches!(rx.recv().await.unwrap().event, AgentEvent::ToolCall { .. }));
    assert!(matches!(
        rx.recv().await.unwrap().event,
        AgentEvent::ToolResult { success: true, .. }
    ));
}

#[tokio::test]
async fn empty_final_text_promotes_last_tool_output() {
    let provider = Arc::new(ScriptedProvider::new(&[&call("lookup"), ""]));
    let agent = AgentLoop::new(test_config(provider, Arc::new(EchoDispatcher::new())));
    let result = agent.invoke(&request()).await.unwrap();
    assert!(result.text.starts_with(PROMOTED_PREFIX));
    assert!(result.text.contains("lookup ran with"));
}

#[tokio::test]
async fn turn_cap_returns_degraded_result() {
    let replies: Vec<String> = (0..10)
        .map(|i| format!("step {}\n{}", i, call("lookup")))
        .collect();
    let refs: Vec<&str> = replies.iter().map(String::as_str).collect();
    let provider = Arc::new(ScriptedProvider::new(&refs));
    let mut config = test_config(provider.clone(), Arc::new(EchoDispatcher::new()));
    config.max_turns = 3;
    let result = AgentLoop::new(config).invoke(&request()).await.unwrap();

    assert_eq!(provider.call_count(), 3);
    assert_eq!(result.terminal, Some(Terminal::MaxTurns));
    assert_eq!(result.text, "step 2");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn staged_mock_replaces_first_call_and_stops() {
    let provider = Arc::new(ScriptedProvider::new(&["real reply"]));
    let dispatcher = Arc::new(EchoDispatcher::new());
    let agent = AgentLoop::new(test_config(provider.clone(), dispatcher.clone()));
    agent
        .mocks()
        .unwrap()
        .stage(
            "run1",
            "coder_1",
            MockPayload::new(format!("Scripted.\n{}", call("write_file"))),
        )
        .await
        .unwrap();

    let result = agent.invoke(&request()).await.unwrap();
    assert_eq!(provider.call_count(), 0);
    assert_eq!(result.terminal, Some(Terminal::MockTerminated));
    assert_eq!(result.text, "Scripted.");
    assert_eq!(result.files_generated, vec!["report.txt"]);
    assert_eq!(*dispatcher.seen.lock().unwrap(), vec!["write_file"]);

    // Consumed: the next invocation goes to the model
    let second = agent.invoke(&request()).await.unwrap();
    assert_eq!(second.text, "real reply");
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn mock_without_forced_tools_is_final() {
    let provider = Arc::new(ScriptedProvider::new(&[]));
    let dispatcher = Arc::new(EchoDispatcher::new());
    let agent = AgentLoop::new(test_config(provider.clone(), dispatcher.clone()));
    agent
        .mocks()
        .unwrap()
        .stage(
            "run1",
            "coder_1",
            MockPayload {
                content: call("write_file"),
                force_tool_execution: false,
            },
        )
        .await
        .unwrap();

    let result = agent.invoke(&request()).await.unwrap();
    assert_eq!(result.text, call("write_file"));
    assert!(dispatcher.seen.lock().unwrap().is_empty());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn unavailable_client_fails_before_loop() {
    let provider = Arc::new(ScriptedProvider::new(&[]));
    let mut config = test_config(provider.clone(), Arc::new(NoToolsDispatcher));
    config.client = ClientAvailability::Unavailable("no key".into());
    let err = AgentLoop::new(config).invoke(&request()).await.unwrap_err();
    assert!(matches!(err, RaroError::Unavailable(ref r) if r == "no key"));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn model_deadline_is_an_error() {
    let provider = Arc::new(ScriptedProvider {
        delay: Some(Duration::from_secs(2)),
        ..ScriptedProvider::new(&["late"])
    });
    let mut config = test_config(provider, Arc::new(NoToolsDispatcher));
    config.model_timeout = Duration::from_millis(50);
    let err = AgentLoop::new(config).invoke(&request()).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
}

#[tokio::test]
async fn batch_isolates_failures_and_keeps_order() {
    let provider = Arc::new(ScriptedProvider::new(&["a", "b"]));
    let agent = Arc::new(AgentLoop::new(test_config(
        provider,
        Arc::new(NoToolsDispatcher),
    )));
    let results = agent
        .invoke_batch(vec![request(), request()])
        .await;
    assert_eq!(results.len(), 2);
    let mut texts: Vec<_> = results.iter().map(|r| r.text.clone()).collect();
    texts.sort();
    assert_eq!(texts, vec!["a", "b"]);

    let mut config = test_config(
        Arc::new(ScriptedProvider::new(&[])),
        Arc::new(NoToolsDispatcher),
    );
    config.client = ClientAvailability::Unavailable("down".into());
    let failing = Arc::new(AgentLoop::new(config));
    let results = failing.invoke_batch(vec![request()]).await;
    assert!(results[0].is_error());
    assert!(results[0].text.is_empty());
    assert!(results[0].thought_signature.is_none());
    assert!(!results[0].cache_hit);
}

#[tokio::test]
async fn delegation_block_survives_in_final_text() {
    let reply = "Need more data.\n```json:delegation\n{\"reason\": \"gap\", \"new_nodes\": [{\"id\": \"research_gap\", \"prompt\": \"find it\"}]}\n```";
    let provider = Arc::new(ScriptedProvider::new(&[reply]));
    let agent = AgentLoop::new(test_config(provider, Arc::new(NoToolsDispatcher)));
    let result = agent.invoke(&request()).await.unwrap();
    let delegation = result.delegation(None).unwrap();
    assert_eq!(delegation.new_nodes[0].id, "research_gap");
    assert_eq!(delegation.new_nodes[0].prompt, "find it");
}

#[tokio::test]
async fn unreachable_debug_sink_does_not_affect_invocation() {
    let provider = Arc::new(ScriptedProvider::new(&[call("write_file").as_str(), "all done"]));
    let mut config = test_config(provider.clone(), Arc::new(EchoDispatcher::new()));
    // Nothing listens on the discard port, and the timeout is far above the budget below
    let dead_sink = DebugProbe::new("http://127.0.0.1:9", Duration::from_secs(30));
    config.probe = Some(Arc::new(dead_sink));
    let agent = AgentLoop::new(config);

    let result = tokio::time::timeout(Duration::from_secs(5), agent.invoke(&request()))
        .await
        .expect("invoke must not wait on the debug sink")
        .unwrap();
    assert_eq!(result.text, "all done");
    assert_eq!(result.files_generated, vec!["report.txt"]);
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn debug_sink_receives_one_capture_per_invocation() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/capture"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;

    let provider = Arc::new(ScriptedProvider::new(&[call("write_file").as_str(), "all done"]));
    let mut config = test_config(provider.clone(), Arc::new(EchoDispatcher::new()));
    config.probe = Some(Arc::new(DebugProbe::new(&sink.uri(), Duration::from_secs(2))));
    let agent = AgentLoop::new(config);
    let mut req = request();
    req.operator_directive = Some("Write the report.".into());

    let result = agent.invoke(&req).await.unwrap();
    assert_eq!(result.text, "all done");
    assert_eq!(provider.call_count(), 2);

    // Captures are posted from a spawned task
    for _ in 0..50 {
        if !sink.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let received = sink.received_requests().await.unwrap();
    assert_eq!(received.len(), 1, "one capture for a two-turn invocation");

    let capture: ProbeCapture = received[0].body_json().unwrap();
    assert_eq!(capture.agent_id, "coder_1");
    assert_eq!(capture.run_id, "run1");
    assert_eq!(capture.tools, vec!["write_file"]);
    assert!(capture.final_user_message.contains("Write the report."));
    assert!(!capture.final_system_prompt.is_empty());
}
