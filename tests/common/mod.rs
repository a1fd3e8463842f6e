// Shared test helpers; not all items used by every test binary.
#![allow(unused)]

use async_trait::async_trait;
use raro::agent::tools::ToolRegistry;
use raro::agent::{AgentLoop, AgentLoopConfig, InvocationRequest};
use raro::config::Config;
use raro::providers::{
    ChatRequest, ClientAvailability, LLMProvider, LLMResponse, Message, ModelClient,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub system_instruction: Option<String>,
    pub cached_content: Option<String>,
    pub thinking_budget: Option<u32>,
}

pub struct MockLLMProvider {
    responses: Mutex<VecDeque<LLMResponse>>,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub default_response: String,
}

impl MockLLMProvider {
    pub fn with_responses(responses: Vec<LLMResponse>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            calls: Mutex::new(Vec::new()),
            default_response: "Mock response".to_string(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> RecordedCall {
        self.calls.lock().unwrap().last().cloned().expect("no calls recorded")
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn chat(&self, req: ChatRequest<'_>) -> anyhow::Result<LLMResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: req.messages,
            model: req.model.map(ToString::to_string),
            system_instruction: req.system_instruction,
            cached_content: req.cached_content,
            thinking_budget: req.thinking_budget,
        });

        let response = self.responses.lock().unwrap().pop_front();
        Ok(response.unwrap_or_else(|| text_response(&self.default_response)))
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }
}

// --- Response builders ---

pub fn text_response(content: &str) -> LLMResponse {
    LLMResponse {
        content: Some(content.to_string()),
        ..Default::default()
    }
}

pub fn usage_response(content: &str, input: u64, output: u64) -> LLMResponse {
    LLMResponse {
        content: Some(content.to_string()),
        input_tokens: Some(input),
        output_tokens: Some(output),
        cached_tokens: None,
    }
}

/// A `json:function` fenced block calling `name` with `args`.
pub fn function_block(name: &str, args: Value) -> String {
    format!(
        "```json:function\n{}\n```",
        json!({"name": name, "args": args})
    )
}

// --- Runtime wiring ---

pub struct TestRuntime {
    pub agent: Arc<AgentLoop>,
    pub registry: Arc<ToolRegistry>,
    pub provider: Arc<MockLLMProvider>,
    pub config: Config,
    pub dir: TempDir,
}

impl TestRuntime {
    pub fn workspace_output(&self, run_id: &str) -> std::path::PathBuf {
        self.dir
            .path()
            .join("sessions")
            .join(run_id)
            .join("output")
    }
}

pub fn test_config(dir: &TempDir, max_turns: usize) -> Config {
    let mut config = Config::default();
    config.workspace.base_dir = dir.path().display().to_string();
    config.agent.max_turns = max_turns;
    config.agent.model_timeout_secs = 5;
    config.agent.retry.max_retries = 0;
    config
}

pub fn runtime(responses: Vec<LLMResponse>, max_turns: usize) -> TestRuntime {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, max_turns);
    let provider = Arc::new(MockLLMProvider::with_responses(responses));
    let registry = Arc::new(ToolRegistry::standard(&config).unwrap());
    let client = ClientAvailability::Ready(ModelClient::new(provider.clone()));
    let loop_config = AgentLoopConfig::from_config(&config, client, registry.clone());
    TestRuntime {
        agent: Arc::new(AgentLoop::new(loop_config)),
        registry,
        provider,
        config,
        dir,
    }
}

pub fn request(run_id: &str, agent_id: &str) -> InvocationRequest {
    InvocationRequest {
        run_id: run_id.to_string(),
        agent_id: Some(agent_id.to_string()),
        operator_directive: Some("Do the task.".to_string()),
        tools: vec![
            "read_file".to_string(),
            "write_file".to_string(),
            "list_files".to_string(),
        ],
        ..Default::default()
    }
}
