mod helpers;
mod state;

pub use helpers::thought_signature;
pub use state::{InvocationState, Terminal};

use helpers::{finalize_text, tool_result_section};

use crate::agent::context::RequestBuilder;
use crate::agent::delegation::{DelegationRequest, GraphView, extract_delegation};
use crate::agent::mock::{FileMockStore, InMemoryMockStore, MockStore};
use crate::agent::parsers::{BlockType, parse_function_calls, strip_blocks};
use crate::agent::probe::{DebugProbe, ProbeCapture};
use crate::agent::tools::ToolDispatcher;
use crate::bus::{AgentEvent, NoopTelemetry, TelemetrySink};
use crate::config::{Config, ContextConfig, ModelsConfig};
use crate::errors::RaroError;
use crate::providers::{ClientAvailability, LLMResponse, ModelClient, RetryConfig};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One agent invocation as the scheduler requests it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub run_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Concrete model id or a `models` alias. Empty means the client default.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub persona_prompt: Option<String>,
    #[serde(default)]
    pub operator_directive: Option<String>,
    #[serde(default)]
    pub context_data: Option<Value>,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub parent_signature: Option<String>,
    #[serde(default)]
    pub thinking_level: Option<u32>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub cached_content_id: Option<String>,
    #[serde(default)]
    pub allow_delegation: bool,
    #[serde(default)]
    pub graph_view: Option<GraphView>,
}

impl InvocationRequest {
    pub fn agent_label(&self) -> &str {
        self.agent_id
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub thought_signature: Option<String>,
    pub cache_hit: bool,
    pub files_generated: Vec<String>,
    pub cached_content_id: Option<String>,
    pub machine_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<Terminal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvocationResult {
    /// Result for an invocation that failed outright.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The graph edit requested in the final text, if any.
    pub fn delegation(&self, graph: Option<&GraphView>) -> Option<DelegationRequest> {
        extract_delegation(&self.text, graph)
    }
}

/// Configuration for creating an [`AgentLoop`].
pub struct AgentLoopConfig {
    pub client: ClientAvailability,
    pub dispatcher: Arc<dyn ToolDispatcher>,
    pub models: ModelsConfig,
    pub context: ContextConfig,
    pub max_turns: usize,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    /// Deadline for one model call, retries included.
    pub model_timeout: Duration,
    pub retry: RetryConfig,
    pub mocks: Option<Arc<dyn MockStore>>,
    pub probe: Option<Arc<DebugProbe>>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl AgentLoopConfig {
    pub fn from_config(
        config: &Config,
        client: ClientAvailability,
        dispatcher: Arc<dyn ToolDispatcher>,
    ) -> Self {
        let probe = config.debug.probe_url.as_deref().map(|url| {
            Arc::new(DebugProbe::new(
                url,
                Duration::from_millis(config.debug.probe_timeout_ms),
            ))
        });
        Self {
            client,
            dispatcher,
            models: config.models.clone(),
            context: config.context.clone(),
            max_turns: config.agent.max_turns,
            temperature: config.agent.temperature,
            max_output_tokens: config.agent.max_output_tokens,
            model_timeout: Duration::from_secs(config.agent.model_timeout_secs),
            retry: RetryConfig::from(&config.agent.retry),
            mocks: Some(mock_store(config)),
            probe,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// Staged turns live next to the workspace so other processes can stage them.
fn mock_store(config: &Config) -> Arc<dyn MockStore> {
    let ttl = Duration::from_secs(config.debug.mock_ttl_secs);
    match config.workspace.resolved_base_dir() {
        Ok(base) => Arc::new(FileMockStore::under_base(&base, ttl)),
        Err(e) => {
            warn!("no workspace base for staged mocks, keeping them in memory: {}", e);
            Arc::new(InMemoryMockStore::new(ttl))
        }
    }
}

/// Drives one agent from prepared request to final answer.
pub struct AgentLoop {
    client: ClientAvailability,
    dispatcher: Arc<dyn ToolDispatcher>,
    builder: RequestBuilder,
    models: ModelsConfig,
    max_turns: usize,
    model_timeout: Duration,
    retry: RetryConfig,
    mocks: Option<Arc<dyn MockStore>>,
    probe: Option<Arc<DebugProbe>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl AgentLoop {
    pub fn new(config: AgentLoopConfig) -> Self {
        let cache = match &config.client {
            ClientAvailability::Ready(client) => client.cache.clone(),
            ClientAvailability::Unavailable(_) => None,
        };
        let builder = RequestBuilder::new(config.dispatcher.clone(), config.context)
            .with_cache(cache)
            .with_generation(config.temperature, config.max_output_tokens);
        Self {
            client: config.client,
            dispatcher: config.dispatcher,
            builder,
            models: config.models,
            max_turns: config.max_turns.max(1),
            model_timeout: config.model_timeout,
            retry: config.retry,
            mocks: config.mocks,
            probe: config.probe,
            telemetry: config.telemetry,
        }
    }

    pub fn mocks(&self) -> Option<&Arc<dyn MockStore>> {
        self.mocks.as_ref()
    }

    /// Run one invocation. Only an unavailable client or a failed model call
    /// is an error; tool and parse problems are fed back to the model.
    pub async fn invoke(&self, req: &InvocationRequest) -> Result<InvocationResult, RaroError> {
        let client = self.client.client()?.clone();
        let agent_id = req.agent_label().to_string();
        let model = if req.model.trim().is_empty() {
            client.provider.default_model().to_string()
        } else {
            self.models.resolve(&req.model).to_string()
        };
        debug!(
            "Invoking {} (run {}) on {} with tools {:?}",
            agent_id, req.run_id, model, req.tools
        );

        let prepared = self.builder.prepare(req, &model).await;

        if let Some(probe) = &self.probe {
            let mut capture = ProbeCapture::new(&agent_id, &req.run_id);
            capture.tools = req.tools.clone();
            capture.final_system_prompt = prepared.system_instruction.clone();
            capture.final_user_message = prepared.final_user_message();
            capture.original_payload = serde_json::to_value(req).unwrap_or(Value::Null);
            probe.capture(capture);
        }

        let mut mock = match (&self.mocks, req.agent_id.as_deref()) {
            (Some(store), Some(agent)) if !agent.is_empty() => {
                let staged = store.take(&req.run_id, agent).await;
                if staged.is_some() {
                    info!("Consumed staged mock for {} in run {}", agent, req.run_id);
                }
                staged
            }
            _ => None,
        };

        let mut state = InvocationState::new(
            &req.run_id,
            &agent_id,
            self.max_turns,
            prepared.conversation.clone(),
        );
        let mut outcome: Option<(Terminal, String)> = None;

        while state.has_turns_left() {
            let turn = state.begin_turn();

            let (text, mocked) = match mock.take() {
                Some(staged) => (staged.content, Some(staged.force_tool_execution)),
                None => {
                    let chat = prepared.chat_request(state.history().to_vec());
                    let response = self.call_model(&client, chat).await?;
                    state.record_usage(&response);
                    (response.text().to_string(), None)
                }
            };
            state.push_model_turn(&text);

            if mocked == Some(false) {
                outcome = Some((Terminal::MockTerminated, text));
                break;
            }

            let calls = parse_function_calls(&text);
            if calls.is_empty() {
                outcome = Some((Terminal::NoTools, text));
                break;
            }

            let reasoning = strip_blocks(&text, BlockType::Function);
            let reasoning = reasoning.trim();
            if !reasoning.is_empty() {
                self.telemetry.publish(AgentEvent::Reasoning {
                    run_id: req.run_id.clone(),
                    agent_id: agent_id.clone(),
                    turn,
                    text: reasoning.to_string(),
                });
            }

            let mut sections = Vec::with_capacity(calls.len());
            for call in calls {
                self.telemetry.publish(AgentEvent::ToolCall {
                    run_id: req.run_id.clone(),
                    agent_id: agent_id.clone(),
                    turn,
                    tool: call.name.clone(),
                    args: call.args.clone(),
                });
                let started = Instant::now();
                let result = self
                    .dispatcher
                    .dispatch(&call.name, call.args, &req.run_id)
                    .await;
                self.telemetry.publish(AgentEvent::ToolResult {
                    run_id: req.run_id.clone(),
                    agent_id: agent_id.clone(),
                    turn,
                    tool: call.name.clone(),
                    success: result.is_success(),
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
                state.record_tool(turn, &call.name, &result);
                sections.push(tool_result_section(&call.name, &result));
            }
            state.push_tool_turn(sections.join("\n\n"));

            if mocked == Some(true) {
                outcome = Some((
                    Terminal::MockTerminated,
                    strip_blocks(&text, BlockType::Function).trim().to_string(),
                ));
                break;
            }
        }

        let (terminal, text) = outcome.unwrap_or_else(|| {
            warn!(
                "Agent {} hit the turn cap ({}) in run {}; returning best available text",
                agent_id, self.max_turns, req.run_id
            );
            let last = strip_blocks(state.last_model_text(), BlockType::Function);
            (Terminal::MaxTurns, last.trim().to_string())
        });

        let text = finalize_text(&text, state.last_tool_text());
        let cache_hit = prepared.active_cache_ref.is_some() || state.cached_tokens > 0;
        Ok(InvocationResult {
            text,
            input_tokens: state.input_tokens,
            output_tokens: state.output_tokens,
            thought_signature: Some(thought_signature(&agent_id)),
            cache_hit,
            files_generated: state.files_generated().to_vec(),
            cached_content_id: prepared.active_cache_ref.clone(),
            machine_context: state.machine_context(),
            terminal: Some(terminal),
            error: None,
        })
    }

    async fn call_model(
        &self,
        client: &ModelClient,
        chat: crate::providers::ChatRequest<'_>,
    ) -> Result<LLMResponse, RaroError> {
        let call = client.provider.chat_with_retry(chat, Some(self.retry.clone()));
        match tokio::time::timeout(self.model_timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(RaroError::from_anyhow(e)),
            Err(_) => Err(RaroError::Provider {
                message: format!(
                    "model call timed out after {}s",
                    self.model_timeout.as_secs_f64()
                ),
                retryable: true,
            }),
        }
    }

    /// Run independent invocations concurrently. A failure or panic in one
    /// becomes an error result in its slot; order matches `requests`.
    pub async fn invoke_batch(
        self: &Arc<Self>,
        requests: Vec<InvocationRequest>,
    ) -> Vec<InvocationResult> {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|req| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.invoke(&req).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("Batch invocation failed: {}", e);
                    InvocationResult::failed(e.to_string())
                }
                Err(join_err) => {
                    warn!("Batch invocation panicked: {}", join_err);
                    InvocationResult::failed(format!("invocation panicked: {}", join_err))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
