use crate::agent::tools::base::{ExecutionContext, ToolDispatcher};
use crate::agent::tools::filesystem::{ListFilesTool, ReadFileTool, WriteFileTool};
use crate::agent::tools::sandbox::{ExecutePythonTool, LocalSandboxProvider, SandboxSessions};
use crate::agent::tools::web::WebSearchTool;
use crate::agent::tools::{Tool, ToolResult};
use crate::agent::workspace::WorkspaceManager;
use crate::config::Config;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Name-keyed tool table that dispatches calls into a run's workspace.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    workspace_base: PathBuf,
    read_limit_chars: usize,
    default_timeout: Duration,
    sandboxes: Option<Arc<SandboxSessions>>,
}

impl ToolRegistry {
    pub fn new(workspace_base: impl Into<PathBuf>) -> Self {
        Self {
            tools: HashMap::new(),
            workspace_base: workspace_base.into(),
            read_limit_chars: crate::config::WorkspaceConfig::default().read_limit_chars,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            sandboxes: None,
        }
    }

    /// The five built-in tools wired from configuration. Python runs in the
    /// local sandbox provider.
    pub fn standard(config: &Config) -> anyhow::Result<Self> {
        let mut registry = Self::new(config.workspace.resolved_base_dir()?);
        registry.read_limit_chars = config.workspace.read_limit_chars;
        registry.default_timeout = Duration::from_secs(config.agent.tool_timeout_secs);

        let sandbox = &config.tools.sandbox;
        let exec_timeout = Duration::from_secs(sandbox.exec_timeout_secs);
        let sessions = Arc::new(SandboxSessions::new(
            Arc::new(LocalSandboxProvider::new(sandbox.python.clone(), exec_timeout)),
            Duration::from_secs(sandbox.session_ttl_secs),
        ));

        registry.register(Arc::new(WebSearchTool::from_config(&config.tools.search)));
        registry.register(Arc::new(ExecutePythonTool::new(
            Arc::clone(&sessions),
            exec_timeout,
        )));
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(ListFilesTool));
        registry.sandboxes = Some(sessions);
        Ok(registry)
    }

    #[must_use]
    pub fn with_read_limit(mut self, chars: usize) -> Self {
        self.read_limit_chars = chars;
        self
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if name.is_empty() || name.len() > 256 || name.chars().any(char::is_control) {
            warn!(
                "tool registry: rejecting tool with invalid name (len={})",
                name.len()
            );
            return;
        }
        if self.tools.contains_key(&name) {
            warn!("tool registry: overwriting duplicate tool '{}'", name);
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Returns a sorted list of all registered tool names.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn workspace(&self, run_id: &str) -> WorkspaceManager {
        WorkspaceManager::new(&self.workspace_base, run_id).with_read_limit(self.read_limit_chars)
    }

    /// Tear down the run's sandbox, if the registry owns one.
    pub async fn end_run(&self, run_id: &str) {
        if let Some(sessions) = &self.sandboxes {
            sessions.kill_session(run_id).await;
        }
    }

    /// Execute a tool in a spawned `tokio::task` with timeout and panic isolation.
    ///
    /// Panics, timeouts and tool errors all come back as `ToolResult::Err`.
    async fn execute_with_guards(
        &self,
        name: &str,
        tool: Arc<dyn Tool>,
        params: Value,
        ctx: ExecutionContext,
    ) -> ToolResult {
        let tool_name = name.to_string();
        let timeout = tool.execution_timeout().unwrap_or(self.default_timeout);
        let timeout_secs = timeout.as_secs();

        let handle = tokio::task::spawn(async move {
            tokio::time::timeout(timeout, tool.execute(params, &ctx)).await
        });

        match handle.await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => ToolResult::error(format!("Tool '{}' failed: {}", tool_name, e)),
            Ok(Err(_)) => {
                warn!("Tool '{}' timed out after {}s", tool_name, timeout_secs);
                ToolResult::error(format!(
                    "Tool '{}' timed out after {}s",
                    tool_name, timeout_secs
                ))
            }
            Err(join_err) => {
                if join_err.is_panic() {
                    // into_panic() consumes the JoinError so extract in one step
                    let panic_payload = join_err.into_panic();
                    let panic_msg = panic_payload
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| panic_payload.downcast_ref::<&str>().copied())
                        .unwrap_or("unknown cause");
                    error!("Tool '{}' panicked: {}", tool_name, panic_msg);
                    ToolResult::error(format!("Tool '{}' crashed: {}", tool_name, panic_msg))
                } else {
                    ToolResult::error(format!("Tool '{}' was cancelled", tool_name))
                }
            }
        }
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, name: &str, args: Value, run_id: &str) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!("unknown tool requested: {}", name);
            return ToolResult::error(format!(
                "Unknown tool: {}. Valid tools: {:?}",
                name,
                self.tool_names()
            ));
        };

        debug!("Executing tool: {} (run={}) with arguments: {}", name, run_id, args);
        let ctx = ExecutionContext {
            run_id: run_id.to_string(),
            workspace: Arc::new(self.workspace(run_id)),
        };
        let result = self.execute_with_guards(name, tool, args, ctx).await;

        match &result {
            ToolResult::Ok { result, .. } => {
                info!("Tool '{}' completed ({} chars)", name, result.len());
            }
            ToolResult::Err { message } => {
                warn!("Tool '{}' returned error: {}", name, message);
            }
        }
        result
    }

    fn definitions(&self, names: &[String]) -> Vec<Value> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n).map(|t| t.to_schema()))
            .collect()
    }
}

/// Tool definitions as the pretty JSON array embedded in the system instruction.
pub fn render_tool_definitions(definitions: &[Value]) -> String {
    serde_json::to_string_pretty(definitions).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
#[allow(clippy::unnecessary_literal_bound)]
mod tests;
