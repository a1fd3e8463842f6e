use crate::agent::workspace::WorkspaceManager;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one tool dispatch.
///
/// Serialized for the model through [`ToolResult::to_envelope`], whose
/// `success` flag and `files_generated` list downstream consumers branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Ok {
        result: String,
        files_generated: Vec<String>,
    },
    Err {
        message: String,
    },
}

impl ToolResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self::Ok {
            result: result.into(),
            files_generated: Vec::new(),
        }
    }

    pub fn with_files(result: impl Into<String>, files_generated: Vec<String>) -> Self {
        Self::Ok {
            result: result.into(),
            files_generated,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Err {
            message: message.into(),
        }
    }

    /// Convert a `Result<String>` into a `ToolResult`, formatting errors with
    /// the given prefix (e.g. `"Search"` gives `"Search failed: ..."`).
    pub fn from_result(result: anyhow::Result<String>, error_prefix: &str) -> Self {
        match result {
            Ok(content) => Self::ok(content),
            Err(e) => Self::error(format!("{} failed: {}", error_prefix, e)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn files_generated(&self) -> &[String] {
        match self {
            Self::Ok {
                files_generated, ..
            } => files_generated,
            Self::Err { .. } => &[],
        }
    }

    /// The result text on success, the error message otherwise.
    pub fn text(&self) -> &str {
        match self {
            Self::Ok { result, .. } => result,
            Self::Err { message } => message,
        }
    }

    pub fn to_envelope(&self) -> Value {
        match self {
            Self::Ok {
                result,
                files_generated,
            } => json!({
                "success": true,
                "result": result,
                "files_generated": files_generated,
            }),
            Self::Err { message } => json!({
                "success": false,
                "error": message,
                "files_generated": [],
            }),
        }
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

/// Per-call context: the run the call belongs to and its workspace.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub workspace: Arc<WorkspaceManager>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value; // JSON Schema

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult>;

    /// Per-tool execution timeout. `None` defers to the registry default.
    fn execution_timeout(&self) -> Option<Duration> {
        None
    }

    /// Definition rendered into the system instruction.
    fn to_schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": self.parameters(),
        })
    }
}

/// The invocation loop's view of tool execution.
///
/// Implementations never fail: every problem, including an unknown tool
/// name, comes back as [`ToolResult::Err`].
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, name: &str, args: Value, run_id: &str) -> ToolResult;

    /// Schemas for `names`, in request order, skipping unknown names.
    fn definitions(&self, names: &[String]) -> Vec<Value>;
}

/// Dispatcher for agents that run without tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToolsDispatcher;

#[async_trait]
impl ToolDispatcher for NoToolsDispatcher {
    async fn dispatch(&self, name: &str, _args: Value, _run_id: &str) -> ToolResult {
        ToolResult::error(format!("Unknown tool: {}. Valid tools: []", name))
    }

    fn definitions(&self, _names: &[String]) -> Vec<Value> {
        Vec::new()
    }
}

/// Run a blocking workspace operation off the async executor.
pub(crate) async fn on_workspace<T, F>(ws: &Arc<WorkspaceManager>, op: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&WorkspaceManager) -> T + Send + 'static,
{
    let ws = Arc::clone(ws);
    Ok(tokio::task::spawn_blocking(move || op(&ws)).await?)
}

/// Required string parameter, or a message naming the missing key.
pub fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("Missing required parameter: {}", key))
}
