//! Stateful code execution for `execute_python`.
//!
//! A sandbox persists for the whole run so files (and, for providers that
//! keep an interpreter alive, variables) created on one turn are visible on
//! later turns. [`SandboxSessions`] maps `run_id` to a sandbox id and
//! reconnects on each call, creating a fresh sandbox when reconnection fails.

pub mod local;

use crate::agent::tools::base::{ExecutionContext, on_workspace, require_str};
use crate::agent::tools::{Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub use local::LocalSandboxProvider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    pub name: String,
    pub value: String,
    pub traceback: String,
}

/// Output of one code cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    /// PNG payloads from rich display output (inline plots).
    pub images: Vec<Vec<u8>>,
    pub error: Option<ExecutionError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxFile {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Last modification time, when the provider reports one.
    pub modified: Option<SystemTime>,
}

/// Listing taken before a cell runs. Files absent from it, or whose size or
/// mtime moved, are the cell's artifacts.
#[derive(Debug, Default)]
struct Snapshot(HashMap<String, (u64, Option<SystemTime>)>);

impl Snapshot {
    fn of(files: &[SandboxFile]) -> Self {
        Self(
            files
                .iter()
                .filter(|f| !f.is_dir)
                .map(|f| (f.name.clone(), (f.size, f.modified)))
                .collect(),
        )
    }

    fn is_unchanged(&self, file: &SandboxFile) -> bool {
        self.0.get(&file.name) == Some(&(file.size, file.modified))
    }
}

/// A live sandbox. Paths are relative to its working directory.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    fn id(&self) -> &str;
    async fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()>;
    async fn run_code(&self, code: &str) -> Result<Execution>;
    async fn list_files(&self) -> Result<Vec<SandboxFile>>;
    async fn read_file(&self, name: &str) -> Result<Vec<u8>>;
}

/// Vendor seam for creating and reattaching sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn CodeSandbox>>;
    async fn connect(&self, id: &str) -> Result<Arc<dyn CodeSandbox>>;
    async fn kill(&self, id: &str) -> Result<()>;
}

/// Run-keyed registry of sandbox ids with a TTL.
pub struct SandboxSessions {
    provider: Arc<dyn SandboxProvider>,
    ids: moka::sync::Cache<String, String>,
    create_lock: tokio::sync::Mutex<()>,
}

impl SandboxSessions {
    pub fn new(provider: Arc<dyn SandboxProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ids: moka::sync::Cache::builder().time_to_live(ttl).build(),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn session_id(&self, run_id: &str) -> Option<String> {
        self.ids.get(run_id)
    }

    pub async fn get_or_create(&self, run_id: &str) -> Result<Arc<dyn CodeSandbox>> {
        // Serialized so two agents of one run never race to create twin sandboxes
        let _guard = self.create_lock.lock().await;

        if let Some(id) = self.ids.get(run_id) {
            match self.provider.connect(&id).await {
                Ok(sandbox) => {
                    debug!("reconnected to sandbox {} for run {}", id, run_id);
                    return Ok(sandbox);
                }
                Err(e) => {
                    warn!(
                        "failed to reconnect to sandbox {} for run {}: {}, creating a new one",
                        id, run_id, e
                    );
                    self.ids.invalidate(run_id);
                }
            }
        }

        let sandbox = self.provider.create().await?;
        info!("created sandbox {} for run {}", sandbox.id(), run_id);
        self.ids.insert(run_id.to_string(), sandbox.id().to_string());
        Ok(sandbox)
    }

    /// Kill and forget the run's sandbox. Failures are logged, never raised.
    pub async fn kill_session(&self, run_id: &str) {
        let Some(id) = self.ids.get(run_id) else {
            return;
        };
        self.ids.invalidate(run_id);
        match self.provider.kill(&id).await {
            Ok(()) => info!("killed sandbox {} for run {}", id, run_id),
            Err(e) => warn!("error killing sandbox {}: {}", id, e),
        }
    }
}

pub struct ExecutePythonTool {
    sessions: Arc<SandboxSessions>,
    timeout: Duration,
}

impl ExecutePythonTool {
    pub fn new(sessions: Arc<SandboxSessions>, timeout: Duration) -> Self {
        Self { sessions, timeout }
    }

    async fn upload_inputs(sandbox: &dyn CodeSandbox, ctx: &ExecutionContext) {
        let listed = on_workspace(&ctx.workspace, |ws| ws.input_files()).await;
        let inputs = match listed.and_then(|r| r.map_err(anyhow::Error::from)) {
            Ok(files) => files,
            Err(e) => {
                warn!("failed to list inputs for run {}: {}", ctx.run_id, e);
                return;
            }
        };
        for path in inputs {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let uploaded = match tokio::fs::read(&path).await {
                Ok(bytes) => sandbox.write_file(name, &bytes).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = uploaded {
                warn!("failed to upload {}: {}", name, e);
            }
        }
    }

    async fn snapshot(sandbox: &dyn CodeSandbox) -> Snapshot {
        match sandbox.list_files().await {
            Ok(files) => Snapshot::of(&files),
            Err(e) => {
                warn!("failed to list sandbox files before run: {}", e);
                Snapshot::default()
            }
        }
    }

    async fn save(ctx: &ExecutionContext, name: String, bytes: Vec<u8>) -> Result<String> {
        Ok(on_workspace(&ctx.workspace, move |ws| ws.write(&name, &bytes)).await??)
    }

    /// Copy inline plots and files the cell created or changed into the workspace.
    async fn capture_artifacts(
        sandbox: &dyn CodeSandbox,
        before: &Snapshot,
        execution: &Execution,
        ctx: &ExecutionContext,
        log: &mut Vec<String>,
    ) -> Vec<String> {
        let mut artifacts: Vec<String> = Vec::new();

        for png in &execution.images {
            let stamp = chrono::Local::now().format("%H%M%S");
            let name = format!("plot_{}_{}_{}.png", ctx.run_id, stamp, artifacts.len());
            match Self::save(ctx, name.clone(), png.clone()).await {
                Ok(stored) => {
                    log.push(format!("\n[SYSTEM: Generated Image saved to '{}']", stored));
                    artifacts.push(stored);
                }
                Err(e) => warn!("failed to save plot {}: {}", name, e),
            }
        }

        let files = match sandbox.list_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("failed to list sandbox files: {}", e);
                return artifacts;
            }
        };
        debug!(
            "sandbox file scan: {:?}",
            files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()
        );
        for file in files {
            if file.is_dir
                || file.size == 0
                || file.name.starts_with('.')
                || file.name == "__pycache__"
                || before.is_unchanged(&file)
            {
                continue;
            }
            let bytes = match sandbox.read_file(&file.name).await {
                Ok(b) if !b.is_empty() => b,
                Ok(_) => continue,
                Err(e) => {
                    debug!("skipping artifact {}: {}", file.name, e);
                    continue;
                }
            };
            match Self::save(ctx, file.name.clone(), bytes).await {
                Ok(stored) => {
                    if !artifacts.contains(&stored) {
                        artifacts.push(stored);
                    }
                }
                Err(e) => warn!("failed to save artifact {}: {}", file.name, e),
            }
        }
        artifacts
    }
}

#[async_trait]
impl Tool for ExecutePythonTool {
    fn name(&self) -> &'static str {
        "execute_python"
    }

    fn description(&self) -> &'static str {
        "Run Python code in a stateful sandbox. Use for calculations, data analysis and generating files or plots. Input files are in the working directory; files you save there are returned as outputs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Complete, self-contained Python script to execute"
                }
            },
            "required": ["code"]
        })
    }

    fn execution_timeout(&self) -> Option<Duration> {
        // Leave room for uploads and artifact capture around the cell itself
        Some(self.timeout + Duration::from_secs(30))
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let code = match require_str(&params, "code") {
            Ok(c) => c,
            Err(msg) => return Ok(ToolResult::error(msg)),
        };

        let sandbox = match self.sessions.get_or_create(&ctx.run_id).await {
            Ok(s) => s,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to initialize sandbox: {}",
                    e
                )));
            }
        };

        Self::upload_inputs(sandbox.as_ref(), ctx).await;
        let before = Self::snapshot(sandbox.as_ref()).await;

        info!("executing python ({} chars) for run {}", code.len(), ctx.run_id);
        let execution = match sandbox.run_code(code).await {
            Ok(e) => e,
            Err(e) => return Ok(ToolResult::error(format!("Sandbox failed: {}", e))),
        };

        let mut log = Vec::new();
        if !execution.stdout.is_empty() {
            log.push(format!("STDOUT:\n{}", execution.stdout));
        }
        if !execution.stderr.is_empty() {
            log.push(format!("STDERR:\n{}", execution.stderr));
        }

        let artifacts =
            Self::capture_artifacts(sandbox.as_ref(), &before, &execution, ctx, &mut log).await;

        // The sandbox stays alive on runtime errors so the model can retry in place
        if let Some(err) = &execution.error {
            let mut message = format!("RUNTIME ERROR: {}: {}", err.name, err.value);
            if !err.traceback.is_empty() {
                message.push('\n');
                message.push_str(&err.traceback);
            }
            if !log.is_empty() {
                message.push_str("\n\nLOGS:\n");
                message.push_str(&log.join("\n"));
            }
            return Ok(ToolResult::error(message));
        }

        let mut text = log.join("\n");
        if !artifacts.is_empty() {
            text.push_str(&format!(
                "\n[SYSTEM: The following files were generated/updated: {:?}]",
                artifacts
            ));
        }
        if text.trim().is_empty() {
            text = "Execution successful (No stdout).".to_string();
        }
        Ok(ToolResult::with_files(text, artifacts))
    }
}
