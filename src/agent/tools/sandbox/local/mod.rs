//! Sandbox provider backed by a local Python interpreter.
//!
//! Each sandbox is a private temporary directory. Every cell runs as a fresh
//! interpreter process in that directory with a scrubbed environment, so
//! files persist across cells but in-memory state does not.

use super::{CodeSandbox, Execution, ExecutionError, SandboxFile, SandboxProvider};
use crate::utils::subprocess::scrubbed_command;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// `Name: value` on the last line of a Python traceback.
static EXCEPTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*):\s?(.*)$")
        .expect("failed to compile exception line regex")
});

pub struct LocalSandboxProvider {
    python: String,
    timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<TempDir>>>,
}

impl LocalSandboxProvider {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sandbox(&self, id: String, dir: Arc<TempDir>) -> Arc<dyn CodeSandbox> {
        Arc::new(LocalSandbox {
            id,
            dir,
            python: self.python.clone(),
            timeout: self.timeout,
        })
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self) -> Result<Arc<dyn CodeSandbox>> {
        let dir = Arc::new(
            tempfile::Builder::new()
                .prefix("raro-sandbox-")
                .tempdir()
                .context("Failed to create sandbox directory")?,
        );
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .map_err(|_| anyhow!("sandbox registry poisoned"))?
            .insert(id.clone(), Arc::clone(&dir));
        Ok(self.sandbox(id, dir))
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn CodeSandbox>> {
        let dir = self
            .sessions
            .lock()
            .map_err(|_| anyhow!("sandbox registry poisoned"))?
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("sandbox {} not found", id))?;
        Ok(self.sandbox(id.to_string(), dir))
    }

    async fn kill(&self, id: &str) -> Result<()> {
        // Dropping the last TempDir handle removes the directory
        self.sessions
            .lock()
            .map_err(|_| anyhow!("sandbox registry poisoned"))?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("sandbox {} not found", id))
    }
}

struct LocalSandbox {
    id: String,
    dir: Arc<TempDir>,
    python: String,
    timeout: Duration,
}

impl LocalSandbox {
    fn path_of(&self, name: &str) -> Result<PathBuf> {
        let flat = std::path::Path::new(name)
            .file_name()
            .ok_or_else(|| anyhow!("invalid sandbox path: {}", name))?;
        Ok(self.dir.path().join(flat))
    }
}

/// Split a failed run's stderr into an [`ExecutionError`].
pub(crate) fn parse_exception(stderr: &str) -> ExecutionError {
    let last = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim();
    let (name, value) = match EXCEPTION_LINE.captures(last) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => ("Error".to_string(), last.to_string()),
    };
    ExecutionError {
        name,
        value,
        traceback: stderr.trim_end().to_string(),
    }
}

#[async_trait]
impl CodeSandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(self.path_of(name)?, bytes).await?;
        Ok(())
    }

    async fn run_code(&self, code: &str) -> Result<Execution> {
        let script = self
            .dir
            .path()
            .join(format!(".cell_{}.py", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&script, code).await?;

        let mut cmd = scrubbed_command(&self.python);
        cmd.arg(&script)
            .current_dir(self.dir.path())
            .env("MPLBACKEND", "Agg");

        let outcome = tokio::time::timeout(self.timeout, cmd.output()).await;
        let _ = tokio::fs::remove_file(&script).await;

        let output = match outcome {
            Ok(result) => result.with_context(|| format!("Failed to run {}", self.python))?,
            Err(_) => {
                return Ok(Execution {
                    error: Some(ExecutionError {
                        name: "TimeoutError".to_string(),
                        value: format!("execution exceeded {}s", self.timeout.as_secs()),
                        traceback: String::new(),
                    }),
                    ..Execution::default()
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(Execution {
                stdout,
                stderr,
                ..Execution::default()
            })
        } else {
            // The traceback is stderr, so it is not repeated as a log section
            Ok(Execution {
                stdout,
                error: Some(parse_exception(&stderr)),
                ..Execution::default()
            })
        }
    }

    async fn list_files(&self) -> Result<Vec<SandboxFile>> {
        let mut entries = tokio::fs::read_dir(self.dir.path()).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            files.push(SandboxFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_of(name)?).await?)
    }
}
