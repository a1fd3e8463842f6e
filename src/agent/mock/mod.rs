//! Staged ("puppeteer") model turns.
//!
//! An operator stages text for a specific `(run_id, agent_id)`; the next
//! invocation of that agent uses it in place of its first model call and
//! consumes it, so a retry goes back to the real model.
//!
//! [`FileMockStore`] keeps staged turns under `<base>/mocks` so another
//! process (`raro mock stage`, or anything that writes the JSON file) can
//! script a running or future invocation.

use crate::utils::atomic_write;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

fn default_force_tool_execution() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockPayload {
    pub content: String,
    /// When false the staged text is the final answer and no tools run.
    #[serde(default = "default_force_tool_execution")]
    pub force_tool_execution: bool,
}

impl MockPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            force_tool_execution: true,
        }
    }
}

pub fn mock_key(run_id: &str, agent_id: &str) -> String {
    format!("mock:{}:{}", run_id, agent_id)
}

#[async_trait]
pub trait MockStore: Send + Sync {
    async fn stage(&self, run_id: &str, agent_id: &str, payload: MockPayload) -> Result<()>;
    /// Atomically fetch and delete the staged payload.
    async fn take(&self, run_id: &str, agent_id: &str) -> Option<MockPayload>;
}

/// Process-local store with a TTL on staged payloads.
pub struct InMemoryMockStore {
    entries: moka::sync::Cache<String, MockPayload>,
}

impl InMemoryMockStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: moka::sync::Cache::builder().time_to_live(ttl).build(),
        }
    }
}

#[async_trait]
impl MockStore for InMemoryMockStore {
    async fn stage(&self, run_id: &str, agent_id: &str, payload: MockPayload) -> Result<()> {
        self.entries.insert(mock_key(run_id, agent_id), payload);
        Ok(())
    }

    async fn take(&self, run_id: &str, agent_id: &str) -> Option<MockPayload> {
        self.entries.remove(&mock_key(run_id, agent_id))
    }
}

/// On-disk form of a staged turn. `staged_at` is optional so a hand-written
/// file works too; its mtime stands in.
#[derive(Debug, Serialize, Deserialize)]
struct StagedMock {
    #[serde(flatten)]
    payload: MockPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    staged_at: Option<DateTime<Utc>>,
}

/// Ids become file name components; anything outside `[A-Za-z0-9_-]` is
/// replaced so a hostile id cannot leave the mocks directory.
fn file_component(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Store shared across processes through one JSON file per staged turn.
pub struct FileMockStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileMockStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    /// `<base>/mocks`, next to the run sessions.
    pub fn under_base(base: &Path, ttl: Duration) -> Self {
        Self::new(base.join("mocks"), ttl)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &str, agent_id: &str) -> PathBuf {
        self.dir.join(format!(
            "mock_{}_{}.json",
            file_component(run_id),
            file_component(agent_id)
        ))
    }

    fn is_expired(&self, staged_at: Option<DateTime<Utc>>, mtime: Option<SystemTime>) -> bool {
        let staged = staged_at
            .map(SystemTime::from)
            .or(mtime)
            .unwrap_or_else(SystemTime::now);
        staged.elapsed().is_ok_and(|age| age > self.ttl)
    }

    async fn claim(&self, path: &Path) -> Option<PathBuf> {
        // Renaming is the atomic step: of two concurrent readers only one
        // finds the file to move
        let suffix = format!("claimed.{}", uuid::Uuid::new_v4().simple());
        let claimed = path.with_extension(suffix);
        match tokio::fs::rename(path, &claimed).await {
            Ok(()) => Some(claimed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("failed to claim mock {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl MockStore for FileMockStore {
    async fn stage(&self, run_id: &str, agent_id: &str, payload: MockPayload) -> Result<()> {
        let path = self.path_for(run_id, agent_id);
        let staged = StagedMock {
            payload,
            staged_at: Some(Utc::now()),
        };
        let bytes = serde_json::to_vec_pretty(&staged)?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
            .await
            .context("mock staging task failed")?
            .with_context(|| format!("Failed to stage mock at {}", path.display()))?;
        info!("staged mock for {}/{} at {}", run_id, agent_id, path.display());
        Ok(())
    }

    async fn take(&self, run_id: &str, agent_id: &str) -> Option<MockPayload> {
        let path = self.path_for(run_id, agent_id);
        let claimed = self.claim(&path).await?;

        let mtime = tokio::fs::metadata(&claimed)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        let raw = tokio::fs::read(&claimed).await;
        if let Err(e) = tokio::fs::remove_file(&claimed).await {
            warn!("failed to remove consumed mock {}: {}", claimed.display(), e);
        }

        let staged: StagedMock = match raw
            .map_err(anyhow::Error::from)
            .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?))
        {
            Ok(staged) => staged,
            Err(e) => {
                warn!("discarding unreadable mock {}: {}", path.display(), e);
                return None;
            }
        };
        if self.is_expired(staged.staged_at, mtime) {
            debug!("discarding expired mock for {}/{}", run_id, agent_id);
            return None;
        }
        Some(staged.payload)
    }
}
