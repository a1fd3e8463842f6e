use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Snapshot of a fully assembled request, files excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeCapture {
    pub id: String,
    pub time: DateTime<Utc>,
    pub agent_id: String,
    pub run_id: String,
    pub tools: Vec<String>,
    pub final_system_prompt: String,
    pub final_user_message: String,
    pub original_payload: Value,
}

impl ProbeCapture {
    pub fn new(agent_id: &str, run_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            time: Utc::now(),
            agent_id: agent_id.to_string(),
            run_id: run_id.to_string(),
            tools: Vec::new(),
            final_system_prompt: String::new(),
            final_user_message: String::new(),
            original_payload: Value::Null,
        }
    }
}

/// Observe-only debug sink. Captures are posted from a spawned task and any
/// failure is logged at debug and dropped.
pub struct DebugProbe {
    client: Client,
    capture_url: String,
}

impl DebugProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: crate::utils::http::client_with_timeout(timeout),
            capture_url: format!("{}/capture", base_url.trim_end_matches('/')),
        }
    }

    pub fn capture_url(&self) -> &str {
        &self.capture_url
    }

    pub fn capture(&self, capture: ProbeCapture) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = self.capture_url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&capture).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("debug probe captured {} for {}", capture.id, capture.agent_id);
                }
                Ok(resp) => debug!("debug probe rejected capture: HTTP {}", resp.status()),
                Err(e) => debug!("debug probe unreachable: {}", e),
            }
        })
    }
}
