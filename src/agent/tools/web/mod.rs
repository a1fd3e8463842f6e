use crate::agent::tools::base::{ExecutionContext, require_str};
use crate::agent::tools::{Tool, ToolResult};
use crate::config::SearchConfig;
use crate::utils::http::{DEFAULT_MAX_BODY_BYTES, client_with_timeout, limited_text};
use crate::utils::truncate_chars;
use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

const MAX_RESULTS: usize = 5;
/// Rough chars-per-token ratio used to cap the rendered context.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SearchHit {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search backed by the Tavily search API.
pub struct WebSearchTool {
    config: SearchConfig,
    client: Client,
}

impl WebSearchTool {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            config: config.clone(),
            client: client_with_timeout(Duration::from_secs(30)),
        }
    }

    /// Search and render the hits as a JSON context string.
    async fn search(&self, query: &str) -> Result<String> {
        let url = format!("{}/search", self.config.api_base.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "api_key": self.config.api_key,
                "query": query,
                "search_depth": self.config.search_depth,
                "max_results": MAX_RESULTS,
            }))
            .send()
            .await?;

        let status = resp.status();
        let body = limited_text(resp, DEFAULT_MAX_BODY_BYTES).await?;
        if !status.is_success() {
            bail!("HTTP {}: {}", status.as_u16(), crate::utils::preview(&body, 200));
        }
        let parsed: SearchResponse = serde_json::from_str(&body)?;
        let context = serde_json::to_string(&parsed.results)?;
        Ok(truncate_chars(
            &context,
            self.config.max_tokens.saturating_mul(CHARS_PER_TOKEN),
            "",
        ))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for current information. Returns source URLs with extracted content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<ToolResult> {
        let query = match require_str(&params, "query") {
            Ok(q) => q,
            Err(msg) => return Ok(ToolResult::error(msg)),
        };
        if self.config.api_key.is_empty() {
            return Ok(ToolResult::error("Search unavailable (missing API key)."));
        }
        Ok(ToolResult::from_result(self.search(query).await, "Search"))
    }
}
