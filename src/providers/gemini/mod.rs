use crate::providers::base::{
    ChatRequest, ContextCache, LLMProvider, LLMResponse, Message, Part, ProviderMetrics,
};
use crate::providers::errors::ProviderErrorHandler;
use crate::providers::provider_http_client;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
    metrics: Arc<Mutex<ProviderMetrics>>,
}

impl GeminiProvider {
    pub fn new(api_key: String, default_model: Option<String>) -> Self {
        Self::with_base_url(api_key, default_model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, default_model: Option<String>, base_url: String) -> Self {
        Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: provider_http_client(),
            metrics: Arc::new(Mutex::new(ProviderMetrics::default())),
        }
    }

    fn part_json(part: &Part) -> Value {
        match part {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineData { mime_type, data } => json!({
                "inline_data": { "mime_type": mime_type, "data": data }
            }),
        }
    }

    fn system_json(text: &str) -> Value {
        json!({ "parts": [{ "text": text }] })
    }

    fn content_json(msg: &Message) -> Value {
        let role = if msg.role == "model" { "model" } else { "user" };
        json!({
            "role": role,
            "parts": msg.parts.iter().map(Self::part_json).collect::<Vec<_>>(),
        })
    }

    pub(crate) fn build_payload(req: &ChatRequest<'_>) -> Value {
        let mut generation_config = json!({ "temperature": req.temperature });
        if let Some(max) = req.max_tokens {
            generation_config["maxOutputTokens"] = json!(max);
        }
        if let Some(budget) = req.thinking_budget {
            generation_config["thinkingConfig"] = json!({ "thinkingBudget": budget });
        }

        let mut payload = json!({
            "contents": req.messages.iter().map(Self::content_json).collect::<Vec<_>>(),
            "generationConfig": generation_config,
        });
        // A cached entry carries its own system instruction and the API
        // rejects a second one alongside it
        match (&req.cached_content, &req.system_instruction) {
            (Some(cached), _) => payload["cachedContent"] = json!(cached),
            (None, Some(system)) => payload["systemInstruction"] = Self::system_json(system),
            (None, None) => {}
        }
        payload
    }

    fn parse_response(json: &Value) -> Result<LLMResponse> {
        let candidate = json["candidates"]
            .as_array()
            .and_then(|arr| arr.first())
            .context("No candidates in Gemini response")?;

        // Thought summaries are not part of the answer
        let texts: Vec<&str> = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                    .filter_map(|p| p["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        let content = (!texts.is_empty()).then(|| texts.concat());

        let usage = &json["usageMetadata"];
        Ok(LLMResponse {
            content,
            input_tokens: usage["promptTokenCount"].as_u64(),
            output_tokens: usage["candidatesTokenCount"].as_u64(),
            cached_tokens: usage["cachedContentTokenCount"].as_u64(),
        })
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn chat(&self, req: ChatRequest<'_>) -> Result<LLMResponse> {
        let payload = Self::build_payload(&req);
        let model_name = req.model.unwrap_or(&self.default_model);
        let url = format!("{}/models/{}:generateContent", self.base_url, model_name);
        debug!("Gemini generateContent: model={}", model_name);

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        let json =
            ProviderErrorHandler::check_response(resp, "Gemini", "chat", &self.metrics).await?;

        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.request_count += 1;
            if let Some(tokens) = json["usageMetadata"]["totalTokenCount"].as_u64() {
                metrics.token_count += tokens;
            }
        }

        Self::parse_response(&json)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn metrics(&self) -> ProviderMetrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContextCache for GeminiProvider {
    async fn create(
        &self,
        model: &str,
        system_instruction: &str,
        parts: Vec<Part>,
        ttl: Duration,
    ) -> Result<String> {
        let mut payload = json!({
            "model": format!("models/{}", model),
            "contents": [{
                "role": "user",
                "parts": parts.iter().map(Self::part_json).collect::<Vec<_>>(),
            }],
            "ttl": format!("{}s", ttl.as_secs()),
        });
        if !system_instruction.trim().is_empty() {
            payload["systemInstruction"] = Self::system_json(system_instruction);
        }
        let url = format!("{}/cachedContents", self.base_url);

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .context("Failed to send cache request to Gemini API")?;

        let json =
            ProviderErrorHandler::check_response(resp, "Gemini", "cache", &self.metrics).await?;
        let name = json["name"]
            .as_str()
            .context("Gemini cache response has no name")?;
        debug!("Created context cache {} for {}", name, model);
        Ok(name.to_string())
    }
}
