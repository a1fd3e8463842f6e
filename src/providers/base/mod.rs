use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::errors::RaroError;

/// One piece of a conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Text(String),
    /// Opaque binary payload, base64-encoded.
    InlineData { mime_type: String, data: String },
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::InlineData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `"user"` or `"model"`.
    pub role: String,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            parts: vec![Part::Text(content.into())],
        }
    }

    pub fn user_parts(parts: Vec<Part>) -> Self {
        Self {
            role: "user".into(),
            parts,
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: "model".into(),
            parts: vec![Part::Text(content.into())],
        }
    }

    /// Concatenation of the text parts, binary parts skipped.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Prompt tokens served from a context cache.
    pub cached_tokens: Option<u64>,
}

impl LLMResponse {
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderMetrics {
    pub request_count: u64,
    pub token_count: u64,
    pub error_count: u64,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay_ms: settings.initial_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            ..Self::default()
        }
    }
}

impl RetryConfig {
    fn backoff_ms(&self, attempt: usize) -> u64 {
        let base = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_delay_ms as f64) as u64;
        // Up to 25% jitter so concurrent invocations do not retry in lockstep
        let jitter = (base as f64 * 0.25 * fastrand::f64()) as u64;
        base + jitter
    }
}

/// Parameters for a single model call.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub messages: Vec<Message>,
    pub system_instruction: Option<String>,
    pub model: Option<&'a str>,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    pub thinking_budget: Option<u32>,
    /// Name of a previously created context cache entry.
    pub cached_content: Option<String>,
}

impl ChatRequest<'_> {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            system_instruction: None,
            model: None,
            max_tokens: None,
            temperature: 1.0,
            thinking_budget: None,
            cached_content: None,
        }
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(&self, req: ChatRequest<'_>) -> anyhow::Result<LLMResponse>;

    fn default_model(&self) -> &str;

    /// Return accumulated provider metrics (requests, tokens, errors).
    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics::default()
    }

    /// Chat with automatic retry on transient errors.
    async fn chat_with_retry(
        &self,
        req: ChatRequest<'_>,
        retry_config: Option<RetryConfig>,
    ) -> anyhow::Result<LLMResponse> {
        let config = retry_config.unwrap_or_default();
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=config.max_retries {
            if let Some(ref e) = last_error {
                warn!(
                    "Provider retry attempt {}/{} after error: {}",
                    attempt, config.max_retries, e
                );
            }
            debug!("Sending chat request (attempt {})", attempt);
            match self.chat(req.clone()).await {
                Ok(response) => {
                    debug!("Chat request succeeded on attempt {}", attempt);
                    return Ok(response);
                }
                Err(e) => {
                    let typed = e.downcast_ref::<RaroError>();
                    let rate_limit_delay = typed.and_then(|err| match err {
                        RaroError::RateLimit { retry_after } => *retry_after,
                        _ => None,
                    });
                    // Untyped errors are transport failures and worth another try
                    let is_transient = typed.is_none_or(RaroError::is_retryable);
                    warn!("Chat request failed on attempt {}: {}", attempt, e);
                    if !is_transient {
                        return Err(e);
                    }
                    last_error = Some(e);
                    if attempt < config.max_retries {
                        let delay = match rate_limit_delay {
                            Some(secs) => {
                                debug!("Using retry-after hint: {}s", secs);
                                secs * 1000
                            }
                            None => config.backoff_ms(attempt),
                        };
                        debug!("Waiting {}ms before retry", delay);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("All retry attempts failed")))
    }
}

/// Server-side store for large recurring context, referenced by name from
/// later requests instead of re-sending the payload.
#[async_trait]
pub trait ContextCache: Send + Sync {
    /// Upload `parts` for `model` and return the cache entry name.
    ///
    /// The system instruction is stored with the entry: requests that attach
    /// a cache reference may not carry their own.
    async fn create(
        &self,
        model: &str,
        system_instruction: &str,
        parts: Vec<Part>,
        ttl: Duration,
    ) -> anyhow::Result<String>;
}
