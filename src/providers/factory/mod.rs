use crate::config::Config;
use crate::errors::RaroError;
use crate::providers::base::{ContextCache, LLMProvider};
use crate::providers::gemini::GeminiProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// A constructed model client plus its optional context cache.
#[derive(Clone)]
pub struct ModelClient {
    pub provider: Arc<dyn LLMProvider>,
    pub cache: Option<Arc<dyn ContextCache>>,
}

impl ModelClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ContextCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

/// Result of building the process-wide model client at startup.
#[derive(Clone)]
pub enum ClientAvailability {
    Ready(ModelClient),
    Unavailable(String),
}

impl ClientAvailability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The client, or `RaroError::Unavailable` naming why there is none.
    pub fn client(&self) -> Result<&ModelClient, RaroError> {
        match self {
            Self::Ready(client) => Ok(client),
            Self::Unavailable(reason) => Err(RaroError::Unavailable(reason.clone())),
        }
    }
}

/// Build the Gemini client from config. Never fails: a missing key is
/// reported as `Unavailable` and checked before any invocation starts.
pub fn build_client(config: &Config) -> ClientAvailability {
    let gemini = &config.providers.gemini;
    if gemini.api_key.trim().is_empty() {
        warn!("No Gemini API key configured; model calls are unavailable");
        return ClientAvailability::Unavailable(
            "no Gemini API key configured (set providers.gemini.apiKey or RARO_GEMINI_API_KEY)"
                .into(),
        );
    }
    if !gemini.api_base.starts_with("http://") && !gemini.api_base.starts_with("https://") {
        return ClientAvailability::Unavailable(format!(
            "invalid Gemini base URL: {}",
            gemini.api_base
        ));
    }

    let provider = Arc::new(GeminiProvider::with_base_url(
        gemini.api_key.clone(),
        Some(config.models.fast.clone()),
        gemini.api_base.clone(),
    ));
    info!("Gemini client ready (base: {})", gemini.api_base);
    ClientAvailability::Ready(ModelClient::new(provider.clone()).with_cache(provider))
}
