pub mod base;
pub mod errors;
pub mod factory;
pub mod gemini;

use reqwest::Client;
use std::time::Duration;

/// Connect timeout for model provider HTTP clients (seconds).
pub(crate) const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Overall request timeout for model provider HTTP clients (seconds).
///
/// The invocation loop applies its own per-call deadline on top of this.
pub(crate) const PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Build a `reqwest::Client` with standard provider timeouts.
pub(crate) fn provider_http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(PROVIDER_REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| Client::new())
}

pub use base::{ChatRequest, ContextCache, LLMProvider, LLMResponse, Message, Part, RetryConfig};
pub use factory::{ClientAvailability, ModelClient, build_client};
