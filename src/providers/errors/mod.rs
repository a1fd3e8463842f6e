use crate::errors::RaroError;
use crate::providers::base::ProviderMetrics;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Common error handling for model provider HTTP responses.
pub struct ProviderErrorHandler;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 500 | 502 | 503 | 504)
}

impl ProviderErrorHandler {
    /// Build a typed error from a non-success body.
    ///
    /// Understands the Google API error envelope
    /// (`{"error": {"code", "message", "status"}}`) and falls back to the raw text.
    pub fn parse_api_error(status: u16, error_text: &str) -> RaroError {
        if let Ok(error_json) = serde_json::from_str::<Value>(error_text)
            && let Some(err) = error_json.get("error")
        {
            let error_status = err
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            let error_msg = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");

            if error_status == "NOT_FOUND" && error_msg.contains("models/") {
                return RaroError::Provider {
                    message: format!(
                        "{}. Check the `models` aliases in your config file \
                         (~/.raro/config.json) or pass a concrete model id.",
                        error_msg
                    ),
                    retryable: false,
                };
            }

            let retryable = is_retryable_status(status) || error_status == "UNAVAILABLE";
            return RaroError::Provider {
                message: format!("API error ({}): {}", error_status, error_msg),
                retryable,
            };
        }

        RaroError::Provider {
            message: format!("API error ({}): {}", status, error_text),
            retryable: is_retryable_status(status),
        }
    }

    pub fn log_and_handle_error(e: &anyhow::Error, provider_name: &str, operation: &str) {
        error!(
            "{} provider error during {}: {}",
            provider_name, operation, e
        );
    }

    pub fn handle_rate_limit(status: u16, retry_after: Option<u64>) -> RaroError {
        if let Some(seconds) = retry_after {
            warn!("Rate limit hit. Retry after {} seconds", seconds);
        } else {
            warn!("Rate limit hit (status: {})", status);
        }
        RaroError::RateLimit { retry_after }
    }

    pub fn handle_auth_error(status: u16, error_text: &str) -> RaroError {
        warn!("Authentication error (status: {}): {}", status, error_text);
        RaroError::Auth(format!(
            "Authentication failed. Please check your API key. Error: {}",
            error_text
        ))
    }

    /// Check HTTP status and return a typed error if the response is not successful.
    /// On error, consumes the response body to extract error details.
    pub async fn check_http_status(
        resp: reqwest::Response,
        provider: &str,
        operation: &str,
    ) -> anyhow::Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let error_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());

        let typed = match status {
            429 => Self::handle_rate_limit(status, retry_after),
            401 | 403 => Self::handle_auth_error(status, &error_text),
            _ => Self::parse_api_error(status, &error_text),
        };
        let err = anyhow::Error::new(typed);
        Self::log_and_handle_error(&err, provider, operation);
        Err(err)
    }

    /// Check an HTTP response for errors and return the body as JSON on success.
    pub async fn check_response(
        resp: reqwest::Response,
        provider: &str,
        operation: &str,
        metrics: &Arc<Mutex<ProviderMetrics>>,
    ) -> anyhow::Result<Value> {
        let resp = match Self::check_http_status(resp, provider, operation).await {
            Ok(resp) => resp,
            Err(e) => {
                if let Ok(mut m) = metrics.lock() {
                    m.error_count += 1;
                }
                return Err(e);
            }
        };

        let json: Value = resp
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse {} API response: {}", provider, e))?;

        // Some error shapes arrive with a 200 status
        if let Some(error_val) = json.get("error") {
            if let Ok(mut m) = metrics.lock() {
                m.error_count += 1;
            }
            let error_text = serde_json::json!({ "error": error_val }).to_string();
            let err = anyhow::Error::new(Self::parse_api_error(200, &error_text));
            Self::log_and_handle_error(&err, provider, operation);
            return Err(err);
        }

        Ok(json)
    }
}
