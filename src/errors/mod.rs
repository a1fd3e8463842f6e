use thiserror::Error;

/// Typed error hierarchy for the runtime.
///
/// Use at module boundaries (provider calls, invocation entry, config validation).
/// Internal/leaf functions can continue using `anyhow::Result`; the `Internal` variant
/// allows seamless conversion via the `?` operator.
///
/// Tool and parse failures never appear here: they are recovered inside the
/// invocation loop and fed back to the model.
#[derive(Debug, Error)]
pub enum RaroError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No model client could be constructed (missing key, bad base URL).
    #[error("Model client unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RaroError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::RateLimit { .. } | Self::Internal(_) => true,
            Self::Auth(_) | Self::Config(_) | Self::Unavailable(_) => false,
        }
    }

    /// Recover a typed error from an `anyhow` chain, wrapping anything else as `Internal`.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<RaroError>() {
            Ok(typed) => typed,
            Err(other) => Self::Internal(other),
        }
    }
}
