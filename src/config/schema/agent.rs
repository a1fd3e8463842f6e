use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_max_turns() -> usize {
    5
}

fn default_temperature() -> f32 {
    1.0
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_delay_ms", rename = "initialDelayMs")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms", rename = "maxDelayMs")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Hard cap on model turns per invocation.
    #[serde(default = "default_max_turns", rename = "maxTurns")]
    pub max_turns: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, rename = "maxOutputTokens")]
    pub max_output_tokens: Option<u32>,
    /// Per model-call deadline. Expiry fails the invocation instead of hanging it.
    #[serde(default = "default_model_timeout_secs", rename = "modelTimeoutSecs")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs", rename = "toolTimeoutSecs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            temperature: default_temperature(),
            max_output_tokens: None,
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_read_limit_chars() -> usize {
    50_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root of the run-scoped filesystem. Empty means `$RARO_HOME/storage`.
    #[serde(default, rename = "baseDir")]
    pub base_dir: String,
    #[serde(default = "default_read_limit_chars", rename = "readLimitChars")]
    pub read_limit_chars: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: String::new(),
            read_limit_chars: default_read_limit_chars(),
        }
    }
}

impl WorkspaceConfig {
    pub fn resolved_base_dir(&self) -> anyhow::Result<PathBuf> {
        if self.base_dir.is_empty() {
            Ok(crate::utils::get_raro_home()?.join("storage"))
        } else {
            Ok(crate::utils::expand_home(&self.base_dir))
        }
    }
}

fn default_cache_threshold_chars() -> usize {
    100_000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_inline_text_limit_chars() -> usize {
    50_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Estimated attachment volume above which files go to the context cache.
    #[serde(
        default = "default_cache_threshold_chars",
        rename = "cacheThresholdChars"
    )]
    pub cache_threshold_chars: usize,
    #[serde(default = "default_cache_ttl_secs", rename = "cacheTtlSecs")]
    pub cache_ttl_secs: u64,
    #[serde(
        default = "default_inline_text_limit_chars",
        rename = "inlineTextLimitChars"
    )]
    pub inline_text_limit_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cache_threshold_chars: default_cache_threshold_chars(),
            cache_ttl_secs: default_cache_ttl_secs(),
            inline_text_limit_chars: default_inline_text_limit_chars(),
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_mock_ttl_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Base URL of the debug-probe sink. Captures go to `{probeUrl}/capture`.
    #[serde(default, rename = "probeUrl")]
    pub probe_url: Option<String>,
    #[serde(default = "default_probe_timeout_ms", rename = "probeTimeoutMs")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_mock_ttl_secs", rename = "mockTtlSecs")]
    pub mock_ttl_secs: u64,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_timeout_ms: default_probe_timeout_ms(),
            mock_ttl_secs: default_mock_ttl_secs(),
        }
    }
}
