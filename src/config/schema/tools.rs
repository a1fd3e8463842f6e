use serde::{Deserialize, Serialize};

fn default_search_base() -> String {
    "https://api.tavily.com".to_string()
}

fn default_search_depth() -> String {
    "advanced".to_string()
}

fn default_search_max_tokens() -> usize {
    2000
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_search_base", rename = "apiBase")]
    pub api_base: String,
    #[serde(default = "default_search_depth", rename = "searchDepth")]
    pub search_depth: String,
    #[serde(default = "default_search_max_tokens", rename = "maxTokens")]
    pub max_tokens: usize,
}

redact_debug!(
    SearchConfig,
    redact(api_key),
    api_base,
    search_depth,
    max_tokens,
);

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_search_base(),
            search_depth: default_search_depth(),
            max_tokens: default_search_max_tokens(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_exec_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used by the local sandbox provider.
    #[serde(default = "default_python")]
    pub python: String,
    /// How long a run's sandbox id stays registered for reconnection.
    #[serde(default = "default_session_ttl_secs", rename = "sessionTtlSecs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_exec_timeout_secs", rename = "execTimeoutSecs")]
    pub exec_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            session_ttl_secs: default_session_ttl_secs(),
            exec_timeout_secs: default_exec_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}
