use serde::{Deserialize, Serialize};

fn default_gemini_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
    #[serde(default = "default_gemini_base", rename = "apiBase")]
    pub api_base: String,
}

redact_debug!(GeminiConfig, redact(api_key), api_base,);

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_gemini_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini: GeminiConfig,
}

fn default_fast_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_reasoning_model() -> String {
    "gemini-2.0-flash-lite".to_string()
}

fn default_thinking_model() -> String {
    "gemini-2.0-flash-thinking-exp".to_string()
}

/// Logical model aliases used by workflow manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_fast_model")]
    pub fast: String,
    #[serde(default = "default_reasoning_model")]
    pub reasoning: String,
    #[serde(default = "default_thinking_model")]
    pub thinking: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_fast_model(),
            reasoning: default_reasoning_model(),
            thinking: default_thinking_model(),
        }
    }
}

impl ModelsConfig {
    /// Map an alias to its concrete model id. Anything that is not an alias is
    /// assumed to already be concrete and returned unchanged.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        match name {
            "fast" => &self.fast,
            "reasoning" => &self.reasoning,
            "thinking" => &self.thinking,
            other => other,
        }
    }
}
