use super::*;

#[test]
fn defaults_match_runtime_expectations() {
    let config = Config::default();
    assert_eq!(config.agent.max_turns, 5);
    assert!((config.agent.temperature - 1.0).abs() < f32::EPSILON);
    assert_eq!(config.workspace.read_limit_chars, 50_000);
    assert_eq!(config.context.cache_threshold_chars, 100_000);
    assert_eq!(config.tools.search.search_depth, "advanced");
    assert_eq!(config.tools.search.max_tokens, 2000);
    assert_eq!(config.tools.sandbox.session_ttl_secs, 3600);
    assert_eq!(config.debug.mock_ttl_secs, 600);
    assert!(config.debug.probe_url.is_none());
    config.validate().unwrap();
}

#[test]
fn resolve_known_aliases() {
    let models = ModelsConfig::default();
    assert_eq!(models.resolve("fast"), "gemini-2.0-flash");
    assert_eq!(models.resolve("reasoning"), "gemini-2.0-flash-lite");
    assert_eq!(models.resolve("thinking"), "gemini-2.0-flash-thinking-exp");
}

#[test]
fn resolve_unknown_passes_through() {
    let models = ModelsConfig::default();
    assert_eq!(models.resolve("gemini-2.5-pro"), "gemini-2.5-pro");
    assert_eq!(models.resolve("FAST"), "FAST");
    assert_eq!(models.resolve(""), "");
}

#[test]
fn camel_case_keys_deserialize() {
    let config: Config = serde_json::from_value(serde_json::json!({
        "agent": {"maxTurns": 8, "modelTimeoutSecs": 30},
        "models": {"fast": "gemini-2.5-flash"},
        "workspace": {"baseDir": "/srv/raro", "readLimitChars": 1000},
        "context": {"cacheThresholdChars": 5000},
        "tools": {"search": {"apiKey": "tvly-123"}, "sandbox": {"python": "python3.12"}},
        "debug": {"probeUrl": "http://probe:8080"}
    }))
    .unwrap();
    assert_eq!(config.agent.max_turns, 8);
    assert_eq!(config.agent.model_timeout_secs, 30);
    assert_eq!(config.models.fast, "gemini-2.5-flash");
    // Unspecified aliases keep their defaults
    assert_eq!(config.models.thinking, "gemini-2.0-flash-thinking-exp");
    assert_eq!(config.workspace.base_dir, "/srv/raro");
    assert_eq!(config.workspace.read_limit_chars, 1000);
    assert_eq!(config.context.cache_threshold_chars, 5000);
    assert_eq!(config.tools.search.api_key, "tvly-123");
    assert_eq!(config.tools.sandbox.python, "python3.12");
    assert_eq!(config.debug.probe_url.as_deref(), Some("http://probe:8080"));
}

#[test]
fn validate_rejects_zero_turns() {
    let mut config = Config::default();
    config.agent.max_turns = 0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("maxTurns"));
}

#[test]
fn validate_rejects_bad_temperature() {
    let mut config = Config::default();
    config.agent.temperature = 3.5;
    assert!(config.validate().is_err());
}

#[test]
fn validate_rejects_empty_alias_target() {
    let mut config = Config::default();
    config.models.reasoning = "  ".into();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("models.reasoning"));
}

#[test]
fn debug_output_redacts_secrets() {
    let mut config = Config::default();
    config.providers.gemini.api_key = "AIza-secret".into();
    config.tools.search.api_key = "tvly-secret".into();
    let rendered = format!("{:?}", config);
    assert!(!rendered.contains("AIza-secret"));
    assert!(!rendered.contains("tvly-secret"));
    assert!(rendered.contains("[REDACTED]"));
}

#[test]
fn explicit_base_dir_expands_home() {
    let ws = WorkspaceConfig {
        base_dir: "~/raro-storage".into(),
        read_limit_chars: 10,
    };
    let home = dirs::home_dir().unwrap();
    assert_eq!(ws.resolved_base_dir().unwrap(), home.join("raro-storage"));
}
