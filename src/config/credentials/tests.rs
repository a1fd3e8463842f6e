use super::*;

#[test]
fn slot_table_is_consistent() {
    assert_eq!(CREDENTIAL_NAMES.len(), CREDENTIAL_ENV_VARS.len());
    for (name, env) in CREDENTIAL_ENV_VARS {
        assert!(CREDENTIAL_NAMES.contains(name));
        assert!(env.starts_with("RARO_"));
    }
}

#[test]
fn get_credential_value_reads_fields() {
    let mut config = Config::default();
    config.providers.gemini.api_key = "AIza-1".into();
    assert_eq!(get_credential_value(&config, "gemini-api-key"), Some("AIza-1"));
    assert_eq!(get_credential_value(&config, "search-api-key"), Some(""));
    assert_eq!(get_credential_value(&config, "nope"), None);
}

#[test]
fn missing_credentials_lists_empty_slots() {
    let mut config = Config::default();
    config.tools.search.api_key = "tvly".into();
    assert_eq!(missing_credentials(&config), vec!["gemini-api-key"]);
}

#[test]
fn env_override_wins_and_empty_is_ignored() {
    // Single test mutates both vars to avoid races between parallel tests.
    unsafe {
        std::env::set_var("RARO_GEMINI_API_KEY", "from-env");
        std::env::set_var("RARO_SEARCH_API_KEY", "");
    }
    let mut config = Config::default();
    config.providers.gemini.api_key = "from-file".into();
    config.tools.search.api_key = "search-from-file".into();
    apply_env_overrides(&mut config);
    unsafe {
        std::env::remove_var("RARO_GEMINI_API_KEY");
        std::env::remove_var("RARO_SEARCH_API_KEY");
    }
    assert_eq!(config.providers.gemini.api_key, "from-env");
    assert_eq!(config.tools.search.api_key, "search-from-file");
}
