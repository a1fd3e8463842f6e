use super::*;

use std::ffi::OsStr;

#[test]
fn test_scrubbed_command_clears_secrets() {
    unsafe { std::env::set_var("RARO_GEMINI_API_KEY", "should-not-leak") };
    let cmd = scrubbed_command("python3");
    let envs: Vec<_> = cmd.as_std().get_envs().collect();
    assert!(
        !envs
            .iter()
            .any(|(k, _)| *k == OsStr::new("RARO_GEMINI_API_KEY")),
        "API key must not be passed to sandboxed code"
    );
}

#[test]
fn test_scrubbed_command_passes_path() {
    if std::env::var("PATH").is_ok() {
        let cmd = scrubbed_command("python3");
        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(
            envs.iter()
                .any(|(k, v)| *k == OsStr::new("PATH") && v.is_some()),
            "PATH should be passed through"
        );
    }
}

#[test]
fn test_scrubbed_command_program() {
    let cmd = scrubbed_command("python3");
    assert_eq!(cmd.as_std().get_program(), OsStr::new("python3"));
}
