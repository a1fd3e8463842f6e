use super::{Config, Context, MockAction, Path, ToolRegistry, build_client, load_config, read_input};
use crate::agent::mock::{FileMockStore, MockPayload, MockStore};
use crate::agent::tools::{ToolDispatcher, render_tool_definitions};
use crate::config::credentials::missing_credentials;
use crate::config::{get_config_path, save_config};
use crate::providers::ClientAvailability;
use anyhow::Result;
use std::time::Duration;

pub(super) fn init_command(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    let config = Config::default();
    save_config(&config, Some(&path))?;
    println!("Created config at {}", path.display());

    let workspace = config.workspace.resolved_base_dir()?;
    crate::utils::ensure_dir(&workspace)
        .with_context(|| format!("Failed to create workspace at {}", workspace.display()))?;
    println!("Workspace root: {}", workspace.display());
    println!();
    println!("Set RARO_GEMINI_API_KEY (or providers.gemini.apiKey) before invoking agents.");
    Ok(())
}

pub(super) fn status_command(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };
    let config = load_config(Some(&path))?;

    println!("raro {}", crate::VERSION);
    if path.exists() {
        println!("Config: {}", path.display());
    } else {
        println!("Config: {} (not found, using defaults)", path.display());
    }
    println!("Workspace: {}", config.workspace.resolved_base_dir()?.display());
    println!(
        "Models: fast={} reasoning={} thinking={}",
        config.models.fast, config.models.reasoning, config.models.thinking
    );

    match build_client(&config) {
        ClientAvailability::Ready(client) => {
            println!("Model client: ready (default {})", client.provider.default_model());
        }
        ClientAvailability::Unavailable(reason) => {
            println!("Model client: unavailable ({})", reason);
        }
    }

    let missing = missing_credentials(&config);
    if !missing.is_empty() {
        println!("Missing credentials: {}", missing.join(", "));
    }

    let registry = ToolRegistry::standard(&config)?;
    println!("Tools: {}", registry.tool_names().join(", "));
    if let Some(url) = &config.debug.probe_url {
        println!("Debug probe: {}", url);
    }
    Ok(())
}

pub(super) fn tools_command(
    config_path: Option<&Path>,
    names: &[String],
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = ToolRegistry::standard(&config)?;
    let names = if names.is_empty() {
        registry.tool_names()
    } else {
        names.to_vec()
    };

    let definitions = registry.definitions(&names);
    if definitions.len() < names.len() {
        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| registry.get(n).is_none())
            .map(String::as_str)
            .collect();
        eprintln!("Unknown tools skipped: {}", unknown.join(", "));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
    } else {
        println!("{}", render_tool_definitions(&definitions));
    }
    Ok(())
}

/// Mocks staged here are picked up by any process sharing the workspace.
pub(super) async fn mock_command(config_path: Option<&Path>, action: MockAction) -> Result<()> {
    let config = load_config(config_path)?;
    let store = FileMockStore::under_base(
        &config.workspace.resolved_base_dir()?,
        Duration::from_secs(config.debug.mock_ttl_secs),
    );

    match action {
        MockAction::Stage {
            run,
            agent,
            final_answer,
            input,
        } => {
            let content = read_input(&input)?;
            if content.trim().is_empty() {
                anyhow::bail!("refusing to stage an empty turn");
            }
            let payload = MockPayload {
                content,
                force_tool_execution: !final_answer,
            };
            store.stage(&run, &agent, payload).await?;
            println!(
                "Staged next turn for {}/{} at {} (expires in {}s)",
                run,
                agent,
                store.path_for(&run, &agent).display(),
                config.debug.mock_ttl_secs
            );
        }
        MockAction::Clear { run, agent } => match store.take(&run, &agent).await {
            Some(_) => println!("Discarded staged turn for {}/{}", run, agent),
            None => println!("Nothing staged for {}/{}", run, agent),
        },
    }
    Ok(())
}
