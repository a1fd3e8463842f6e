mod subcommands;


use crate::agent::delegation::{GraphView, NodeSpec, extract_delegation};
use crate::agent::tools::ToolRegistry;
use crate::agent::{AgentLoop, AgentLoopConfig, InvocationRequest, InvocationResult};
use crate::bus::EventBus;
use crate::config::{Config, load_config};
use crate::providers::build_client;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "raro")]
#[command(about = "Agent invocation runtime for workflow graphs")]
pub struct Cli {
    /// Config file to use instead of $RARO_HOME/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show configuration, model availability and registered tools
    Status,
    /// Run one agent invocation from a JSON request
    Invoke {
        /// Request file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        request: String,
        /// Stream agent events to stderr as JSON lines
        #[arg(long)]
        events: bool,
        /// Keep the run's sandbox session alive after the invocation
        #[arg(long)]
        keep_sandbox: bool,
    },
    /// Run several independent invocations concurrently
    Batch {
        /// JSON array of requests, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        requests: String,
        #[arg(long)]
        events: bool,
    },
    /// Extract tool calls or a delegation request from model output
    Parse {
        #[arg(long, value_enum, default_value = "function")]
        kind: ParseKind,
        /// Graph snapshot used to check grafts and prunes
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Text file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Print tool definitions as the model sees them
    Tools {
        /// Restrict to these tools; all registered tools when empty
        names: Vec<String>,
        /// Print the raw JSON schemas instead of the prompt rendering
        #[arg(long)]
        json: bool,
    },
    /// Script an agent's next model call
    Mock {
        #[command(subcommand)]
        action: MockAction,
    },
}

#[derive(Subcommand)]
enum MockAction {
    /// Stage text that replaces the agent's next model call
    Stage {
        #[arg(long)]
        run: String,
        #[arg(long)]
        agent: String,
        /// Use the text as the final answer without running its tool calls
        #[arg(long = "final")]
        final_answer: bool,
        /// Text file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Discard a staged turn
    Clear {
        #[arg(long)]
        run: String,
        #[arg(long)]
        agent: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ParseKind {
    Function,
    Delegation,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => {
            subcommands::init_command(config_path, force)?;
        }
        Commands::Status => {
            subcommands::status_command(config_path)?;
        }
        Commands::Invoke {
            request,
            events,
            keep_sandbox,
        } => {
            invoke(config_path, &request, events, keep_sandbox).await?;
        }
        Commands::Batch { requests, events } => {
            batch(config_path, &requests, events).await?;
        }
        Commands::Parse { kind, graph, input } => {
            let text = read_input(&input)?;
            let graph = graph.as_deref().map(read_graph).transpose()?;
            println!("{}", parse_output(kind, &text, graph.as_ref()));
        }
        Commands::Tools { names, json } => {
            subcommands::tools_command(config_path, &names, json)?;
        }
        Commands::Mock { action } => {
            subcommands::mock_command(config_path, action).await?;
        }
    }

    Ok(())
}

/// Read `source` as a path, or stdin when it is `-`.
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))
}

fn read_graph(path: &Path) -> Result<GraphView> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| "Failed to parse graph JSON")
}

fn parse_output(kind: ParseKind, text: &str, graph: Option<&GraphView>) -> Value {
    match kind {
        ParseKind::Function => {
            let calls: Vec<Value> = crate::agent::parsers::parse_function_calls(text)
                .into_iter()
                .map(|c| json!({"name": c.name, "args": c.args}))
                .collect();
            json!({ "calls": calls })
        }
        ParseKind::Delegation => delegation_report(text, graph),
    }
}

/// The delegation request in `text`. With a graph, the request is shown as
/// the scheduler would receive it, alongside how each edit maps onto the graph.
fn delegation_report(text: &str, graph: Option<&GraphView>) -> Value {
    let Some(raw) = extract_delegation(text, None) else {
        return Value::Null;
    };
    let Some(graph) = graph else {
        return json!({ "request": raw });
    };

    let plan = raw.plan(graph);
    let ids = |nodes: &[NodeSpec]| nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>();
    json!({
        "request": extract_delegation(text, Some(graph)),
        "plan": {
            "grafts": ids(&plan.grafts),
            "inserts": ids(&plan.inserts),
            "prunes": plan.prunes,
            "rejected": plan
                .rejected
                .iter()
                .map(|r| json!({"id": r.id, "reason": r.reason}))
                .collect::<Vec<_>>(),
        },
    })
}

/// Invocation result plus any delegation found in its text.
fn result_output(result: &InvocationResult, graph: Option<&GraphView>) -> Value {
    json!({
        "result": result,
        "delegation": delegation_report(&result.text, graph),
    })
}

struct Runtime {
    agent: Arc<AgentLoop>,
    registry: Arc<ToolRegistry>,
}

fn setup_runtime(config: &Config, events: bool) -> Result<Runtime> {
    let registry = Arc::new(ToolRegistry::standard(config)?);
    let client = build_client(config);
    if !client.is_ready() {
        info!("model client unavailable; invocations will fail fast");
    }

    let mut loop_config = AgentLoopConfig::from_config(config, client, registry.clone());
    if events {
        let bus = Arc::new(EventBus::default());
        spawn_event_printer(&bus);
        loop_config = loop_config.with_telemetry(bus);
    }

    Ok(Runtime {
        agent: Arc::new(AgentLoop::new(loop_config)),
        registry,
    })
}

fn spawn_event_printer(bus: &Arc<EventBus>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let Ok(line) = serde_json::to_string(&envelope) {
                        eprintln!("{}", line);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("{{\"type\":\"lagged\",\"dropped\":{}}}", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn invoke(
    config_path: Option<&Path>,
    source: &str,
    events: bool,
    keep_sandbox: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let request: InvocationRequest =
        serde_json::from_str(&read_input(source)?).context("Failed to parse invocation request")?;
    let runtime = setup_runtime(&config, events)?;

    debug!("invoking {} in run {}", request.agent_label(), request.run_id);
    let outcome = runtime.agent.invoke(&request).await;
    if !keep_sandbox {
        runtime.registry.end_run(&request.run_id).await;
    }

    let result = outcome.unwrap_or_else(|e| InvocationResult::failed(e.to_string()));
    let output = result_output(&result, request.graph_view.as_ref());
    println!("{}", serde_json::to_string_pretty(&output)?);
    if result.is_error() {
        anyhow::bail!("invocation failed");
    }
    Ok(())
}

async fn batch(config_path: Option<&Path>, source: &str, events: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let requests: Vec<InvocationRequest> =
        serde_json::from_str(&read_input(source)?).context("Failed to parse request array")?;
    let runtime = setup_runtime(&config, events)?;

    let graphs: Vec<Option<GraphView>> = requests.iter().map(|r| r.graph_view.clone()).collect();
    let mut runs: Vec<String> = requests.iter().map(|r| r.run_id.clone()).collect();
    runs.sort();
    runs.dedup();

    info!("running {} invocation(s)", requests.len());
    let results = runtime.agent.invoke_batch(requests).await;
    for run in &runs {
        runtime.registry.end_run(run).await;
    }

    let output: Vec<Value> = results
        .iter()
        .zip(graphs.iter())
        .map(|(result, graph)| result_output(result, graph.as_ref()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
