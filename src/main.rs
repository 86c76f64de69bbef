use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodeflow_core::config::AppConfig;
use nodeflow_core::event::EventBus;
use nodeflow_core::traits::{AutomationBridge, KeyValueStore, ModelClient};
use nodeflow_engine::graph::NodeKind;
use nodeflow_engine::{Graph, RunLogger, RunStatus, WorkflowEngine};
use nodeflow_llm::RetryingModel;
use nodeflow_memory::{InMemoryStore, MemoryWindow, SqliteStore};
use nodeflow_tools::{HttpBridge, StaticTokenSource, ToolKind};

#[derive(Parser)]
#[command(name = "nodeflow", version, about = "Run LLM agent workflow graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "nodeflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow once and print its final output
    Run {
        /// Workflow JSON file
        workflow: PathBuf,
        /// Input text (read from stdin when omitted)
        #[arg(trailing_var_arg = true)]
        input: Vec<String>,
        /// Print the full run state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that a workflow file is runnable
    Validate {
        /// Workflow JSON file
        workflow: PathBuf,
    },
    /// Automation bridge commands
    Bridge {
        #[command(subcommand)]
        action: BridgeAction,
    },
    /// Inspect or clear stored conversation memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum BridgeAction {
    /// Check that the bridge is reachable and accepts the token
    Ping,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// List storage keys with saved history
    List,
    /// Print the stored turns for a key
    Show { key: String },
    /// Delete the stored turns for a key
    Clear { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nodeflow=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Validation needs no config.
    let command = match cli.command {
        Commands::Validate { workflow } => return validate(&workflow),
        other => other,
    };
    let config = load_config(&cli.config)?;

    match command {
        Commands::Run {
            workflow,
            input,
            json,
        } => {
            let text = if input.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                input.join(" ")
            };
            run_workflow(&config, &workflow, &text, json).await?;
        }
        Commands::Validate { workflow } => validate(&workflow)?,
        Commands::Bridge {
            action: BridgeAction::Ping,
        } => {
            let bridge_config = config
                .bridge
                .as_ref()
                .context("no [bridge] section configured (or NODEFLOW_BRIDGE_URL / NODEFLOW_BRIDGE_TOKEN)")?;
            HttpBridge::new(bridge_config)?.ping().await?;
            println!("Bridge at {} is reachable.", bridge_config.url);
        }
        Commands::Memory { action } => memory_command(&config, action).await?,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Load `path`, then `~/.nodeflow/config.toml`, then fall back to env vars.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = AppConfig::default().workspace_dir().join("config.toml");
    if home_config.exists() {
        info!(path = %home_config.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&home_config)?);
    }

    warn!("No config file found, using environment variables");
    Ok(AppConfig::from_env())
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let graph = Graph::load(path)?;
    graph.validate()?;

    for node in &graph.nodes {
        if let NodeKind::Tool(tool) = &node.kind {
            if let Err(e) = ToolKind::from_id(&tool.tool_type) {
                println!("warning: node '{}': {}", node.id, e);
            }
        }
    }
    println!(
        "{}: {} nodes, {} edges, entry '{}'",
        path.display(),
        graph.nodes.len(),
        graph.edges.len(),
        graph.entry_node()?.id
    );
    Ok(())
}

fn open_store(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn KeyValueStore>>> {
    match config.memory.backend.as_str() {
        "sqlite" => Ok(Some(Arc::new(SqliteStore::open(&config.memory_db_path())?))),
        "memory" => Ok(Some(Arc::new(InMemoryStore::new()))),
        "none" => Ok(None),
        other => bail!("unknown memory backend '{}'", other),
    }
}

fn build_model(config: &AppConfig) -> anyhow::Result<Arc<dyn ModelClient>> {
    let client = nodeflow_llm::create_client(&config.model)?;
    Ok(match config.model.retry.clone() {
        Some(retry) => Arc::new(RetryingModel::new(client, retry)),
        None => Arc::from(client),
    })
}

async fn run_workflow(
    config: &AppConfig,
    workflow: &Path,
    input: &str,
    json: bool,
) -> anyhow::Result<()> {
    let graph = Graph::load(workflow)
        .with_context(|| format!("failed to load workflow {}", workflow.display()))?;

    let event_bus = Arc::new(EventBus::default());
    let memory = match open_store(config) {
        Ok(Some(store)) => MemoryWindow::new(store, config.memory.key_prefix.clone()),
        Ok(None) => MemoryWindow::stateless(),
        Err(e) => {
            warn!(error = %e, "Conversation memory unavailable, running stateless");
            MemoryWindow::stateless()
        }
    };

    let mut builder = WorkflowEngine::builder(build_model(config)?)
        .app_config(config)
        .memory(memory)
        .event_bus(event_bus.clone());
    if let Some(bridge_config) = &config.bridge {
        let bridge: Arc<dyn AutomationBridge> = Arc::new(HttpBridge::new(bridge_config)?);
        builder = builder.bridge(bridge);
    }
    if let Some(gcp) = &config.gcp {
        builder = builder.tokens(Arc::new(StaticTokenSource::from_config(gcp)));
    }
    let engine = Arc::new(builder.build());

    let shutdown = CancellationToken::new();
    let logger = config
        .log_dir()
        .map(|dir| RunLogger::new(dir).spawn(event_bus.clone(), shutdown.clone()));

    // Ctrl-C cancels between nodes; the in-flight call finishes first.
    let engine_for_signal = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current node...");
            engine_for_signal.cancel();
        }
    });

    let state = engine
        .run(&graph, input)
        .await
        .context("another run is already active")?;

    shutdown.cancel();
    if let Some(handle) = logger {
        handle.await.ok();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    }

    match state.status {
        RunStatus::Completed => {
            if !json {
                println!("{}", state.final_output.unwrap_or_default());
            }
            Ok(())
        }
        RunStatus::Idle => {
            eprintln!(
                "Run cancelled after {} node(s).",
                state.executed_node_ids.len()
            );
            Ok(())
        }
        RunStatus::Error | RunStatus::Running => bail!(
            "run failed at node {}: {}",
            state.current_node_id.as_deref().unwrap_or("-"),
            state.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

async fn memory_command(config: &AppConfig, action: MemoryAction) -> anyhow::Result<()> {
    if config.memory.backend != "sqlite" {
        bail!("memory commands need the sqlite backend; history is not persisted otherwise");
    }
    let store = Arc::new(SqliteStore::open(&config.memory_db_path())?);
    let prefix = config.memory.key_prefix.clone();

    match action {
        MemoryAction::List => {
            for key in store.keys(&prefix)? {
                println!("{}", display_key(&key, &prefix));
            }
        }
        MemoryAction::Show { key } => {
            let window = MemoryWindow::new(store, prefix);
            let turns = window.read(&key, usize::MAX).await?;
            if turns.is_empty() {
                println!("No history stored for '{}'.", key);
            }
            for turn in turns {
                println!("{}: {}", turn.role.as_str(), turn.content);
            }
        }
        MemoryAction::Clear { key } => {
            MemoryWindow::new(store, prefix).clear(&key).await?;
            println!("Cleared history for '{}'.", key);
        }
    }
    Ok(())
}

/// Storage key as the user typed it: the configured prefix removed once.
fn display_key<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_key_strips_prefix_once() {
        assert_eq!(display_key("mem_chat", "mem_"), "chat");
        assert_eq!(display_key("mem_mem_chat", "mem_"), "mem_chat");
        assert_eq!(display_key("other", "mem_"), "other");
    }
}
