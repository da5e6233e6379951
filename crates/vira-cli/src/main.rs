mod config;

use clap::{Parser, Subcommand};
use config::ViraConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vira_agent::{provider_from_config, ListDirectoryTool, ReadFileTool, ToolRegistry, WorkerRoster};
use vira_orchestrator::{default_profiles, OrchestrationEngine, WorkflowRegistry, WorkflowStatus};

#[derive(Parser)]
#[command(name = "vira", about = "VIRA multi-agent workflow orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "vira.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and print its aggregated result
    Run {
        /// Registered workflow type, e.g. PlanningWorkflow
        workflow_type: String,
        /// Request payload as JSON; anything that is not JSON is sent as a string
        #[arg(long, conflicts_with = "payload_file")]
        payload: Option<String>,
        /// Read the request payload from a JSON file
        #[arg(long)]
        payload_file: Option<PathBuf>,
    },
    /// List registered workflow types
    Workflows,
    /// Load and validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Workflows => {
            let registry = WorkflowRegistry::with_builtins();
            println!("Registered workflows:");
            for (name, description) in registry.describe() {
                println!("  {name}: {description}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let config = ViraConfig::load(&cli.config).await?;
            provider_from_config(config.model.clone())?;
            println!(
                "Config OK: provider {:?}, model {}, max_concurrency {}",
                config.model.provider, config.model.model_id, config.engine.max_concurrency
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            workflow_type,
            payload,
            payload_file,
        } => {
            let config = ViraConfig::load(&cli.config).await?;
            let request = read_payload(payload, payload_file).await?;
            let engine = build_engine(config).await?;

            let id = engine.submit(&workflow_type, request).await?;
            info!(instance_id = %id, workflow = %workflow_type, "Waiting for result");

            let outcome = tokio::select! {
                outcome = engine.result(id) => outcome?,
                _ = tokio::signal::ctrl_c() => {
                    warn!(instance_id = %id, "Interrupted, cancelling");
                    engine.cancel(id).await?;
                    engine.result(id).await?
                }
            };

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            match outcome.status {
                WorkflowStatus::Failed | WorkflowStatus::Cancelled => Ok(ExitCode::FAILURE),
                _ => Ok(ExitCode::SUCCESS),
            }
        }
    }
}

async fn read_payload(
    payload: Option<String>,
    payload_file: Option<PathBuf>,
) -> anyhow::Result<serde_json::Value> {
    if let Some(path) = payload_file {
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read payload file '{}': {e}", path.display())
        })?;
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(match payload {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        None => serde_json::Value::Object(serde_json::Map::new()),
    })
}

async fn build_engine(config: ViraConfig) -> anyhow::Result<OrchestrationEngine> {
    let provider = provider_from_config(config.model)?;

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ReadFileTool::new(&config.workspace)));
    tools.register(Arc::new(ListDirectoryTool::new(&config.workspace)));
    info!(count = tools.tool_count(), root = %config.workspace.display(), "Tools registered");

    let roster = WorkerRoster::from_profiles(default_profiles(), provider, &tools);
    let engine =
        OrchestrationEngine::from_config(WorkflowRegistry::with_builtins(), roster, config.engine)
            .await?;
    Ok(engine)
}
