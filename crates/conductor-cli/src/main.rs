//! The `conductor` binary: loads configuration, registers the configured
//! workers, and serves the gateway.

use clap::{Parser, Subcommand};
use conductor_agent::{AgentDescriptor, AgentRegistry, HttpAgent};
use conductor_gateway::GatewayServer;
use conductor_kernel::{HeuristicPlanner, Kernel, KernelConfig};
use conductor_session::FileContextStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor", about = "Conductor — agent orchestration kernel")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Deserialize)]
struct ConductorConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    kernel: KernelConfig,
    #[serde(default)]
    planner: PlannerConfig,
    #[serde(default)]
    workers: Vec<WorkerConfig>,
}

#[derive(Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Default)]
struct PlannerConfig {
    /// Ensemble size per capability name.
    #[serde(default)]
    ensembles: HashMap<String, u32>,
    /// Require the full ensemble instead of degrading to the available
    /// subset.
    #[serde(default)]
    require_full_ensembles: bool,
}

#[derive(Deserialize)]
struct WorkerConfig {
    agent_id: String,
    capabilities: Vec<String>,
    endpoint: String,
    concurrency_limit: Option<u32>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let config_str = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let config: ConductorConfig = toml::from_str(&config_str)?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            serve(config.data_dir, config.kernel, config.planner, config.workers, host, port)
                .await
        }
    }
}

async fn serve(
    data_dir: PathBuf,
    kernel_config: KernelConfig,
    planner_config: PlannerConfig,
    workers: Vec<WorkerConfig>,
    host: String,
    port: u16,
) -> anyhow::Result<()> {
    let store = Arc::new(FileContextStore::new(data_dir.join("contexts")).await?);
    let registry = Arc::new(AgentRegistry::new(kernel_config.breaker.clone()));

    for worker in workers {
        let mut descriptor = AgentDescriptor::new(
            worker.agent_id.clone(),
            worker.capabilities.iter().map(|c| c.as_str().into()),
        );
        if let Some(limit) = worker.concurrency_limit {
            descriptor = descriptor.with_concurrency_limit(limit);
        }
        let handler = Arc::new(HttpAgent::new(worker.agent_id, worker.endpoint));
        registry.register(descriptor, handler).await?;
    }
    info!(agents = registry.len().await, "Registered configured workers");

    let mut planner = HeuristicPlanner::new();
    for (capability, size) in planner_config.ensembles {
        planner = if planner_config.require_full_ensembles {
            planner.with_ensemble(capability.as_str().into(), size)
        } else {
            planner.with_optional_ensemble(capability.as_str().into(), size)
        };
    }

    let kernel = Arc::new(Kernel::new(
        Arc::new(planner),
        registry,
        store,
        kernel_config,
    ));
    let app = GatewayServer::build(kernel);

    let addr = format!("{host}:{port}");
    info!(%addr, "Conductor gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
