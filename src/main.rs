use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verdict_agent::{DelegationRouter, JobManager};
use verdict_core::config::AppConfig;
use verdict_core::types::{EventKind, TicketPayload};
use verdict_gateway::GatewayServer;
use verdict_tools::HttpToolTransport;

#[derive(Parser)]
#[command(name = "verdict", version, about = "Ticket evaluation over a delegating agent graph")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "verdict.toml", env = "VERDICT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway (default)
    Serve,
    /// Load the config and validate the agent graph
    Validate,
    /// Evaluate one ticket in-process and print its events as JSON lines
    Run {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        acceptance_criteria: String,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("verdict=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "verdict", &mut std::io::stdout());
        return Ok(());
    }

    let config = Arc::new(
        AppConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(config.as_ref())?);
        }
        Some(Commands::Validate) => {
            let router = build_router(config.clone())?;
            println!(
                "graph '{}' is valid: {} agents, {} tools, entry agent '{}'",
                router.graph().id,
                router.graph().len(),
                router.tools().len(),
                router.graph().entry_agent()
            );
        }
        Some(Commands::Run {
            title,
            description,
            acceptance_criteria,
        }) => {
            let jobs = Arc::new(JobManager::new(
                Arc::new(build_router(config.clone())?),
                config.jobs.clone(),
            ));
            let receipt = jobs.submit(TicketPayload::new(title, description, acceptance_criteria))?;
            info!(job_id = %receipt.job_id, "Evaluating ticket");

            let ctrl_c_jobs = jobs.clone();
            let job_id = receipt.job_id.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                let _ = ctrl_c_jobs.cancel(&job_id);
            });

            let mut events = jobs.subscribe(&receipt.job_id, 1)?;
            let mut failed = None;
            while let Some(event) = events.next().await {
                println!("{}", serde_json::to_string(&event)?);
                if event.kind == EventKind::Failed {
                    failed = Some(event.message.clone());
                }
            }
            if let Some(message) = failed {
                anyhow::bail!(message);
            }
        }
        None | Some(Commands::Serve) => {
            let jobs = Arc::new(JobManager::new(
                Arc::new(build_router(config.clone())?),
                config.jobs.clone(),
            ));
            let cancel = CancellationToken::new();
            let reaper = jobs.spawn_reaper(cancel.clone());

            // Graceful shutdown on Ctrl-C
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            info!(bind = %config.gateway.bind, "Starting gateway");
            let server = GatewayServer::new(config.gateway.clone(), jobs);
            server.run(cancel.clone()).await?;
            cancel.cancel();
            reaper.await.ok();
        }
        Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

/// Wire the HTTP tool transport and the model invoker into a validated router.
fn build_router(config: Arc<AppConfig>) -> anyhow::Result<DelegationRouter> {
    let transport = Arc::new(HttpToolTransport::new());
    let model = verdict_llm::create_invoker(&config.router);
    DelegationRouter::from_config(config, transport, model).context("invalid agent graph")
}
