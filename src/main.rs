use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use metric_agent::agent::Agent;
use metric_agent::config::{self, Config};

#[derive(Parser, Debug)]
#[command(name = "metric-agent", about = "Host metrics agent with JSON and Prometheus endpoints")]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Agent HTTP listen address
    #[arg(long)]
    listen: Option<String>,

    /// Collection interval (e.g. 500ms, 5s, 1m)
    #[arg(long, value_parser = config::parse_duration)]
    interval: Option<Duration>,

    /// Validate config and exit
    #[arg(long)]
    check: bool,

    /// Print version and exit
    #[arg(short, long)]
    version: bool,
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("metric-agent {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    config.apply_overrides(cli.listen, cli.interval);
    config.validate()?;

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.agent.hostname,
        "Starting metric agent"
    );

    // Run the agent
    if let Err(e) = run(config).await {
        error!(error = %e, "Agent terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(&config.agent.log_level)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    // Bind before anything is spawned so a busy port leaks no tasks
    let agent = Agent::build(&config).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal, exiting"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        on_signal.cancel();
    });

    agent.run(shutdown).await
}
