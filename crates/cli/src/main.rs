mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use valwatch_notifier::NotifyClient;
use valwatch_watcher::{check_endpoints, RpcEndpointProbe, Watcher};

#[derive(Parser)]
#[command(name = "valwatch")]
#[command(version)]
#[command(about = "Monitor validator health and delegations on Cosmos chains", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch every configured chain until interrupted
    Start(ConfigOpts),
    /// Probe every configured endpoint once and report which would be used
    Check(ConfigOpts),
}

#[derive(Args)]
struct ConfigOpts {
    /// Application config file
    #[arg(short, long, value_name = "PATH", default_value = "config.json")]
    config: PathBuf,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn start(config: Config) -> Result<()> {
    let notifier = NotifyClient::new(config.notify_config())
        .context("Failed to initialize notifier")?;
    info!(backends = ?notifier.backend_names(), "Notifier initialized");

    let watcher = Watcher::new(config.watcher_config(), Arc::new(notifier));
    let shutdown = watcher.shutdown_token();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    info!(chains = config.chains.len(), "Starting watchers");
    watcher.start().await?;
    info!("All watchers stopped");

    Ok(())
}

async fn check(config: Config) -> Result<()> {
    let probe = RpcEndpointProbe;
    let mut unavailable = Vec::new();

    for chain in &config.chains {
        let statuses = check_endpoints(&probe, &chain.endpoints).await;

        println!(
            "[{}] {}/{} usable endpoints",
            chain.name,
            statuses.usable_count(),
            statuses.len()
        );
        for status in statuses.iter() {
            let state = match (&status.error, status.catching_up) {
                (Some(e), _) => format!("unreachable: {}", e),
                (None, true) => "catching up".to_string(),
                (None, false) => "ok".to_string(),
            };
            println!("  {} {}", status.url, state);
        }

        match statuses.first_usable() {
            Some(selected) => println!("  selected: {}", selected.url),
            None => unavailable.push(chain.name.clone()),
        }
    }

    if !unavailable.is_empty() {
        anyhow::bail!("no usable endpoint for: {}", unavailable.join(", "));
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(opts) => {
            let config = Config::load(&opts.config)?;
            init_tracing(&config);
            start(config).await
        }
        Commands::Check(opts) => {
            let config = Config::load(&opts.config)?;
            init_tracing(&config);
            check(config).await
        }
    }
}
