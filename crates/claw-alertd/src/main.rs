//! claw-alertd - Clawbernetes alert evaluation daemon
//!
//! Periodically evaluates the stored alert definitions and logs every
//! state transition.

use std::path::{Path, PathBuf};

use claw_alertd::{Daemon, DaemonConfig, LogFormat};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "claw-alertd")]
#[command(about = "Clawbernetes alert evaluation daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alert scheduler until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, env = "CLAW_ALERTD_CONFIG", default_value = "/etc/claw-alertd/config.toml")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/claw-alertd/config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a config file and summarize the stored definitions
    Check {
        /// Path to config file
        #[arg(short, long, env = "CLAW_ALERTD_CONFIG", default_value = "/etc/claw-alertd/config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = DaemonConfig::from_file(&config)?;
            init_tracing(config.log_format)?;
            run_daemon(config).await?;
        }

        Commands::InitConfig { output, force } => {
            init_tracing(LogFormat::Text)?;
            init_config(&output, force)?;
        }

        Commands::Check { config } => {
            init_tracing(LogFormat::Text)?;
            check(&config)?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("claw_alertd=info".parse()?)
        .add_directive("claw_alerts=info".parse()?);

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    info!(
        store = %config.store_path.display(),
        metrics = %config.metrics_path.display(),
        base_interval_secs = config.scheduler.base_interval_secs,
        "starting claw-alertd"
    );

    let daemon = Daemon::new(config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let summary = daemon.run(shutdown).await?;
    println!(
        "stopped with {} instances ({} alerting, {} no data, {} error)",
        summary.instances, summary.alerting, summary.no_data, summary.error
    );
    Ok(())
}

fn init_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", output.display());
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let rendered = DaemonConfig::default().to_toml()?;
    std::fs::write(output, rendered)?;

    info!(path = %output.display(), "wrote config");
    println!("Config written to: {}", output.display());
    Ok(())
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    let daemon = Daemon::new(config)?;
    let report = daemon.check()?;

    println!("{}: ok", config_path.display());
    println!("{report}");
    Ok(())
}
