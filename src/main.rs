//! archive-sentinel
//!
//! Runs the archive resilience core: health checks, alert evaluation and
//! configuration hot reload. Archive adapters are provided by the host
//! application that embeds the library; this binary hosts the monitoring
//! loops and diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use archive_sentinel::alerting::default_rules;
use archive_sentinel::clock;
use archive_sentinel::config::loader::load_config;
use archive_sentinel::config::watcher::ConfigWatcher;
use archive_sentinel::dashboard::QuickStatusLevel;
use archive_sentinel::lifecycle::signals::shutdown_signal;
use archive_sentinel::observability;
use archive_sentinel::ArchiveSystem;

#[derive(Parser)]
#[command(name = "archive-sentinel")]
#[command(about = "Resilience and monitoring core for web archiving", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and exit
    CheckConfig {
        path: PathBuf,
    },
    /// Print the default alert rules as JSON
    Rules,
    /// Run the monitoring loops until interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Seconds between quick-status log lines
        #[arg(long, default_value_t = 60)]
        status_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => match load_config(&path) {
            Ok(config) => {
                println!("{} is valid", path.display());
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        Commands::Rules => {
            println!("{}", serde_json::to_string_pretty(&default_rules())?);
        }
        Commands::Run {
            config,
            status_interval,
        } => run(config, status_interval).await?,
    }
    Ok(())
}

async fn run(path: PathBuf, status_interval: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&path)?;
    let system = ArchiveSystem::new(config.clone(), clock::system());
    observability::logging::init(&config.observability, system.spans().clone())?;

    tracing::info!(config = %path.display(), "archive-sentinel v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    system.start();

    let (watcher, mut updates) = ConfigWatcher::new(&path, system.config());
    let _watcher = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let mut status_tick = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            Some(new_config) = updates.recv() => system.apply_config(new_config),
            _ = status_tick.tick() => {
                let status = system.dashboard().quick_status();
                match status.status {
                    QuickStatusLevel::Ok => tracing::info!(details = ?status.details, "{}", status.message),
                    _ => tracing::warn!(details = ?status.details, "{}", status.message),
                }
            }
            _ = &mut signal => break,
        }
    }

    system.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
