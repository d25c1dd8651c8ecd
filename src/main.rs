use anyhow::Context;
use clap::{Parser, Subcommand};
use hazard_ingest::config::Config;
use hazard_ingest::logging;
use hazard_ingest::runtime::Runtime;
use hazard_ingest::sources::build_sources;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hazard_ingest")]
#[command(about = "Concurrent natural-hazard feed ingestion")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and store hazard events
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Path to the TOML config (defaults to $HAZARD_CONFIG, then ./config.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the number of pipeline consumers
        #[arg(long)]
        consumers: Option<usize>,
        /// Override the fetch interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List the configured sources with their kinds and tiers
    Sources {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Stop the runtime on Ctrl-C or SIGTERM.
fn spawn_signal_handler(runtime: Arc<Runtime>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl-C, shutting down gracefully...");
                    runtime.stop().await;
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down gracefully..."),
                _ = term.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl-C, shutting down gracefully...");
        }
        runtime.stop().await;
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            once,
            config,
            consumers,
            interval,
        } => {
            let mut cfg = Config::load(config.as_deref()).context("loading configuration")?;
            if let Some(n) = consumers {
                cfg.runtime.num_consumers = n.max(1);
            }
            if let Some(secs) = interval {
                cfg.runtime.fetch_interval_secs = secs;
            }
            let _guard = logging::init_logging(&cfg.logging);

            let sources = build_sources(&cfg.source_specs).context("building data sources")?;
            for source in &sources {
                info!("[OK] {} ready ({}, {} tier)", source.name(), source.kind(), source.tier());
            }

            let runtime = Arc::new(Runtime::new(&cfg, sources)?);
            spawn_signal_handler(runtime.clone());

            if once {
                info!("Starting single-run mode");
            } else {
                info!("Starting continuous mode (Ctrl+C to stop)");
            }
            runtime.start(!once).await?;
            info!("System shut down");
        }
        Commands::Sources { config } => {
            let cfg = Config::load(config.as_deref()).context("loading configuration")?;
            if cfg.source_specs.is_empty() {
                println!("No sources configured");
            }
            for spec in &cfg.source_specs {
                println!("{:<28} {:<14} {}", spec.name, spec.kind.as_str(), spec.tier);
            }
        }
    }

    Ok(())
}
