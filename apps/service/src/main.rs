mod config;
mod service;
mod validation;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pinglog::{ArchiveOutcome, LogCatalog, PingProber, Prober, TcpProber};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::{Config, ProbeKind};
use crate::service::PingService;

#[derive(Debug, Parser)]
#[command(name = "pinglog", version, about = "Host latency probing with day-partitioned logs")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/pinglog/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the probe service until interrupted
    Run {
        /// Poll even without listeners
        #[arg(long)]
        always_on: bool,
        /// Attach a listener that prints every event as a JSON line
        #[arg(long)]
        events: bool,
    },
    /// Run one archive pass and exit
    Archive,
    /// List the log directory
    Files,
    /// Print a listed log file to stdout
    Cat { file: String },
    /// Print the effective configuration
    Config,
}

fn build_prober(config: &Config) -> Arc<dyn Prober> {
    let timeout = Duration::from_secs(config.probe.timeout_seconds);
    match config.probe.kind {
        ProbeKind::Ping => Arc::new(PingProber::new(timeout)),
        ProbeKind::Tcp => Arc::new(TcpProber::new(config.probe.port, timeout)),
    }
}

async fn run(mut config: Config, always_on: bool, events: bool) -> Result<()> {
    config.polling.always_on |= always_on;
    info!(hosts = ?config.polling.hosts, probe = %config.probe.kind, "Starting pinglog");

    let service = PingService::new(&config, build_prober(&config))?;
    service.start()?;

    let printer = if events {
        let mut rx = service.bus().subscribe();
        let welcome = service.connect();
        println!("{}", serde_json::to_string(&welcome)?);
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    },
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener lagging"),
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    } else {
        if !config.polling.always_on {
            info!("Polling starts once a listener connects (use --always-on or ALWAYS_ON=true)");
        }
        None
    };

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    if let Some(printer) = printer {
        printer.abort();
        service.disconnect().await;
    }
    service.shutdown().await;
    Ok(())
}

async fn archive(config: Config) -> Result<()> {
    let service = PingService::new(&config, build_prober(&config))?;
    match service.archive().await? {
        ArchiveOutcome::NothingToArchive => println!("nothing to archive"),
        ArchiveOutcome::Archived(report) => {
            for name in &report.archived {
                println!("archived {name}");
            }
            for failure in &report.purge_failures {
                println!("kept {} ({})", failure.file, failure.error);
            }
            println!("{} files remain in the log directory", service.catalog().list()?.len());
        }
    }
    Ok(())
}

fn cat(config: &Config, file: &str) -> Result<()> {
    let catalog = LogCatalog::new(&config.storage.log_dir);
    let Some(path) = catalog.resolve(file)? else {
        bail!("{file} is not in the log directory");
    };
    let mut source = std::fs::File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    std::io::copy(&mut source, &mut std::io::stdout().lock())?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    match cli.command.unwrap_or(Command::Run { always_on: false, events: false }) {
        Command::Run { always_on, events } => run(config, always_on, events).await,
        Command::Archive => archive(config).await,
        Command::Files => {
            for file in LogCatalog::new(&config.storage.log_dir).list()? {
                println!("{file}");
            }
            Ok(())
        }
        Command::Cat { file } => cat(&config, &file),
        Command::Config => {
            print!("{config}");
            Ok(())
        }
    }
}
