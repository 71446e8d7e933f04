use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lyra_config::AppConfig;
use lyra_runtime::{ControlClient, run_daemon};

#[derive(Debug, Parser)]
#[command(name = "lyra", version, about = "Quantum dispatch chat-bot backend")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "lyra.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the dispatch core in the foreground.
    Start,
    /// Ask a running instance to drain and stop.
    Stop,
    /// Print a status snapshot from a running instance.
    Status,
}

/// Exit codes: 0 clean shutdown, 1 startup failure, 2 fatal runtime error.
fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config {}: {err}", cli.config.display());
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::Start => {
            let _log_guard = match init_tracing(&config) {
                Ok(guard) => guard,
                Err(err) => {
                    eprintln!("failed to initialise logging: {err}");
                    return ExitCode::from(1);
                }
            };
            match runtime.block_on(run_daemon(config)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("fatal: {err:#}");
                    ExitCode::from(2)
                }
            }
        }
        Commands::Stop => match runtime.block_on(stop(&config)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("stop failed: {err:#}");
                ExitCode::from(2)
            }
        },
        Commands::Status => match runtime.block_on(status(&config)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("status failed: {err:#}");
                ExitCode::from(2)
            }
        },
    }
}

async fn stop(config: &AppConfig) -> Result<()> {
    let client = ControlClient::new(&config.daemon.socket_path);
    let message = client
        .shutdown()
        .await
        .context("is the daemon running? (lyra start)")?;
    println!("{message}");
    Ok(())
}

async fn status(config: &AppConfig) -> Result<()> {
    let client = ControlClient::new(&config.daemon.socket_path);
    let status = client
        .status()
        .await
        .context("is the daemon running? (lyra start)")?;

    println!("uptime: {}s", status.uptime_secs);
    println!("workers: {}", status.workers);
    println!("draining: {}", status.draining);
    println!(
        "queue: {} queued, {} active (mean service {:.1}s)",
        status.queue.current_size, status.queue.active, status.queue.rolling_mean_service_secs
    );
    println!(
        "dispatches: {} total, {} ok, avg collapse {:.2}s",
        status.observer.total_collapses,
        status.observer.successful_collapses,
        status.observer.average_collapse_secs
    );
    println!("store: {}", status.store_root);
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));

    let file_appender = tracing_appender::rolling::daily("logs", "lyra.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    Ok(guard)
}
