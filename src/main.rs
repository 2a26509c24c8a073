//! Varian Turbo - status monitor and command line for TV-301 pump controllers.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::{oneshot, watch};
use tracing_appender::non_blocking::WorkerGuard;
use varian_turbo as app;

use app::config::{AppConfig, ConfigLoadResult};
use app::monitor::StatusMonitor;
use app::status::PumpStatus;

/// Status monitor and command line for Varian TV-301 turbo pump controllers.
#[derive(Parser)]
#[command(name = "varian-turbo")]
struct Cli {
    /// Config file path (default: platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use config.toml from current directory (dev mode)
    #[arg(long)]
    dev: bool,

    /// Override the serial bridge host
    #[arg(long)]
    host: Option<String>,

    /// Override the serial bridge port
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll and print the pump status until Enter or Ctrl-C (default)
    Monitor,
    /// Print the pump status once
    Status,
    /// Start the pump
    Start,
    /// Stop the pump
    Stop,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = if cli.dev {
        PathBuf::from("config.toml")
    } else {
        cli.config.clone().unwrap_or_else(AppConfig::default_path)
    };

    match cli.command.as_ref().unwrap_or(&Command::Monitor) {
        Command::InitConfig { force } => init_config(&config_path, *force),
        Command::Monitor => {
            let (monitor, _log_guard) = prepare(&cli, &config_path)?;
            run_monitor(monitor).await
        }
        Command::Status => {
            let (monitor, _log_guard) = prepare(&cli, &config_path)?;
            let driver = monitor.connect().await?;
            let mut status = PumpStatus::default();
            let result = monitor.poll_once(&driver, &mut status).await;
            driver.teardown().await;
            result?;
            println!("{status}");
            Ok(())
        }
        Command::Start => {
            let (monitor, _log_guard) = prepare(&cli, &config_path)?;
            send_command(&monitor, true).await
        }
        Command::Stop => {
            let (monitor, _log_guard) = prepare(&cli, &config_path)?;
            send_command(&monitor, false).await
        }
    }
}

/// Load config, apply command line overrides and start logging.
fn prepare(cli: &Cli, config_path: &Path) -> anyhow::Result<(StatusMonitor, Option<WorkerGuard>)> {
    let (mut config, load_note) = match AppConfig::try_load(config_path) {
        ConfigLoadResult::Loaded(config) => (config, "loaded"),
        ConfigLoadResult::Missing => (AppConfig::default(), "missing, using defaults"),
        ConfigLoadResult::Invalid(e) => bail!("Config {} is invalid: {e}", config_path.display()),
    };
    if let Some(host) = &cli.host {
        config.bridge.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.bridge.port = port;
    }
    config.validate().context("Invalid bridge override")?;

    let log_guard = app::logging::init(&config.logging)?;
    tracing::info!("Varian Turbo starting...");
    tracing::info!("Config {:?}: {load_note}", config_path);

    Ok((StatusMonitor::new(config), log_guard))
}

/// Send start (`true`) or stop (`false`) and wait for the acknowledgment.
async fn send_command(monitor: &StatusMonitor, start: bool) -> anyhow::Result<()> {
    let driver = monitor.connect().await?;
    let result = if start { driver.start_pump().await } else { driver.stop_pump().await };
    driver.teardown().await;

    let name = if start { "Start" } else { "Stop" };
    result.with_context(|| format!("{name} command failed; re-query status to confirm pump state"))?;
    println!("{name} command acknowledged");
    Ok(())
}

/// Run the monitor until Enter or Ctrl-C.
async fn run_monitor(monitor: StatusMonitor) -> anyhow::Result<()> {
    let (tx, rx) = watch::channel(false);
    let (enter_tx, enter_rx) = oneshot::channel();

    // Plain thread: a pending stdin read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
            let _ = enter_tx.send(());
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            Ok(()) = enter_rx => {}
        }
        tracing::info!("Shutdown requested");
        let _ = tx.send(true);
    });

    monitor.run(rx).await?;
    Ok(())
}

/// Write the default config, refusing to clobber an existing file.
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default()
        .save(path)
        .with_context(|| format!("Writing {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
