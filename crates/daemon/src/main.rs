//! agentmux daemon
//!
//! Long-lived owner of the agent panes' terminals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::ipc::pidfile::{get_daemon_pid, remove_pid_file, write_pid_file};
use daemon::ipc::{serve, IpcClient, IpcError, IpcServer};
use daemon::orchestrator::DaemonOrchestrator;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// agentmux daemon - supervises the terminals of a multi-agent workspace.
#[derive(Parser, Debug)]
#[command(name = "agentmux-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to `start`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the daemon in the foreground
    Start {
        /// Log to stderr only, without writing the daemon log file
        #[arg(long)]
        foreground_only: bool,
    },

    /// Stop the running daemon
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Show daemon status
    Status,

    /// Check that the daemon answers
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    let command = cli.command.clone().unwrap_or(Commands::Start {
        foreground_only: false,
    });
    let log_file = match command {
        Commands::Start {
            foreground_only: false,
        } => Some(config.log_file_path()),
        _ => None,
    };
    let _guard = init_logging(&cli, &config, log_file.as_deref())?;

    if let Some(path) = &cli.config {
        tracing::debug!(path = %path.display(), "Using config file");
    }

    match command {
        Commands::Start { .. } => run_daemon(config).await,
        Commands::Stop { force, timeout } => {
            let result = if force {
                force_stop_daemon(&config)
            } else {
                graceful_stop_daemon(&config, timeout).await
            };
            match result {
                Ok(()) => {
                    println!("Daemon stopped");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Failed to stop daemon: {:#}", e);
                    if !force {
                        eprintln!("Try: agentmux-daemon stop --force");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => match print_status(&config).await {
            Ok(()) => Ok(()),
            Err(e) => {
                eprintln!("Daemon is not running: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Ping => {
            let mut client = IpcClient::connect(&config.socket_path())
                .await
                .context("Daemon is not running (cannot connect to socket)")?;
            let uptime_ms = client.ping().await?;
            println!("pong (uptime {})", format_duration(uptime_ms / 1000));
            Ok(())
        }
    }
}

/// Stderr logging, plus the append-only daemon log when `log_file` is set.
///
/// Level: `--verbose`, else `RUST_LOG`, else the configured `log_level`.
fn init_logging(cli: &Cli, config: &Config, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level))
        }
    };

    let stderr = fmt::layer().with_writer(std::io::stderr).with_filter(filter());

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(stderr).init();
        return Ok(None);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "daemon.log".to_string());
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(filter());

    tracing_subscriber::registry().with(stderr).with(file).init();
    Ok(Some(guard))
}

/// Runs the daemon until a shutdown action or SIGTERM/SIGINT.
async fn run_daemon(config: Config) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let socket_path = config.socket_path();
    let pid_path = config.pid_file_path();
    let grace = Duration::from_millis(config.daemon.shutdown_grace_ms);

    let server = match IpcServer::bind(&socket_path).await {
        Ok(server) => server,
        Err(IpcError::AlreadyRunning(path)) => {
            let pid = get_daemon_pid(&pid_path)
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            eprintln!("Error: Daemon already running on {} (PID: {})", path.display(), pid);
            eprintln!();
            eprintln!("To stop the existing daemon, run:");
            eprintln!("  agentmux-daemon stop");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to bind control socket {}", socket_path.display()));
        }
    };

    write_pid_file(&pid_path)?;
    tracing::info!(
        pid = std::process::id(),
        socket = %socket_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "agentmux daemon starting"
    );

    let orchestrator = DaemonOrchestrator::new(config)?;
    let handles = orchestrator.handles();
    let server_task = tokio::spawn(serve(
        server,
        handles.hub.clone(),
        handles.clients.clone(),
        handles.server_stop.clone(),
    ));
    let daemon_task = tokio::spawn(orchestrator.run());

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
        _ = handles.shutdown.cancelled() => {}
    }
    handles.shutdown.cancel();

    let teardown = async {
        let result = daemon_task.await;
        let _ = server_task.await;
        result
    };
    let outcome = tokio::time::timeout(grace, teardown).await;
    remove_pid_file(&pid_path);

    match outcome {
        Ok(Ok(result)) => {
            tracing::info!("Daemon stopped");
            result
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("Event loop task failed: {}", e)),
        Err(_) => {
            tracing::error!(grace_ms = grace.as_millis() as u64, "Shutdown overran its grace period");
            let _ = std::fs::remove_file(&socket_path);
            std::process::exit(2);
        }
    }
}

/// Gracefully stop the daemon via IPC.
///
/// Sends a `shutdown` action and waits for the socket to disappear.
async fn graceful_stop_daemon(config: &Config, timeout_secs: u64) -> anyhow::Result<()> {
    let socket_path = config.socket_path();

    let mut client = IpcClient::connect_with_timeout(&socket_path, Duration::from_secs(5))
        .await
        .map_err(|_| anyhow::anyhow!("Daemon is not running (cannot connect to socket)"))?;

    println!("Sending shutdown request...");
    client.set_timeout(Duration::from_secs(timeout_secs));
    let message = client
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send shutdown request: {}", e))?;
    println!("Daemon acknowledged: {}", message);

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }
        if IpcClient::connect_with_timeout(&socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Err(anyhow::anyhow!(
        "Timeout waiting for daemon to exit ({}s)",
        timeout_secs
    ))
}

/// Force stop the daemon using SIGKILL.
///
/// Reads the daemon PID from the PID file and sends SIGKILL.
fn force_stop_daemon(config: &Config) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid_path = config.pid_file_path();
    let pid = get_daemon_pid(&pid_path)
        .ok_or_else(|| anyhow::anyhow!("No running daemon found in {}", pid_path.display()))?;
    let raw = i32::try_from(pid).map_err(|_| anyhow::anyhow!("Invalid PID in file: {}", pid))?;

    kill(Pid::from_raw(raw), Signal::SIGKILL)
        .map_err(|e| anyhow::anyhow!("Failed to kill daemon (PID {}): {}", pid, e))?;
    println!("Sent SIGKILL to daemon (PID {})", pid);

    let _ = std::fs::remove_file(&pid_path);
    let _ = std::fs::remove_file(config.socket_path());
    Ok(())
}

async fn print_status(config: &Config) -> anyhow::Result<()> {
    let mut client = IpcClient::connect(&config.socket_path()).await?;
    let health = client.health().await?;
    let heartbeat = client.heartbeat_status().await?;

    println!("Daemon Status: running");
    println!("  PID:       {}", health.pid);
    println!("  Version:   {}", health.version);
    println!("  Uptime:    {}", format_duration(health.uptime_secs));
    println!(
        "  Terminals: {} ({} alive, {} dry-run)",
        health.terminals, health.alive, health.dry_run
    );
    println!("  Clients:   {}", health.clients);
    if !health.backpressured_clients.is_empty() {
        println!("  Lagging:   {:?}", health.backpressured_clients);
    }
    println!(
        "  Watchdog:  {}",
        if heartbeat.enabled {
            format!("{:?} (lead pane {})", heartbeat.state, heartbeat.lead_pane).to_lowercase()
        } else {
            "disabled".to_string()
        }
    );

    for terminal in client.list().await? {
        println!(
            "  [{}] pid {} {} {}",
            terminal.pane_id,
            terminal.pid,
            if terminal.alive { "alive" } else { "dead" },
            terminal.cwd
        );
    }
    Ok(())
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
