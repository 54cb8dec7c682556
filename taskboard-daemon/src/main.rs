//! Taskboard Daemon - local change-event broadcaster
//!
//! Runs as a background service, fanning out "something changed" events to
//! every taskboard UI on this machine over a Unix socket. The same binary
//! doubles as a small client for scripting and debugging.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskboard_daemon::{DaemonConfig, NotificationState};
use taskboard_events::{
    status_notifier, CancellationToken, Event, EventClient, EventServer, EventType,
};
use taskboard_metrics::Metrics;

#[derive(Parser)]
#[command(name = "taskboard-daemon", version, about = "Local change-event daemon for taskboard")]
struct Cli {
    /// Config file (default: <config dir>/taskboard/daemon.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Event socket path (overrides TASKBOARD_SOCKET and the config file)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the event daemon (default)
    Serve,

    /// Send one change event
    Notify {
        #[arg(long)]
        project: i64,

        #[arg(long, default_value = "database_changed")]
        kind: EventType,
    },

    /// Print events and connection changes until Ctrl-C
    Watch {
        /// Project to follow (0 = every project)
        #[arg(long, default_value_t = 0)]
        project: i64,
    },

    /// Print the daemon's metrics as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_logging(&config.log_level);

    let socket = config
        .resolve_socket_path(cli.socket.clone())
        .context("Failed to resolve event socket path")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, socket).await,
        Command::Notify { project, kind } => notify(&config, socket, project, kind).await,
        Command::Watch { project } => watch(&config, socket, project).await,
        Command::Status => status(&config, socket).await,
    }
}

/// RUST_LOG wins over the config file's level
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(config: &DaemonConfig, socket: PathBuf) -> Result<()> {
    info!("🗂️ Starting taskboard daemon v{}", env!("CARGO_PKG_VERSION"));
    if !config.config_path.as_os_str().is_empty() {
        info!("📋 Configuration loaded from {}", config.config_path.display());
    }

    let queue = config.queue_config();
    let server = Arc::new(
        EventServer::new(&socket, queue).context("Failed to start event server")?,
    );
    info!("🔌 Event socket: {}", socket.display());
    info!(
        "  - Queues: broadcast {}, per client {}",
        queue.broadcast_buffer, queue.client_buffer
    );

    let cancel = CancellationToken::new();
    let mut server_task = tokio::spawn(Arc::clone(&server).start(cancel.clone()));

    if let Some(period) = config.metrics_log_interval() {
        tokio::spawn(log_metrics(server.metrics(), period, cancel.clone()));
    }

    info!("🚀 Taskboard daemon ready!");

    let finished = tokio::select! {
        result = &mut server_task => Some(result),
        _ = shutdown_signal() => {
            info!("🛑 Received shutdown signal");
            None
        }
    };

    info!("🧹 Shutting down...");
    cancel.cancel();
    let result = match finished {
        Some(result) => result,
        None => server_task.await,
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Event server error: {}", e);
            return Err(e).context("Event server failed");
        }
        Err(e) => anyhow::bail!("Event server task failed: {}", e),
    }

    log_snapshot(&server.metrics());
    info!("👋 Taskboard daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("⚠️ Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn log_metrics(metrics: Arc<Metrics>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => log_snapshot(&metrics),
        }
    }
}

fn log_snapshot(metrics: &Metrics) {
    let snapshot = metrics.snapshot();
    info!(
        "📊 clients={} sent={} received={} uptime={} memory={} MB",
        snapshot.connected_clients,
        snapshot.events_sent,
        snapshot.events_received,
        snapshot.uptime,
        get_memory_usage_mb()
    );
}

/// Get current process memory usage in MB
fn get_memory_usage_mb() -> u64 {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);

    sys.process(pid)
        .map(|process| process.memory() / 1_048_576)
        .unwrap_or(0)
}

async fn connect(config: &DaemonConfig, socket: PathBuf) -> Result<EventClient> {
    let client = EventClient::with_config(&socket, config.client_config());
    client
        .connect()
        .await
        .with_context(|| format!("Is the daemon running? Could not connect to {}", socket.display()))?;
    Ok(client)
}

async fn notify(config: &DaemonConfig, socket: PathBuf, project: i64, kind: EventType) -> Result<()> {
    let client = connect(config, socket).await?;
    client
        .send_event(Event::new(kind, project))
        .await
        .context("Failed to send event")?;
    client.close().await?;

    println!("Sent {} for project {}", kind, project);
    Ok(())
}

async fn watch(config: &DaemonConfig, socket: PathBuf, project: i64) -> Result<()> {
    let notifications = Arc::new(NotificationState::new());
    let client = EventClient::with_config(&socket, config.client_config());
    client.set_notify_func(status_notifier(Arc::clone(&notifications)));

    client
        .connect()
        .await
        .with_context(|| format!("Could not connect to {}", socket.display()))?;
    client.subscribe(project).await.context("Failed to subscribe")?;

    let cancel = CancellationToken::new();
    let mut events = client.listen(cancel.clone()).await?;
    println!("Watching project {} (Ctrl-C to stop)", project);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = events.recv() => match next {
                Some(event) => println!(
                    "{} #{} {} project={}",
                    event.timestamp.to_rfc3339(),
                    event.sequence_id,
                    event.kind,
                    event.project_id
                ),
                None => break,
            },
            _ = notifications.changed() => {}
        }

        print_notifications(&notifications);
    }

    cancel.cancel();
    client.close().await?;
    print_notifications(&notifications);
    Ok(())
}

fn print_notifications(notifications: &NotificationState) {
    for notification in notifications.drain() {
        println!("[{}] {}", notification.level, notification.message);
    }
}

async fn status(config: &DaemonConfig, socket: PathBuf) -> Result<()> {
    let client = connect(config, socket).await?;
    let snapshot = client
        .request_status()
        .await
        .context("Daemon did not answer the status request")?;
    client.close().await?;

    println!("{}", snapshot.to_json_pretty()?);
    Ok(())
}
