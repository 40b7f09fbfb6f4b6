use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notify_relay::config::{Config, ConfigBridge};
use notify_relay::relay::{
    send_notification, ListenerLifecycle, LogSink, NotificationRequest, NotificationSink, Severity,
};

/// Notify Relay - local HTTP bridge for pushing status notifications
#[derive(Parser)]
#[command(name = "notify-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); defaults to the
    /// configured log_level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay daemon (default)
    Serve,
    /// Send a notification to a running relay
    Send {
        /// Notification text
        message: String,
        /// Severity kind (success, info, warning, error, fatalerror)
        #[arg(short, long, default_value = "info")]
        kind: String,
        /// Supplementary detail
        #[arg(short, long)]
        description: Option<String>,
        /// Relay port (defaults to the configured port)
        #[arg(long, env = "NOTIFY_RELAY_PORT")]
        port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = Config::config_path()?;

    // Peek at the configured log level first so the real load below runs
    // with logging already up and its warnings visible
    let peeked = Config::read_from(&config_path).unwrap_or_default();
    init_logging(peeked.log_level_or(cli.log_level.as_deref()));

    let config = Config::load_or_create(&config_path)?;

    match cli.command {
        Some(Commands::Send {
            message,
            kind,
            description,
            port,
        }) => handle_send(message, kind, description, port.unwrap_or(config.port)),
        Some(Commands::Serve) | None => run_serve(config_path, config),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_serve(config_path: PathBuf, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config_path, config))
}

async fn serve(config_path: PathBuf, config: Config) -> Result<()> {
    let bridge = ConfigBridge::new(config_path, config.port)?;
    let sink: Arc<dyn NotificationSink> = Arc::new(LogSink);

    let mut lifecycle = ListenerLifecycle::new(sink, bridge.subscribe());
    lifecycle.start().await;

    tokio::select! {
        _ = lifecycle.watch_config() => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    lifecycle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn handle_send(
    message: String,
    kind: String,
    description: Option<String>,
    port: u16,
) -> Result<()> {
    let Some(severity) = Severity::from_wire(&kind) else {
        anyhow::bail!("unknown kind '{kind}' (expected success, info, warning, error or fatalerror)");
    };

    let request = NotificationRequest {
        severity,
        message,
        description,
    };

    match send_notification(port, &request) {
        Ok(()) => {
            info!("Notification sent");
            Ok(())
        }
        Err(e) => {
            // No relay running is fine for a fire-and-forget ping
            eprintln!("Warning: failed to send notification: {e}");
            Ok(())
        }
    }
}
