//! ragchat CLI, the main entry point.
//!
//! Commands:
//! - `ingest`: build the passage index from the knowledge base
//! - `chat`: interactive session in the terminal
//! - `health`: check a running server (or this process) and exit with its status
//! - `web`: start the HTTP/WebSocket gateway

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ragchat_config::AppConfig;
use tracing::{debug, info};

mod commands;
#[cfg(test)]
mod test_support;

#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "ragchat: answers questions about your documents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Also write logs to this file (overrides `log_file` in config)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Config file to use instead of ~/.ragchat/config.toml
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process documents in the knowledge base and write the passage index
    Ingest,

    /// Start an interactive chat session
    Chat,

    /// Check service health; exit 0 healthy, 1 degraded, 2 unhealthy, 3 check failed
    Health {
        /// Base URL of a running `ragchat web` server
        #[arg(long)]
        url: Option<String>,

        /// Check this process instead of a server
        #[arg(long, conflicts_with = "url")]
        local: bool,

        /// Webhook to notify when the service is unhealthy
        #[arg(long, value_name = "URL")]
        alert_webhook: Option<String>,
    },

    /// Start the web gateway
    Web {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;

    let log_file = cli.log_file.as_deref().or(config.log_file.as_deref());
    init_logging(cli.debug, log_file)?;

    info!(app = %config.app_name, version = env!("CARGO_PKG_VERSION"), "Starting");
    debug!(debug = cli.debug, "Debug mode");

    match cli.command {
        Commands::Ingest => commands::ingest::run(&config).await?,
        Commands::Chat => commands::chat::run(&config).await?,
        Commands::Health {
            url,
            local,
            alert_webhook,
        } => return Ok(commands::health::run(&config, url, local, alert_webhook).await),
        Commands::Web { host, port } => commands::web::run(&config, host, port).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Console logs go to stderr so they never interleave with chat output.
/// A log file, when given, gets a second ANSI-free layer with targets kept
/// so `audit` events stand out.
fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Cannot open log file {}: {e}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}
