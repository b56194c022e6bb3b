//! `ipfs-api-server` - serves the command tree over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ipfs_cli::logging::init_server_logging;
use ipfs_cli::run_daemon;
use ipfs_cmds_http::ServerConfig;
use ipfs_commands::Repo;
use ipfs_commands::repo::default_repo_path;
use tokio::signal;
use tracing::{error, info};

/// IPFS API Server
#[derive(Parser)]
#[command(name = "ipfs-api-server")]
#[command(about = "HTTP command API of the IPFS node")]
#[command(version)]
struct Args {
    /// Server configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Repository directory
    #[arg(long, env = "IPFS_PATH")]
    repo: Option<PathBuf>,

    /// Only serve read-only commands
    #[arg(long)]
    read_only: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_server_logging(&args.log_level, args.json_logs);

    let mut config = match &args.config {
        Some(path) => match ServerConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config from {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => match ServerConfig::from_env() {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config from environment: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let root = args.repo.unwrap_or_else(default_repo_path);
    let repo = match Repo::open(&root) {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            error!("Failed to open repository: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting IPFS API server on {}", config.listen_addr);
    info!("Repository: {}", root.display());
    let shutdown_timeout = config.shutdown_timeout;

    let shutdown = async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    term.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown (timeout: {}s)...", shutdown_timeout);
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown (timeout: {}s)...", shutdown_timeout);
            }
        }
    };

    if let Err(e) = run_daemon(repo, config, args.read_only, shutdown).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}
