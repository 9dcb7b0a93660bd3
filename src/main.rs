//! mysqltap - transparent MySQL query-recording proxy
//!
//! This binary accepts MySQL client connections, relays them to the real
//! upstream server, and records every reconstructed query to per-connection
//! log files under a timestamped capture directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use mysqltap::{Config, Listener};

#[derive(Parser)]
#[command(name = "mysqltap")]
#[command(version = "0.1.0")]
#[command(about = "Transparent MySQL proxy that records reconstructed SQL per connection")]
struct Cli {
    /// Upstream MySQL server, host:port
    #[arg(long)]
    remote_db: Option<String>,

    /// Listen address; a bare `:port` binds all interfaces
    #[arg(long, default_value = ":5306")]
    listen_port: String,

    /// Base directory for capture directories (defaults to the current dir)
    #[arg(long)]
    file_path: Option<PathBuf>,

    /// Log level: DEBUG, INFO, WARN, ERROR or FATAL
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::new(cli.remote_db, cli.listen_port, cli.file_path, cli.log_level);

    // subscriber first, so even the fatal config path is logged properly
    let filter = config
        .as_ref()
        .map(|c| c.tracing_filter())
        .unwrap_or("info");
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match config {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("remote db: {}", config.remote_db);

    // one capture directory per run, named by the start time
    let dir_name = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
    let capture_dir = config.base_path.join(dir_name);
    if let Err(e) = std::fs::create_dir_all(&capture_dir) {
        error!("create capture dir {}: {}", capture_dir.display(), e);
        std::process::exit(1);
    }
    info!("create log path success: {}", capture_dir.display());

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let listener = match Listener::bind(Arc::clone(&config), capture_dir, shutdown_rx).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    let stats = listener.stats();

    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("listener error: {}", e);
            // a failed accept is fatal
            std::process::exit(1);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = listener_handle.await;

    info!(
        "shutdown complete. total connections handled: {}",
        stats
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed)
    );
}
