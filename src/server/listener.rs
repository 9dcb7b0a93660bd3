//! TCP listener for incoming client connections

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::session::ProxySession;
use crate::config::Config;
use crate::error::Result;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active sessions
    pub connections_active: AtomicU64,
}

/// TCP listener that accepts client connections and spawns one proxy
/// session per accepted socket.
pub struct Listener {
    listener: TcpListener,
    config: Arc<Config>,
    /// Per-run directory that session log files are created in
    capture_dir: PathBuf,
    stats: Arc<ListenerStats>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Listener {
    /// Bind to the configured listen address.
    pub async fn bind(
        config: Arc<Config>,
        capture_dir: PathBuf,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!("db proxy listening on {}", config.listen_addr);

        Ok(Self {
            listener,
            config,
            capture_dir,
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
        })
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to. Useful when binding
    /// to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop.
    ///
    /// A failed `accept` is fatal: the error is returned and the process is
    /// expected to exit. Sessions run to completion on their own tasks.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("accept failed: {}", e);
                            return Err(e.into());
                        }
                    };

                    debug!("accepted connection from {}", addr);
                    self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                    let config = Arc::clone(&self.config);
                    let capture_dir = self.capture_dir.clone();
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(async move {
                        let session = ProxySession::new(stream, addr, config, capture_dir);
                        if let Err(e) = session.handle().await {
                            warn!("session from {} ended with error: {}", addr, e);
                        }
                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                        debug!("connection from {} closed", addr);
                    });
                }

                _ = self.shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!(
            "listener stopped. accepted: {}, active: {}",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_active.load(Ordering::Relaxed)
        );

        Ok(())
    }
}
