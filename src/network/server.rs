use crate::chess::{RulesEngine, StandardChess};
use crate::messages::WireConfig;
use crate::network::cache::{DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL};
use crate::network::connection::Connection;
use crate::network::session::Orchestrator;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Server tuning that is not part of the request handling itself
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub wire: WireConfig,
    pub max_connections: usize,
    pub sweep_interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            wire: WireConfig::for_server(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

pub struct Server<E: RulesEngine = StandardChess> {
    listener: TcpListener,
    orchestrator: Arc<Orchestrator<E>>,
    settings: ServerSettings,
}

impl<E: RulesEngine> Server<E> {
    pub async fn bind(addr: &str, orchestrator: Arc<Orchestrator<E>>) -> Result<Self> {
        Self::bind_with_settings(addr, orchestrator, ServerSettings::default()).await
    }

    pub async fn bind_with_settings(
        addr: &str,
        orchestrator: Arc<Orchestrator<E>>,
        settings: ServerSettings,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind server to address: {}", addr))?;

        info!("Server bound to {}", listener.local_addr()?);
        debug!(
            max_frame_size = settings.wire.max_frame_size,
            max_connections = settings.max_connections,
            "Server settings"
        );

        Ok(Self {
            listener,
            orchestrator,
            settings,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<E>> {
        &self.orchestrator
    }

    /// Accept connections until the process ends
    pub async fn run(self) -> Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Accept connections until `shutdown` is cancelled. The idle sweep runs
    /// for as long as the accept loop does.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting server on {:?}", self.listener.local_addr()?);

        let sweeper = self.orchestrator.cache().clone().spawn_sweeper(
            self.orchestrator.storage().clone(),
            self.settings.sweep_interval,
            self.settings.idle_threshold,
            shutdown.child_token(),
        );

        let mut active_connections: HashMap<u64, JoinHandle<()>> = HashMap::new();
        let mut connection_counter = 0u64;

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            active_connections.retain(|id, handle| {
                if handle.is_finished() {
                    debug!("Cleaning up completed connection {}", id);
                    false
                } else {
                    true
                }
            });

            if active_connections.len() >= self.settings.max_connections {
                warn!(
                    "Connection limit reached ({}), rejecting connection from {}",
                    self.settings.max_connections, peer_addr
                );
                continue;
            }

            connection_counter += 1;
            let connection_id = connection_counter;
            info!("Accepted connection {} from {}", connection_id, peer_addr);

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Could not disable Nagle on connection {}: {}", connection_id, e);
            }

            let connection = Connection::new(
                stream,
                connection_id,
                Arc::clone(&self.orchestrator),
                self.settings.wire.clone(),
            );
            let handle = task::spawn(async move {
                match connection.run().await {
                    Ok(()) => info!("Connection {} completed", connection_id),
                    Err(e) => warn!("Connection {} ended with error: {}", connection_id, e),
                }
            });
            active_connections.insert(connection_id, handle);
        }

        info!(
            open_connections = active_connections.len(),
            "Server shutting down"
        );
        for (_, handle) in active_connections {
            handle.abort();
        }
        if let Err(e) = sweeper.await {
            warn!("Idle sweep task failed: {}", e);
        }
        Ok(())
    }
}
