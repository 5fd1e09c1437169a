use crate::chess::{AutomatedOpponent, GreedyOpponent, StandardChess, UciEngine};
use crate::crypto::storage::data_dir;
use crate::crypto::{default_key_path, Identity};
use crate::messages::wire::MAX_FRAME_SIZE;
use crate::messages::WireConfig;
use crate::network::server::DEFAULT_MAX_CONNECTIONS;
use crate::network::{Orchestrator, Server, ServerSettings};
use crate::storage::actor::DEFAULT_QUEUE_DEPTH;
use crate::storage::{get_database_path, spawn_actor, Database};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONFIG_FILE: &str = "server.toml";

/// Server configuration, stored as TOML in the data directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server listens on
    pub bind_addr: String,
    /// SQLite database file. Defaults to the data directory.
    pub database_path: Option<PathBuf>,
    /// Seconds between idle-game sweeps
    pub sweep_interval_secs: u64,
    /// Seconds without a move after which a cached game is evicted
    pub idle_threshold_secs: u64,
    /// UCI engine for solo games. The built-in opponent is used without one.
    pub engine_path: Option<PathBuf>,
    /// Thinking time granted to the automated opponent per move
    pub think_time_ms: u64,
    pub max_connections: usize,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7878".to_string(),
            database_path: None,
            sweep_interval_secs: 60,
            idle_threshold_secs: 600,
            engine_path: None,
            think_time_ms: 1000,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn default_config_file() -> Result<PathBuf> {
        Ok(data_dir()?.join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse configuration file")
    }

    /// Load configuration from `path`, writing the defaults there first if
    /// the file does not exist yet
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content).context("Failed to write configuration file")?;
        Ok(())
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_database_path()?),
        }
    }

    pub fn settings(&self) -> ServerSettings {
        ServerSettings {
            wire: WireConfig::new(self.max_frame_size, WireConfig::for_server().outbound_queue),
            max_connections: self.max_connections,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
        }
    }

    pub fn opponent(&self) -> Arc<dyn AutomatedOpponent> {
        match &self.engine_path {
            Some(path) => {
                if !path.exists() {
                    warn!(
                        "Engine {} not found, solo games will use the built-in opponent",
                        path.display()
                    );
                }
                Arc::new(UciEngine::new(path.clone()))
            }
            None => Arc::new(GreedyOpponent),
        }
    }
}

/// Server identity from the default key location, created on first start
pub fn load_server_identity() -> Result<Identity> {
    let path = default_key_path()?;
    let identity = Identity::load_or_generate(&path)
        .with_context(|| format!("Failed to initialize identity at {}", path.display()))?;
    info!(
        "Server identity {} ({})",
        identity.player_key(),
        identity.player_key().fingerprint()
    );
    Ok(identity)
}

/// Start storage, bind the listener and serve until Ctrl-C
pub async fn serve(config: ServerConfig, identity: Identity) -> Result<()> {
    let database_path = config.database_path()?;
    let database = Database::open(&database_path)
        .with_context(|| format!("Failed to open database {}", database_path.display()))?;
    info!("Using database {}", database_path.display());

    let (storage, storage_task) = spawn_actor(database, DEFAULT_QUEUE_DEPTH);
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(identity), storage, StandardChess, config.opponent())
            .with_think_time(Duration::from_millis(config.think_time_ms)),
    );

    let server =
        Server::bind_with_settings(&config.bind_addr, orchestrator, config.settings()).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    server.run_until(shutdown).await?;

    // Dropping the server releases the last storage handles
    if tokio::time::timeout(Duration::from_secs(5), storage_task)
        .await
        .is_err()
    {
        warn!("Storage actor did not stop in time");
    }
    Ok(())
}
