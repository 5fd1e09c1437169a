use anyhow::{Context, Result};
use clap::Parser;
use gambit::cli::{play, Cli, Commands, KeyCommand, ServerConfig};
use gambit::crypto::storage::default_key_path;
use gambit::crypto::Identity;
use gambit::network::PlayerDetails;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn handle_key_command(command: KeyCommand) -> Result<()> {
    let key_path = default_key_path().context("Failed to determine key storage path")?;

    match command {
        KeyCommand::Path => {
            info!("Default key storage path: {}", key_path.display());
            if key_path.exists() {
                info!("Identity file exists");
            } else {
                info!("Identity file does not exist");
                info!("Run 'gambit key generate' to create a new identity");
            }
        }
        KeyCommand::Generate => {
            if key_path.exists() {
                warn!("An identity already exists at: {}", key_path.display());
                warn!("This will overwrite the existing identity!");
            }

            let identity = Identity::generate();
            identity.save(&key_path)?;

            info!("Identity generated successfully!");
            info!("Public Key: {}", identity.player_key());
            info!("Fingerprint: {}", identity.player_key().fingerprint());
            info!("Saved to: {}", key_path.display());
        }
        KeyCommand::Info => match Identity::load(&key_path) {
            Ok(identity) => {
                info!("Public Key: {}", identity.player_key());
                info!("Fingerprint: {}", identity.player_key().fingerprint());
                info!("Storage location: {}", key_path.display());
            }
            Err(e) => {
                error!("No identity found: {:#}", e);
                info!("Run 'gambit key generate' to create a new identity");
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Key { command } => handle_key_command(command)?,
        Commands::Serve {
            bind,
            config,
            database,
            engine,
        } => {
            let config_path = match config {
                Some(path) => path,
                None => ServerConfig::default_config_file()?,
            };
            let mut config = ServerConfig::load_or_create(&config_path)?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if database.is_some() {
                config.database_path = database;
            }
            if engine.is_some() {
                config.engine_path = engine;
            }

            let identity = gambit::cli::load_server_identity()?;
            gambit::cli::serve(config, identity).await?;
        }
        Commands::Connect {
            address,
            profile,
            first_name,
            last_name,
            rating,
        } => {
            let details = PlayerDetails {
                first_name,
                last_name,
                rating,
            };
            play::run(&address, profile, details).await?;
        }
    }

    Ok(())
}
