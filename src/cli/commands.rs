use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gambit")]
#[command(about = "A networked two-player chess server and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Key management commands
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
    /// Run the game server
    ///
    /// Settings come from the configuration file (created with defaults on
    /// first run). Flags given here override the file.
    ///
    /// Examples:
    ///   gambit serve
    ///   gambit serve --bind 0.0.0.0:7878 --engine /usr/bin/stockfish
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<String>,
        /// Configuration file to use instead of the default one
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// SQLite database file
        #[arg(long)]
        database: Option<PathBuf>,
        /// UCI engine used for solo games
        #[arg(long)]
        engine: Option<PathBuf>,
    },
    /// Connect to a server and play from the terminal
    ///
    /// The first run creates a profile holding a new identity; later runs
    /// reuse it and check that the server key has not changed.
    ///
    /// Examples:
    ///   gambit connect 127.0.0.1:7878 --first-name Ada --last-name Lovelace
    Connect {
        /// Server address
        address: String,
        /// Profile file to use instead of the default one
        #[arg(short, long)]
        profile: Option<PathBuf>,
        /// First name for a new profile
        #[arg(long, default_value = "Anonymous")]
        first_name: String,
        /// Last name for a new profile
        #[arg(long, default_value = "Player")]
        last_name: String,
        /// Rating for a new profile
        #[arg(long, default_value_t = 1500)]
        rating: i64,
    },
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Show the default key storage path
    Path,
    /// Generate a new server identity (overwrites existing)
    Generate,
    /// Show current identity info
    Info,
}
