pub mod app;
pub mod commands;
pub mod play;

pub use app::{load_server_identity, serve, ServerConfig};
pub use commands::{Cli, Commands, KeyCommand};
