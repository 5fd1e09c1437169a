//! Line-based terminal client.

use crate::crypto::Identity;
use crate::network::{
    Client, ClientError, ClientEvent, ClientProfile, MoveOutcome, PlayerDetails, ProfileStore,
};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

const HELP: &str = "\
Commands:
  games          list games waiting for an opponent
  host           host a game and wait for someone to join
  solo           play against the computer
  join <id>      join an open game as black
  move <move>    play a move (SAN or UCI, e.g. Nf3 or g1f3)
  moves          list your legal moves
  help           show this help
  quit           leave";

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Games,
    Host,
    Solo,
    Join(String),
    Move(String),
    Moves,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Err("empty command".to_string());
        };
        let arg = parts.next();

        match (word.to_ascii_lowercase().as_str(), arg) {
            ("games" | "list", _) => Ok(Command::Games),
            ("host", _) => Ok(Command::Host),
            ("solo", _) => Ok(Command::Solo),
            ("join", Some(id)) => Ok(Command::Join(id.to_string())),
            ("join", None) => Err("usage: join <game id>".to_string()),
            ("move" | "m", Some(mv)) => Ok(Command::Move(mv.to_string())),
            ("move" | "m", None) => Err("usage: move <move>".to_string()),
            ("moves", _) => Ok(Command::Moves),
            ("help" | "?", _) => Ok(Command::Help),
            ("quit" | "exit", _) => Ok(Command::Quit),
            (other, _) => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

/// Load (or create) the profile, log in, and run the command loop on stdin
pub async fn run(address: &str, profile_path: Option<PathBuf>, details: PlayerDetails) -> Result<()> {
    let path = match profile_path {
        Some(path) => path,
        None => ClientProfile::default_path()?,
    };
    let profile = ClientProfile::load_or_create(&path, details)
        .with_context(|| format!("Failed to load profile {}", path.display()))?;
    let identity = Arc::new(profile.identity()?);
    let player = profile.player.clone();
    let resume = profile.in_game.then_some((profile.solo, profile.color));
    let store = Arc::new(ProfileStore::new(profile, Some(path)));

    let mut client = Client::connect(address, identity.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", address))?
        .with_profile(store);
    let server_key = client.login(&player).await?;
    println!("Logged in as {} {} ({})", player.first_name, player.last_name, fingerprint(&identity));
    println!("Server {}", server_key.fingerprint());
    if let Some((solo, color)) = resume {
        if client.resume_game(solo, color).await? {
            info!(solo, "Resuming the game from the last session");
            println!("Resuming your unfinished game. Use 'move' or 'moves'.");
        } else {
            println!("Your last game ended while you were away.");
        }
    }

    if let Some(mut events) = client.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&event);
            }
        });
    }

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match execute(&mut client, command).await {
            Ok(()) => {}
            Err(ClientError::Disconnected) => {
                println!("Server closed the connection");
                break;
            }
            Err(e) => println!("{}", e),
        }
    }

    client.close().await?;
    println!("Goodbye");
    Ok(())
}

async fn execute(client: &mut Client<TcpStream>, command: Command) -> Result<(), ClientError> {
    debug!(?command, "Executing command");
    match command {
        Command::Games => {
            let games = client.list_open_games().await?;
            if games.is_empty() {
                println!("No open games. Use 'host' to start one.");
            }
            for id in games {
                println!("  {}", id);
            }
        }
        Command::Host => {
            let id = client.host_game().await?;
            println!("Hosting game {} as white. Share the id; you move first.", id);
        }
        Command::Solo => {
            let id = client.join_solo().await?;
            println!("Solo game {} started. You play white.", id);
        }
        Command::Join(id) => {
            let id = client.join_game(&id).await?;
            println!("Joined game {} as black. Waiting for white...", id);
        }
        Command::Move(mv) => match client.play_move(&mv).await? {
            MoveOutcome::Accepted => println!("Move accepted. Waiting for your opponent..."),
            MoveOutcome::OpponentMoved(notice) => {
                println!("Opponent played {}", notice.san);
                println!("Position: {}", notice.fen);
            }
            MoveOutcome::GameOver(notice) => {
                println!("Game over: {}", notice.result);
                println!("Final position: {}", notice.fen);
            }
        },
        Command::Moves => {
            let moves = client.list_legal_moves().await?;
            println!("{} legal moves: {}", moves.len(), moves.join(" "));
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::OpponentMoved(notice) => {
            println!("\nOpponent played {}", notice.san);
            println!("Position: {}", notice.fen);
        }
        ClientEvent::GameOver(notice) => {
            println!("\nGame over: {}", notice.result);
            println!("Final position: {}", notice.fen);
        }
        ClientEvent::Disconnected => println!("\nDisconnected from server"),
    }
}

fn fingerprint(identity: &Identity) -> String {
    identity.player_key().fingerprint()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("games"), Ok(Command::Games));
        assert_eq!(Command::parse("  MOVE  Nf3 "), Ok(Command::Move("Nf3".to_string())));
        assert_eq!(Command::parse("m e2e4"), Ok(Command::Move("e2e4".to_string())));
        assert_eq!(
            Command::parse("join 0f8fad5b-d9cb-469f-a165-70867728950e"),
            Ok(Command::Join("0f8fad5b-d9cb-469f-a165-70867728950e".to_string()))
        );
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("join").is_err());
        assert!(Command::parse("move").is_err());
        assert!(Command::parse("castle").unwrap_err().contains("unknown command"));
    }
}
