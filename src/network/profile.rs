use crate::crypto::storage::{data_dir, load_key_secure, save_key_secure};
use crate::crypto::{Identity, IdentityData, PlayerKey};
use crate::storage::PlayerColor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Number of final positions kept in the profile
pub const HISTORY_LIMIT: usize = 10;

/// Name and rating sent with every login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDetails {
    pub first_name: String,
    pub last_name: String,
    #[serde(default = "default_rating")]
    pub rating: i64,
}

fn default_rating() -> i64 {
    1500
}

/// Everything a client remembers between runs. Stored as TOML with
/// owner-only permissions since it carries the secret key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientProfile {
    /// Server identity learned on first login
    #[serde(default)]
    pub server_key: Option<String>,
    #[serde(default)]
    pub in_game: bool,
    /// Whether that game is against the automated opponent
    #[serde(default)]
    pub solo: bool,
    /// Side played in that game, when known
    #[serde(default)]
    pub color: Option<PlayerColor>,
    /// Final positions of the most recent games, oldest first
    #[serde(default)]
    pub history: Vec<String>,
    pub player: PlayerDetails,
    pub identity: IdentityData,
}

impl ClientProfile {
    pub fn new(player: PlayerDetails, identity: &Identity) -> Self {
        Self {
            server_key: None,
            in_game: false,
            solo: false,
            color: None,
            history: Vec::new(),
            player,
            identity: identity.to_data(),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(data_dir()?.join("profile.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = load_key_secure(path)?;
        let text = String::from_utf8(bytes).context("Profile is not valid UTF-8")?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse profile at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("Failed to serialize profile")?;
        save_key_secure(path, text.as_bytes())
    }

    /// Load the profile at `path`, or create one with a fresh identity
    pub fn load_or_create(path: &Path, player: PlayerDetails) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let profile = Self::new(player, &Identity::generate());
        profile.save(path)?;
        debug!("Created new profile at {}", path.display());
        Ok(profile)
    }

    pub fn identity(&self) -> Result<Identity> {
        Identity::from_data(&self.identity)
    }

    pub fn known_server_key(&self) -> Result<Option<PlayerKey>> {
        self.server_key
            .as_deref()
            .map(PlayerKey::parse)
            .transpose()
            .context("Stored server key is invalid")
    }

    /// Forget the game in progress
    pub fn clear_game(&mut self) {
        self.in_game = false;
        self.solo = false;
        self.color = None;
    }

    pub fn record_final_position(&mut self, fen: &str) {
        self.clear_game();
        self.history.push(fen.to_string());
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}

/// A profile shared between the client driver and its listener task,
/// written back to disk after each change when it has a path.
pub struct ProfileStore {
    path: Option<PathBuf>,
    profile: Mutex<ClientProfile>,
}

impl ProfileStore {
    pub fn new(profile: ClientProfile, path: Option<PathBuf>) -> Self {
        Self {
            path,
            profile: Mutex::new(profile),
        }
    }

    pub fn snapshot(&self) -> ClientProfile {
        self.profile
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Apply `change` and persist. Save failures are logged, the in-memory
    /// profile keeps the change.
    pub fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut ClientProfile),
    {
        let snapshot = {
            let mut profile = self
                .profile
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            change(&mut profile);
            profile.clone()
        };

        if let Some(path) = &self.path {
            if let Err(e) = snapshot.save(path) {
                warn!("Failed to save profile to {}: {:#}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn details() -> PlayerDetails {
        PlayerDetails {
            first_name: "Judit".to_string(),
            last_name: "Polgar".to_string(),
            rating: 2700,
        }
    }

    #[test]
    fn test_profile_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.toml");

        let created = ClientProfile::load_or_create(&path, details()).unwrap();
        let loaded = ClientProfile::load_or_create(&path, details()).unwrap();
        assert_eq!(loaded.identity, created.identity);
        assert_eq!(loaded.player, details());
        assert_eq!(
            loaded.identity().unwrap().player_key(),
            created.identity().unwrap().player_key()
        );
    }

    #[test]
    fn test_history_keeps_most_recent_positions() {
        let mut profile = ClientProfile::new(details(), &Identity::generate());
        profile.in_game = true;
        for n in 0..15 {
            profile.record_final_position(&format!("fen-{}", n));
        }
        assert!(!profile.in_game);
        assert_eq!(profile.history.len(), HISTORY_LIMIT);
        assert_eq!(profile.history.first().map(String::as_str), Some("fen-5"));
        assert_eq!(profile.history.last().map(String::as_str), Some("fen-14"));
    }

    #[test]
    fn test_game_state_survives_a_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.toml");
        let mut profile = ClientProfile::new(details(), &Identity::generate());
        profile.in_game = true;
        profile.color = Some(PlayerColor::Black);
        profile.save(&path).unwrap();

        let mut reloaded = ClientProfile::load(&path).unwrap();
        assert!(reloaded.in_game);
        assert_eq!(reloaded.color, Some(PlayerColor::Black));

        reloaded.clear_game();
        assert!(!reloaded.in_game);
        assert_eq!(reloaded.color, None);
        assert!(reloaded.history.is_empty());
    }

    #[test]
    fn test_store_persists_updates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.toml");
        let server = Identity::generate();
        let store = ProfileStore::new(
            ClientProfile::new(details(), &Identity::generate()),
            Some(path.clone()),
        );

        store.update(|profile| profile.server_key = Some(server.player_key().encoded()));

        let reloaded = ClientProfile::load(&path).unwrap();
        assert_eq!(
            reloaded.known_server_key().unwrap(),
            Some(*server.player_key())
        );
        assert_eq!(store.snapshot().server_key, reloaded.server_key);
    }
}
