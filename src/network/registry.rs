use crate::crypto::PlayerKey;
use crate::messages::Tlv;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Player {0} has no live connection")]
    NotConnected(String),

    #[error("Connection for player {0} is closing")]
    ConnectionClosed(String),

    #[error("Outbound queue for player {0} is full")]
    QueueFull(String),
}

struct Registration {
    connection_id: u64,
    outbound: mpsc::Sender<Tlv>,
}

/// Live connections indexed by the public key that logged in on them.
///
/// Each entry holds the sending half of the connection's writer queue, so a
/// push for a player lands on whichever connection that player last logged in
/// from.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<PlayerKey, Registration>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PlayerKey, Registration>> {
        // A poisoned map is still structurally valid
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `outbound` for `player`, replacing any older connection.
    /// Returns the id of the connection that was replaced.
    pub fn register(
        &self,
        player: PlayerKey,
        connection_id: u64,
        outbound: mpsc::Sender<Tlv>,
    ) -> Option<u64> {
        let previous = self.lock().insert(
            player,
            Registration {
                connection_id,
                outbound,
            },
        );
        debug!(
            player = %player.fingerprint(),
            connection_id,
            "Registered connection"
        );
        previous.map(|entry| entry.connection_id)
    }

    /// Remove the entry for `player` if it still belongs to `connection_id`.
    /// A newer login from another connection is left in place.
    pub fn unregister(&self, player: &PlayerKey, connection_id: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(player) {
            Some(entry) if entry.connection_id == connection_id => {
                entries.remove(player);
                debug!(player = %player.fingerprint(), connection_id, "Unregistered connection");
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, player: &PlayerKey) -> bool {
        self.lock().contains_key(player)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queue a frame on the player's connection without waiting. A full queue
    /// is a failed delivery, so a slow reader never stalls the sender.
    pub fn deliver(&self, player: &PlayerKey, frame: Tlv) -> Result<(), DeliveryError> {
        let outbound = self
            .lock()
            .get(player)
            .map(|entry| entry.outbound.clone())
            .ok_or_else(|| DeliveryError::NotConnected(player.fingerprint()))?;

        outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(player.fingerprint()),
            mpsc::error::TrySendError::Closed(_) => {
                DeliveryError::ConnectionClosed(player.fingerprint())
            }
        })
    }
}
