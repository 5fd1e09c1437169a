//! In-memory cache of live game states.
//!
//! Entries are only ever created from a state that was just loaded from (or
//! written to) storage. They are evicted when a game ends and by the idle
//! sweep, which compares the durable last-move time with the staleness
//! threshold. The durable record is never touched by eviction.

use crate::storage::database::current_timestamp_millis;
use crate::storage::StorageHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct CachedGame<S> {
    pub state: S,
    pub last_move_time: i64,
}

pub struct GameCache<S> {
    entries: Mutex<HashMap<String, CachedGame<S>>>,
}

impl<S> Default for GameCache<S> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Clone> GameCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedGame<S>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A copy of the cached state. Callers work on the copy and write it back
    /// with [`GameCache::insert`] once the change is persisted.
    pub fn get(&self, game_id: &str) -> Option<CachedGame<S>> {
        self.lock().get(game_id).cloned()
    }

    pub fn insert(&self, game_id: &str, state: S, last_move_time: i64) {
        self.lock().insert(
            game_id.to_string(),
            CachedGame {
                state,
                last_move_time,
            },
        );
    }

    pub fn remove(&self, game_id: &str) -> bool {
        self.lock().remove(game_id).is_some()
    }

    pub fn contains(&self, game_id: &str) -> bool {
        self.lock().contains_key(game_id)
    }

    pub fn game_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Evict every entry whose durable last-move time is older than
    /// `threshold` at `now_millis`. Games that no longer exist in storage are
    /// evicted too; a failed lookup leaves the entry for the next pass.
    /// Returns the number of evicted games.
    pub async fn sweep_once(
        &self,
        storage: &StorageHandle,
        now_millis: i64,
        threshold: Duration,
    ) -> usize {
        let threshold_millis = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        let mut evicted = 0;

        for game_id in self.game_ids() {
            let stale = match storage.get_last_move_time(&game_id).await {
                Ok(last_move_time) => now_millis.saturating_sub(last_move_time) > threshold_millis,
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    warn!(game_id = %game_id, "Idle sweep could not read last move time: {}", e);
                    false
                }
            };

            if stale && self.remove(&game_id) {
                debug!(game_id = %game_id, "Evicted idle game");
                evicted += 1;
            }
        }

        evicted
    }
}

impl<S: Clone + Send + 'static> GameCache<S> {
    /// Run [`GameCache::sweep_once`] every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        storage: StorageHandle,
        interval: Duration,
        threshold: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                threshold_secs = threshold.as_secs(),
                "Idle game sweep started"
            );
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self
                            .sweep_once(&storage, current_timestamp_millis(), threshold)
                            .await;
                        if evicted > 0 {
                            info!(evicted, remaining = self.len(), "Idle game sweep finished");
                        }
                    }
                }
            }

            info!("Idle game sweep stopped");
        })
    }
}
