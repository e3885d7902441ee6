//! The broadcast channel (exposed, §6): per-gameId publish/subscribe with
//! ordered delivery and best-effort slow-subscriber dropping.
//!
//! `tokio::sync::broadcast` is used instead of a Redis-backed pub/sub layer
//! (the wire transport is out of scope) because its built-in lagged-
//! receiver behavior *is* "a slow subscriber is dropped rather than
//! blocking the orchestrator," not an approximation of it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use crate::types::{GameId, PlayerId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameEvent {
    StateUpdate(serde_json::Value),
    Proposal(serde_json::Value),
    Vote(serde_json::Value),
    Elimination(serde_json::Value),
    End(serde_json::Value),
    Message { from: PlayerId, text: String },
    PlayerDisconnected(PlayerId),
    Presence { player_id: PlayerId, connected: bool },
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Admits a subscriber and returns a receiver for future events. Unlike
    /// the teacher's cache layer there is no "current state" to replay
    /// here; the caller is expected to have just fetched state separately.
    async fn subscribe(&self, game_id: &GameId) -> broadcast::Receiver<GameEvent>;

    /// Publishes to every current subscriber of `game_id`, dropping the
    /// event for subscribers whose queue is full rather than blocking.
    async fn publish(&self, game_id: &GameId, event: GameEvent);

    /// Drops the channel for a game entirely (used on deletion/cancel).
    async fn close(&self, game_id: &GameId);
}

const CHANNEL_CAPACITY: usize = 256;

struct GameChannel {
    sender: broadcast::Sender<GameEvent>,
}

/// In-process registry of one broadcast channel per gameId, the reference
/// implementation of `Broadcaster`.
pub struct InProcessBroadcaster {
    channels: Arc<RwLock<HashMap<GameId, GameChannel>>>,
}

impl InProcessBroadcaster {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sender_for(&self, game_id: &GameId) -> broadcast::Sender<GameEvent> {
        if let Some(channel) = self.channels.read().await.get(game_id) {
            return channel.sender.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(game_id.clone())
            .or_insert_with(|| GameChannel {
                sender: broadcast::channel(CHANNEL_CAPACITY).0,
            })
            .sender
            .clone()
    }
}

impl Default for InProcessBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broadcaster for InProcessBroadcaster {
    async fn subscribe(&self, game_id: &GameId) -> broadcast::Receiver<GameEvent> {
        self.sender_for(game_id).await.subscribe()
    }

    async fn publish(&self, game_id: &GameId, event: GameEvent) {
        // `send` only errors when there are zero receivers; that's a
        // no-op broadcast, not a failure.
        let _ = self.sender_for(game_id).await.send(event);
    }

    async fn close(&self, game_id: &GameId) {
        self.channels.write().await.remove(game_id);
    }
}
