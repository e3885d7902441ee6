//! Persistence (consumed, §6): an object store keyed by `gameId` with
//! `save`/`load`. Serialization format is our choice as long as it
//! round-trips losslessly — we use `serde_json` throughout so the stored
//! bytes are both human-inspectable and trivially portable to the
//! Postgres-backed implementation's `jsonb` column.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PersistenceError;
use crate::phase::GameState;
use crate::types::GameId;

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn save(&self, state: &GameState) -> Result<(), PersistenceError>;
    async fn load(&self, game_id: &GameId) -> Result<Option<GameState>, PersistenceError>;
}

/// Default/test store. Keeps the serialized form, not the struct directly,
/// so a round-trip genuinely exercises serialization rather than just
/// cloning the in-memory value.
pub struct InMemoryGameStore {
    records: Arc<RwLock<HashMap<GameId, Vec<u8>>>>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn save(&self, state: &GameState) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(state).map_err(|e| PersistenceError {
            game_id: state.game_id.clone(),
            source: e.into(),
        })?;
        self.records.write().await.insert(state.game_id.clone(), bytes);
        Ok(())
    }

    async fn load(&self, game_id: &GameId) -> Result<Option<GameState>, PersistenceError> {
        let records = self.records.read().await;
        match records.get(game_id) {
            None => Ok(None),
            Some(bytes) => {
                let state = serde_json::from_slice(bytes).map_err(|e| PersistenceError {
                    game_id: game_id.clone(),
                    source: e.into(),
                })?;
                Ok(Some(state))
            }
        }
    }
}

/// `jsonb`-blob store, grounded in the teacher's `db.rs` (`sqlx::PgPool`,
/// `PgPoolOptions`). Deliberately not a normalized schema — the Postgres
/// schema is out of scope; this is the minimal conforming implementation of
/// the `save`/`load` contract.
#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;

    pub struct PgGameStore {
        pool: PgPool,
    }

    impl PgGameStore {
        pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .min_connections(1)
                .connect(database_url)
                .await?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS game_states (
                    game_id text PRIMARY KEY,
                    state jsonb NOT NULL,
                    updated_at timestamptz NOT NULL DEFAULT now()
                )",
            )
            .execute(&pool)
            .await?;
            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl GameStore for PgGameStore {
        async fn save(&self, state: &GameState) -> Result<(), PersistenceError> {
            let as_value = serde_json::to_value(state).map_err(|e| PersistenceError {
                game_id: state.game_id.clone(),
                source: e.into(),
            })?;
            sqlx::query(
                "INSERT INTO game_states (game_id, state, updated_at)
                 VALUES ($1, $2, now())
                 ON CONFLICT (game_id) DO UPDATE SET state = $2, updated_at = now()",
            )
            .bind(state.game_id.as_str())
            .bind(as_value)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError {
                game_id: state.game_id.clone(),
                source: e.into(),
            })?;
            Ok(())
        }

        async fn load(&self, game_id: &GameId) -> Result<Option<GameState>, PersistenceError> {
            let row = sqlx::query_as::<_, (serde_json::Value,)>(
                "SELECT state FROM game_states WHERE game_id = $1",
            )
            .bind(game_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError {
                game_id: game_id.clone(),
                source: e.into(),
            })?;

            match row {
                None => Ok(None),
                Some((value,)) => {
                    let state = serde_json::from_value(value).map_err(|e| PersistenceError {
                        game_id: game_id.clone(),
                        source: e.into(),
                    })?;
                    Ok(Some(state))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::GameState;

    #[tokio::test]
    async fn load_of_unknown_game_is_none() {
        let store = InMemoryGameStore::new();
        assert!(store.load(&GameId::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_losslessly() {
        let store = InMemoryGameStore::new();
        let state = GameState::new(GameId::new("g1"), 10, 10, 5);
        store.save(&state).await.unwrap();
        let loaded = store.load(&GameId::new("g1")).await.unwrap().unwrap();
        assert_eq!(loaded.game_id, state.game_id);
        assert_eq!(loaded.phase, state.phase);
        assert_eq!(loaded.max_players, state.max_players);
    }
}
