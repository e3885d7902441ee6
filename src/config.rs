//! Engine-wide tunables, loaded from the environment with sane fallbacks.
//!
//! Follows the same `env::var(...).ok().and_then(...).unwrap_or(...)` chain
//! the teacher's `Config::from_env` uses, rather than a config-file crate —
//! there is no HTTP surface to hang a config file loader off in this crate.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_players: usize,
    pub entry_fee: i64,
    pub pool_size: i64,
    pub win_threshold_fraction: f64,
    pub self_share_floor: i64,
    pub max_rounds: u32,
    pub max_negotiation_rounds: u32,
    pub matrix_sub_rounds: u32,
    pub disconnect_timeout: Duration,
    pub oracle_deadline: Duration,
    pub oracle_max_concurrency: usize,
    pub oracle_rpm: u32,
    pub oracle_tpm: u32,
    pub tournament_games_per_tournament: u32,
    pub roster_size: usize,
    pub starting_balance: i64,
    pub bankruptcy_threshold: i64,
}

fn env_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let max_players = env_var("ENGINE_MAX_PLAYERS", 10);
        let entry_fee = env_var("ENGINE_ENTRY_FEE", 100);
        Self {
            max_players,
            entry_fee,
            pool_size: env_var("ENGINE_POOL_SIZE", (max_players as i64) * entry_fee),
            win_threshold_fraction: env_var("ENGINE_WIN_THRESHOLD_FRACTION", 0.61),
            self_share_floor: env_var("ENGINE_SELF_SHARE_FLOOR", 17),
            max_rounds: env_var("ENGINE_MAX_ROUNDS", 10),
            max_negotiation_rounds: env_var("ENGINE_MAX_NEGOTIATION_ROUNDS", 5),
            matrix_sub_rounds: env_var("ENGINE_MATRIX_SUB_ROUNDS", 3),
            disconnect_timeout: Duration::from_millis(env_var(
                "ENGINE_DISCONNECT_TIMEOUT_MS",
                60_000,
            )),
            oracle_deadline: Duration::from_millis(env_var("ENGINE_ORACLE_DEADLINE_MS", 30_000)),
            oracle_max_concurrency: env_var("ENGINE_ORACLE_MAX_CONCURRENCY", 4),
            oracle_rpm: env_var("ENGINE_ORACLE_RPM", 60),
            oracle_tpm: env_var("ENGINE_ORACLE_TPM", 100_000),
            tournament_games_per_tournament: env_var("ENGINE_TOURNAMENT_GAMES", 8),
            roster_size: env_var("ENGINE_ROSTER_SIZE", 6),
            starting_balance: env_var("ENGINE_STARTING_BALANCE", 500),
            bankruptcy_threshold: env_var("ENGINE_BANKRUPTCY_THRESHOLD", 100),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_players: 10,
            entry_fee: 100,
            pool_size: 1000,
            win_threshold_fraction: 0.61,
            self_share_floor: 17,
            max_rounds: 10,
            max_negotiation_rounds: 5,
            matrix_sub_rounds: 3,
            disconnect_timeout: Duration::from_millis(60_000),
            oracle_deadline: Duration::from_millis(30_000),
            oracle_max_concurrency: 4,
            oracle_rpm: 60,
            oracle_tpm: 100_000,
            tournament_games_per_tournament: 8,
            roster_size: 6,
            starting_balance: 500,
            bankruptcy_threshold: 100,
        }
    }
}
