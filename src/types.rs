//! Shared domain types for the data model.
//!
//! `GameId`/`PlayerId`/`StrategyId` are newtype wrappers rather than bare
//! `String`s so a misplaced argument is a compile error, not a runtime bug —
//! the teacher leans on `uuid::Uuid` newtypes for the same reason.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(GameId);
string_id!(PlayerId);
string_id!(StrategyId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    Connected,
    Disconnected,
    Eliminated,
}

/// Which chain a wallet signature was produced on (used only at ready time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletType {
    Eth,
    Sol,
}

/// An oracle profile bound to a player: which conversation key/system
/// preamble the driver uses when calling the Agent Oracle for this player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub conversation_key: Option<String>,
    pub system_preamble: Option<String>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            conversation_key: None,
            system_preamble: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub strategy: String,
    pub profile: AgentProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub ready: bool,
    pub agent: Agent,
}

impl Player {
    pub fn new(player_id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            name: name.into(),
            status: PlayerStatus::Connected,
            ready: false,
            agent: Agent {
                strategy: String::new(),
                profile: AgentProfile::default(),
            },
        }
    }
}

/// An allocation of the prize pool percentage over all players (including
/// eliminated ones, who remain allocation targets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposer_id: PlayerId,
    pub allocation: BTreeMap<PlayerId, i64>,
}

impl Proposal {
    pub fn sum(&self) -> i64 {
        self.allocation.values().sum()
    }

    pub fn self_share(&self) -> i64 {
        self.allocation
            .get(&self.proposer_id)
            .copied()
            .unwrap_or(0)
    }
}

/// One voter's allocation of their 100 votes across proposers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: PlayerId,
    pub allocation: BTreeMap<PlayerId, i64>,
}

impl Vote {
    pub fn sum(&self) -> i64 {
        self.allocation.values().sum()
    }
}

/// A best-effort commitment parsed from free-text negotiation. Advisory
/// only: it must never gate a phase transition (the authoritative inputs
/// are proposals and votes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub kind: CommitmentKind,
    pub from_player: PlayerId,
    pub target_player: Option<PlayerId>,
    pub offered_votes: Option<i64>,
    pub required_allocation: Option<i64>,
    pub fulfilled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentKind {
    VoteOffer,
    SeekingAllocation,
    Alliance,
    Threat,
    ConditionalTrade,
}

/// A roster member in tournament scope — the unit of evolutionary
/// selection between tournaments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub name: String,
    pub strategy: String,
    pub archetype: String,
    pub coin_balance: i64,
    pub games_played: u32,
    pub total_invested: i64,
    pub total_returned: i64,
    pub win_history: Vec<GameId>,
    pub elimination_count: u32,
}

impl Strategy {
    pub fn new(id: impl Into<StrategyId>, name: impl Into<String>, strategy: impl Into<String>, archetype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strategy: strategy.into(),
            archetype: archetype.into(),
            coin_balance: STARTING_BALANCE,
            games_played: 0,
            total_invested: 0,
            total_returned: 0,
            win_history: Vec::new(),
            elimination_count: 0,
        }
    }

    pub fn is_bankrupt(&self, threshold: i64) -> bool {
        self.coin_balance < threshold
    }
}

pub const STARTING_BALANCE: i64 = 500;

/// Derived read-model for external reporting/leaderboard collaborators.
/// Never persisted on its own — always recomputed from `GameState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSummary {
    pub game_id: GameId,
    pub phase: String,
    pub round: u32,
    pub player_count: usize,
    pub winner: Option<PlayerId>,
}
