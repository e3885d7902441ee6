//! Typed error surface for the engine.
//!
//! Mirrors the taxonomy in the error handling design: validation errors and
//! oracle errors are recovered locally by callers (the driver substitutes
//! canonical defaults), while persistence and ownership errors propagate to
//! the caller untouched.

use thiserror::Error;

use crate::types::{GameId, PlayerId};

/// Failures the Agent Oracle can report for a single `ask` call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("upstream error: {0}")]
    UpstreamError(String),
    #[error("could not parse upstream response: {0}")]
    ParseErrorUpstream(String),
}

/// Failures when validating a matrix row, proposal, or vote.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("malformed row: {0}")]
    ParseFailure(String),
    #[error("explanation shorter than minimum length ({actual} < {minimum})")]
    ExplanationTooShort { actual: usize, minimum: usize },
    #[error("row has {actual} cells, expected {expected}")]
    WrongRowLength { actual: usize, expected: usize },
    #[error("token proposal section sums to {actual}, expected ~100")]
    ProposalSumInvalid { actual: i64 },
    #[error("vote allocation section sums to {actual}, expected ~100")]
    VoteSumInvalid { actual: i64 },
    #[error("self-share {actual} below floor {floor}")]
    SelfShareBelowFloor { actual: i64, floor: i64 },
    #[error("cell {index} value {value} outside [0, 100]")]
    CellOutOfRange { index: usize, value: f64 },
    #[error("proposal keys do not match the expected player set")]
    ProposalKeysMismatch,
    #[error("vote keys are not a subset of proposer ids")]
    VoteKeysMismatch,
}

/// An attempted write to a row the caller does not own.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("row {row} may only be written by its owner (caller was {caller})")]
pub struct OwnershipError {
    pub row: usize,
    pub caller: usize,
}

/// A state machine event applied in a phase that does not accept it.
///
/// Per the error handling design these are logged and treated as no-ops,
/// never surfaced as user errors — `TransitionError` exists so callers *can*
/// observe and log it, not so it propagates.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("event {event} is not valid in phase {phase}")]
pub struct TransitionError {
    pub phase: String,
    pub event: String,
}

/// Opaque persistence failure. Fatal to the in-flight request: the caller
/// must not advance in-memory state when this is returned.
#[derive(Debug, Error)]
#[error("persistence failure for game {game_id}: {source}")]
pub struct PersistenceError {
    pub game_id: GameId,
    #[source]
    pub source: anyhow::Error,
}

/// Top-level engine error. Most failures are recovered locally and never
/// reach this type; it exists for the few paths (persistence writes,
/// unrecoverable ownership violations at the orchestrator boundary) that
/// must abort the current request.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("no player {0} in game {1}")]
    UnknownPlayer(PlayerId, GameId),
    #[error("game {0} not found")]
    UnknownGame(GameId),
    #[error("game {0} already has an active orchestrator task")]
    AlreadyRunning(GameId),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error("invalid wallet signature for player {0}")]
    InvalidSignature(PlayerId),
}

pub type EngineResult<T> = Result<T, EngineError>;
