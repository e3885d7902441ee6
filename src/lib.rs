//! A deterministic phase engine for a multi-agent token-negotiation game.
//!
//! The crate exposes one long-lived entry point, [`orchestrator::Orchestrator`],
//! which owns one actor task per running game and drives it through
//! [`phase::transition`] — a pure state machine with no I/O of its own.
//! Everything that touches the outside world (LLM calls, wallet signature
//! checks, persistence, pub/sub) is a trait the orchestrator is generic
//! over, the same seam the teacher draws around its `blockchain`/`cache`/
//! `db` collaborators in favor of a concrete transport.

pub mod broadcast;
pub mod commitment;
pub mod config;
pub mod driver;
pub mod error;
pub mod matrix;
pub mod metrics;
pub mod oracle;
pub mod orchestrator;
pub mod persistence;
pub mod phase;
pub mod random;
pub mod tournament;
pub mod types;
pub mod wallet;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use orchestrator::Orchestrator;
pub use phase::{transition, Event, GameState, Phase};
