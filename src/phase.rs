//! The Phase State Machine (C3): a pure `transition(state, event) -> state`
//! over the seven phases. No I/O, and the only randomness is the seeded
//! shuffle used to pick a negotiation speaking order, so a transition can
//! always be replayed from a persisted `GameState` and an event log.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::random::rng_for;
use crate::types::{GameId, GameSummary, Player, PlayerId, PlayerStatus, Proposal, Vote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    Strategy,
    Negotiation,
    Proposal,
    Voting,
    Elimination,
    Endgame,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Lobby => "lobby",
            Phase::Strategy => "strategy",
            Phase::Negotiation => "negotiation",
            Phase::Proposal => "proposal",
            Phase::Voting => "voting",
            Phase::Elimination => "elimination",
            Phase::Endgame => "endgame",
        };
        write!(f, "{s}")
    }
}

/// The outcome C5 computed for `AllVotesSubmitted` — endgame resolution
/// itself lives in the orchestrator (it needs the config's win-threshold
/// fraction and tiebreak rule); C3 only records the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VoteOutcome {
    Winner(Proposal),
    NeedsElimination,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PlayerJoin(Player),
    PlayerLeave(PlayerId),
    PlayerReady { player_id: PlayerId, strategy: String },
    StartGame,
    SubmitStrategy { player_id: PlayerId, strategy: String },
    AllStrategiesSubmitted,
    Speak,
    SubmitProposal(Proposal),
    AllProposalsSubmitted,
    SubmitVote(Vote),
    AllVotesSubmitted(VoteOutcome),
    Eliminate(Vec<PlayerId>),
    Continue,
}

impl Event {
    fn tag(&self) -> &'static str {
        match self {
            Event::PlayerJoin(_) => "PLAYER_JOIN",
            Event::PlayerLeave(_) => "PLAYER_LEAVE",
            Event::PlayerReady { .. } => "PLAYER_READY",
            Event::StartGame => "START_GAME",
            Event::SubmitStrategy { .. } => "SUBMIT_STRATEGY",
            Event::AllStrategiesSubmitted => "ALL_STRATEGIES_SUBMITTED",
            Event::Speak => "SPEAK",
            Event::SubmitProposal(_) => "SUBMIT_PROPOSAL",
            Event::AllProposalsSubmitted => "ALL_PROPOSALS_SUBMITTED",
            Event::SubmitVote(_) => "SUBMIT_VOTE",
            Event::AllVotesSubmitted(_) => "ALL_VOTES_SUBMITTED",
            Event::Eliminate(_) => "ELIMINATE",
            Event::Continue => "CONTINUE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub game_id: GameId,
    pub phase: Phase,
    pub round: u32,
    pub max_rounds: u32,
    pub max_players: usize,
    pub max_negotiation_sub_rounds: u32,
    pub players: Vec<Player>,
    pub eliminated: HashSet<PlayerId>,
    pub proposals: Vec<Proposal>,
    pub votes: BTreeMap<PlayerId, BTreeMap<PlayerId, i64>>,
    pub speaking_order: Vec<PlayerId>,
    pub current_speaker_idx: usize,
    pub negotiation_sub_round: u32,
    pub strategy_messages: BTreeMap<PlayerId, String>,
    pub winner_proposal: Option<Proposal>,
    pub ended: bool,
}

impl GameState {
    pub fn new(game_id: GameId, max_players: usize, max_rounds: u32, max_negotiation_sub_rounds: u32) -> Self {
        Self {
            game_id,
            phase: Phase::Lobby,
            round: 0,
            max_rounds,
            max_players,
            max_negotiation_sub_rounds,
            players: Vec::new(),
            eliminated: HashSet::new(),
            proposals: Vec::new(),
            votes: BTreeMap::new(),
            speaking_order: Vec::new(),
            current_speaker_idx: 0,
            negotiation_sub_round: 1,
            strategy_messages: BTreeMap::new(),
            winner_proposal: None,
            ended: false,
        }
    }

    pub fn non_eliminated(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| !self.eliminated.contains(&p.player_id))
            .map(|p| p.player_id.clone())
            .collect()
    }

    /// Derives the external reporting read-model from the current state —
    /// never stored, always recomputed on demand.
    pub fn summary(&self) -> GameSummary {
        GameSummary {
            game_id: self.game_id.clone(),
            phase: self.phase.to_string(),
            round: self.round,
            player_count: self.players.len(),
            winner: self
                .winner_proposal
                .as_ref()
                .map(|p| p.proposer_id.clone()),
        }
    }

    fn guard(&self, event: &Event) -> Result<(), TransitionError> {
        Err(TransitionError {
            phase: self.phase.to_string(),
            event: event.tag().to_string(),
        })
    }
}

/// Applies `event` to `state`, returning the next state. An event that does
/// not apply in the current phase is a logged no-op at the call site (the
/// driver/orchestrator decides whether to log); this function simply
/// reports it as an `Err` rather than panicking or silently mutating state.
pub fn transition(state: &GameState, event: Event) -> Result<GameState, TransitionError> {
    let mut next = state.clone();

    match (&state.phase, &event) {
        (Phase::Lobby, Event::PlayerJoin(player)) => {
            if next.players.len() >= next.max_players {
                return state.guard(&event);
            }
            if !next.players.iter().any(|p| p.player_id == player.player_id) {
                next.players.push(player.clone());
            }
            Ok(next)
        }
        (_, Event::PlayerLeave(player_id)) => {
            if let Some(p) = next.players.iter_mut().find(|p| &p.player_id == player_id) {
                p.status = PlayerStatus::Disconnected;
            }
            Ok(next)
        }
        (Phase::Lobby, Event::PlayerReady { player_id, strategy }) => {
            if let Some(p) = next.players.iter_mut().find(|p| &p.player_id == player_id) {
                p.ready = true;
                next.strategy_messages
                    .insert(player_id.clone(), strategy.clone());
            } else {
                return state.guard(&event);
            }
            Ok(next)
        }
        (Phase::Lobby, Event::StartGame) => {
            if next.players.len() < 2 || !next.players.iter().all(|p| p.ready) {
                return state.guard(&event);
            }
            next.round = 1;
            next.proposals.clear();
            next.votes.clear();
            next.eliminated.clear();
            next.winner_proposal = None;
            next.phase = Phase::Strategy;
            Ok(next)
        }
        (Phase::Strategy, Event::SubmitStrategy { player_id, strategy }) => {
            next.strategy_messages
                .insert(player_id.clone(), strategy.clone());
            Ok(next)
        }
        (Phase::Strategy, Event::AllStrategiesSubmitted) => {
            let mut order = next.non_eliminated();
            let mut rng = rng_for(next.game_id.as_str(), next.round);
            rng.shuffle(&mut order);
            next.speaking_order = order;
            next.current_speaker_idx = 0;
            next.negotiation_sub_round = 1;
            next.phase = Phase::Negotiation;
            Ok(next)
        }
        (Phase::Negotiation, Event::Speak) => {
            if next.speaking_order.is_empty() {
                return Ok(next);
            }
            next.current_speaker_idx += 1;
            if next.current_speaker_idx >= next.speaking_order.len() {
                if next.negotiation_sub_round < next.max_negotiation_sub_rounds {
                    next.negotiation_sub_round += 1;
                    let mut order = next.non_eliminated();
                    let mut rng = rng_for(
                        next.game_id.as_str(),
                        next.round * 1000 + next.negotiation_sub_round,
                    );
                    rng.shuffle(&mut order);
                    next.speaking_order = order;
                    next.current_speaker_idx = 0;
                } else {
                    next.phase = Phase::Proposal;
                }
            }
            Ok(next)
        }
        (Phase::Proposal, Event::SubmitProposal(proposal)) => {
            next.proposals.retain(|p| p.proposer_id != proposal.proposer_id);
            next.proposals.push(proposal.clone());
            Ok(next)
        }
        (Phase::Proposal, Event::AllProposalsSubmitted) => {
            next.phase = Phase::Voting;
            Ok(next)
        }
        (Phase::Voting, Event::SubmitVote(vote)) => {
            next.votes.insert(vote.voter_id.clone(), vote.allocation.clone());
            Ok(next)
        }
        (Phase::Voting, Event::AllVotesSubmitted(outcome)) => match outcome {
            VoteOutcome::Winner(proposal) => {
                next.winner_proposal = Some(proposal.clone());
                next.ended = true;
                next.phase = Phase::Endgame;
                Ok(next)
            }
            VoteOutcome::NeedsElimination => {
                next.phase = Phase::Elimination;
                Ok(next)
            }
        },
        (Phase::Elimination, Event::Eliminate(ids)) => {
            for id in ids {
                next.eliminated.insert(id.clone());
                if let Some(p) = next.players.iter_mut().find(|p| &p.player_id == id) {
                    p.status = PlayerStatus::Eliminated;
                }
            }
            Ok(next)
        }
        (Phase::Elimination, Event::Continue) => {
            if next.round < next.max_rounds {
                next.round += 1;
                next.proposals.clear();
                next.votes.clear();
                next.phase = Phase::Strategy;
            } else {
                next.ended = true;
                next.phase = Phase::Endgame;
            }
            Ok(next)
        }
        _ => state.guard(&event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerId;

    fn three_player_lobby() -> GameState {
        let mut state = GameState::new(GameId::new("g1"), 10, 10, 5);
        for name in ["a", "b", "c"] {
            state = transition(&state, Event::PlayerJoin(Player::new(name, name))).unwrap();
        }
        state
    }

    #[test]
    fn join_rejects_once_max_players_reached() {
        let mut state = GameState::new(GameId::new("g1"), 1, 10, 5);
        state = transition(&state, Event::PlayerJoin(Player::new("a", "a"))).unwrap();
        assert!(transition(&state, Event::PlayerJoin(Player::new("b", "b"))).is_err());
    }

    #[test]
    fn start_game_requires_all_ready() {
        let state = three_player_lobby();
        assert!(transition(&state, Event::StartGame).is_err());
    }

    #[test]
    fn start_game_succeeds_once_all_ready() {
        let mut state = three_player_lobby();
        for name in ["a", "b", "c"] {
            state = transition(
                &state,
                Event::PlayerReady {
                    player_id: PlayerId::new(name),
                    strategy: "be nice".into(),
                },
            )
            .unwrap();
        }
        let started = transition(&state, Event::StartGame).unwrap();
        assert_eq!(started.phase, Phase::Strategy);
        assert_eq!(started.round, 1);
    }

    #[test]
    fn speaking_order_is_deterministic_for_same_seed() {
        let state = three_player_lobby();
        let mut s1 = state.clone();
        s1.round = 4;
        s1.phase = Phase::Strategy;
        let mut s2 = s1.clone();
        let n1 = transition(&s1, Event::AllStrategiesSubmitted).unwrap();
        let n2 = transition(&s2, Event::AllStrategiesSubmitted).unwrap();
        assert_eq!(n1.speaking_order, n2.speaking_order);
        s2.round = 5;
        let n3 = transition(&s2, Event::AllStrategiesSubmitted).unwrap();
        assert_ne!(n1.speaking_order, n3.speaking_order);
    }

    #[test]
    fn speak_promotes_to_proposal_after_max_sub_rounds() {
        let mut state = three_player_lobby();
        state.phase = Phase::Strategy;
        state = transition(&state, Event::AllStrategiesSubmitted).unwrap();
        state.max_negotiation_sub_rounds = 1;
        for _ in 0..state.speaking_order.len() {
            state = transition(&state, Event::Speak).unwrap();
        }
        assert_eq!(state.phase, Phase::Proposal);
    }

    #[test]
    fn elimination_then_continue_advances_round() {
        let mut state = three_player_lobby();
        state.phase = Phase::Elimination;
        state.round = 1;
        state = transition(&state, Event::Eliminate(vec![PlayerId::new("c")])).unwrap();
        assert!(state.eliminated.contains(&PlayerId::new("c")));
        state = transition(&state, Event::Continue).unwrap();
        assert_eq!(state.phase, Phase::Strategy);
        assert_eq!(state.round, 2);
    }

    #[test]
    fn continue_at_max_rounds_ends_game() {
        let mut state = three_player_lobby();
        state.phase = Phase::Elimination;
        state.round = state.max_rounds;
        state = transition(&state, Event::Continue).unwrap();
        assert_eq!(state.phase, Phase::Endgame);
        assert!(state.ended);
    }

    #[test]
    fn event_invalid_in_phase_is_an_error_not_a_panic() {
        let state = three_player_lobby();
        let result = transition(&state, Event::Speak);
        assert!(result.is_err());
    }
}
