//! The Game Orchestrator (C5): owns one game's lifecycle end-to-end.
//!
//! The live-machine registry is `Arc<RwLock<HashMap<GameId, GameHandle>>>`,
//! the same shape as the teacher's `RateLimiter.limits` map, generalized
//! from rate-limit counters to task handles. Each game is a `tokio::spawn`ed
//! actor owning its `GameState` exclusively; external callers only ever
//! reach it through an `mpsc::Sender<Command>`, so there is no shared
//! `&mut GameState` across tasks by construction.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::{Broadcaster, GameEvent};
use crate::config::EngineConfig;
use crate::driver::AgentDriver;
use crate::error::{EngineError, EngineResult};
use crate::matrix::MatrixSubstrate;
use crate::metrics::Metrics;
use crate::oracle::{AgentOracle, AskOptions};
use crate::persistence::GameStore;
use crate::phase::{transition, Event, GameState, Phase, VoteOutcome};
use crate::random::rng_for;
use crate::types::{Player, PlayerId, Proposal, WalletType};
use crate::wallet::WalletVerifier;

pub enum Command {
    Join {
        player_id: PlayerId,
        name: String,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Ready {
        player_id: PlayerId,
        strategy: String,
        wallet_type: WalletType,
        message: Vec<u8>,
        signature: Vec<u8>,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Advance {
        reply: oneshot::Sender<EngineResult<()>>,
    },
    Disconnect {
        player_id: PlayerId,
    },
    Reconnect {
        player_id: PlayerId,
    },
    /// Sent by a disconnect timer (never by an external caller) once it
    /// expires without a matching `Reconnect`, so the state mutation happens
    /// on the actor's own task instead of racing it from a spawned timer.
    DisconnectExpired {
        player_id: PlayerId,
    },
    Snapshot {
        reply: oneshot::Sender<GameState>,
    },
    Shutdown,
}

struct GameHandle {
    sender: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Per-player payout for one resolved game, used by the Tournament
/// Controller to update strategy balances.
#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub player_id: PlayerId,
    pub amount: i64,
}

const COMMAND_QUEUE_DEPTH: usize = 32;

pub struct Orchestrator {
    registry: Arc<RwLock<HashMap<crate::types::GameId, GameHandle>>>,
    store: Arc<dyn GameStore>,
    broadcaster: Arc<dyn Broadcaster>,
    oracle: Arc<dyn AgentOracle>,
    wallet_verifier: Arc<dyn WalletVerifier>,
    config: Arc<EngineConfig>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn GameStore>,
        broadcaster: Arc<dyn Broadcaster>,
        oracle: Arc<dyn AgentOracle>,
        wallet_verifier: Arc<dyn WalletVerifier>,
        config: Arc<EngineConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            store,
            broadcaster,
            oracle,
            wallet_verifier,
            config,
            metrics,
        }
    }

    /// Initializes a fresh Game State in `lobby` and persists it, then
    /// spawns the one actor task that will own it for its whole life.
    pub async fn create(&self, game_id: crate::types::GameId) -> EngineResult<()> {
        let mut registry = self.registry.write().await;
        if registry.contains_key(&game_id) {
            return Err(EngineError::AlreadyRunning(game_id));
        }

        let state = GameState::new(
            game_id.clone(),
            self.config.max_players,
            self.config.max_rounds,
            self.config.max_negotiation_rounds,
        );
        self.store
            .save(&state)
            .await
            .map_err(EngineError::from)?;

        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let actor = GameActor {
            state,
            matrix: None,
            driver: AgentDriver::new(self.oracle.clone(), self.config.clone(), self.metrics.clone()),
            oracle: self.oracle.clone(),
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            wallet_verifier: self.wallet_verifier.clone(),
            config: self.config.clone(),
            cancel: cancel.clone(),
            self_sender: sender.clone(),
            disconnect_timers: HashMap::new(),
        };
        let task = tokio::spawn(actor.run(receiver));
        registry.insert(game_id, GameHandle { sender, cancel, task });
        Ok(())
    }

    async fn send(&self, game_id: &crate::types::GameId, command: Command) -> EngineResult<()> {
        let sender = {
            let registry = self.registry.read().await;
            registry
                .get(game_id)
                .map(|h| h.sender.clone())
                .ok_or_else(|| EngineError::UnknownGame(game_id.clone()))?
        };
        sender
            .send(command)
            .await
            .map_err(|_| EngineError::UnknownGame(game_id.clone()))
    }

    pub async fn join(&self, game_id: &crate::types::GameId, player_id: PlayerId, name: String) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(game_id, Command::Join { player_id, name, reply }).await?;
        rx.await.map_err(|_| EngineError::UnknownGame(game_id.clone()))?
    }

    pub async fn ready(
        &self,
        game_id: &crate::types::GameId,
        player_id: PlayerId,
        strategy: String,
        wallet_type: WalletType,
        message: Vec<u8>,
        signature: Vec<u8>,
    ) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(
            game_id,
            Command::Ready {
                player_id,
                strategy,
                wallet_type,
                message,
                signature,
                reply,
            },
        )
        .await?;
        rx.await.map_err(|_| EngineError::UnknownGame(game_id.clone()))?
    }

    pub async fn advance(&self, game_id: &crate::types::GameId) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(game_id, Command::Advance { reply }).await?;
        rx.await.map_err(|_| EngineError::UnknownGame(game_id.clone()))?
    }

    pub async fn disconnect(&self, game_id: &crate::types::GameId, player_id: PlayerId) -> EngineResult<()> {
        self.send(game_id, Command::Disconnect { player_id }).await
    }

    pub async fn reconnect(&self, game_id: &crate::types::GameId, player_id: PlayerId) -> EngineResult<()> {
        self.send(game_id, Command::Reconnect { player_id }).await
    }

    pub async fn snapshot(&self, game_id: &crate::types::GameId) -> EngineResult<GameState> {
        let (reply, rx) = oneshot::channel();
        self.send(game_id, Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| EngineError::UnknownGame(game_id.clone()))
    }

    /// The external reporting/leaderboard read-model for one game, derived
    /// from the same snapshot a caller would otherwise have to recompute by
    /// hand from `GameState`.
    pub async fn summary(&self, game_id: &crate::types::GameId) -> EngineResult<crate::types::GameSummary> {
        self.snapshot(game_id).await.map(|state| state.summary())
    }

    /// Cancels the in-flight oracle calls and background timers for a game,
    /// flushes nothing further (the actor's current persist already
    /// happened before this), and drops it from the registry.
    pub async fn shutdown(&self, game_id: &crate::types::GameId) {
        let mut registry = self.registry.write().await;
        if let Some(handle) = registry.remove(game_id) {
            handle.cancel.cancel();
            let _ = handle.sender.send(Command::Shutdown).await;
            handle.task.abort();
        }
        self.broadcaster.close(game_id).await;
    }
}

struct GameActor {
    state: GameState,
    matrix: Option<MatrixSubstrate>,
    driver: AgentDriver,
    oracle: Arc<dyn AgentOracle>,
    store: Arc<dyn GameStore>,
    broadcaster: Arc<dyn Broadcaster>,
    wallet_verifier: Arc<dyn WalletVerifier>,
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
    self_sender: mpsc::Sender<Command>,
    disconnect_timers: HashMap<PlayerId, CancellationToken>,
}

impl GameActor {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(game_id = %self.state.game_id, "orchestrator task cancelled");
                    return;
                }
                command = receiver.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => return,
                        Some(command) => self.handle(command).await,
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Join { player_id, name, reply } => {
                let _ = reply.send(self.handle_join(player_id, name).await);
            }
            Command::Ready {
                player_id,
                strategy,
                wallet_type,
                message,
                signature,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_ready(player_id, strategy, wallet_type, &message, &signature)
                        .await,
                );
            }
            Command::Advance { reply } => {
                let _ = reply.send(self.advance_one_phase().await);
            }
            Command::Disconnect { player_id } => self.handle_disconnect(player_id).await,
            Command::Reconnect { player_id } => self.handle_reconnect(player_id).await,
            Command::DisconnectExpired { player_id } => self.handle_disconnect_expired(player_id).await,
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
            Command::Shutdown => {}
        }
    }

    async fn persist_and_broadcast(&self, event: GameEvent) -> EngineResult<()> {
        self.store.save(&self.state).await?;
        self.broadcaster.publish(&self.state.game_id, event).await;
        Ok(())
    }

    fn state_update_event(&self) -> GameEvent {
        GameEvent::StateUpdate(serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null))
    }

    async fn handle_join(&mut self, player_id: PlayerId, name: String) -> EngineResult<()> {
        let next = transition(&self.state, Event::PlayerJoin(Player::new(player_id, name)))
            .map_err(|e| {
                warn!(error = %e, "join rejected by phase guard");
                EngineError::UnknownGame(self.state.game_id.clone())
            })?;
        self.state = next;
        let event = self.state_update_event();
        self.persist_and_broadcast(event).await
    }

    async fn handle_ready(
        &mut self,
        player_id: PlayerId,
        strategy: String,
        wallet_type: WalletType,
        message: &[u8],
        signature: &[u8],
    ) -> EngineResult<()> {
        if !self
            .wallet_verifier
            .verify(wallet_type, &player_id, message, signature)
            .await
        {
            return Err(EngineError::InvalidSignature(player_id));
        }

        let next = transition(
            &self.state,
            Event::PlayerReady {
                player_id: player_id.clone(),
                strategy: strategy.clone(),
            },
        )
        .map_err(|_| EngineError::UnknownPlayer(player_id, self.state.game_id.clone()))?;
        self.state = next;
        if let Some(player) = self.state.players.iter_mut().find(|p| p.player_id == player_id) {
            player.agent.strategy = strategy.clone();
        }

        let event = self.state_update_event();
        self.persist_and_broadcast(event).await?;

        if self.state.players.len() >= 2 && self.state.players.iter().all(|p| p.ready) {
            self.state = transition(&self.state, Event::StartGame)
                .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
            let event = self.state_update_event();
            self.persist_and_broadcast(event).await?;
            self.run_to_completion().await?;
        }
        Ok(())
    }

    async fn handle_disconnect(&mut self, player_id: PlayerId) {
        let timer_cancel = CancellationToken::new();
        self.disconnect_timers.insert(player_id.clone(), timer_cancel.clone());

        let timeout = self.config.disconnect_timeout;
        let self_sender = self.self_sender.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    // Feed the expiry back through the actor's own command
                    // loop so the authoritative state mutation happens on
                    // the actor's task, not racing it from this timer.
                    let _ = self_sender.send(Command::DisconnectExpired { player_id }).await;
                }
            }
        });
    }

    async fn handle_reconnect(&mut self, player_id: PlayerId) {
        if let Some(cancel) = self.disconnect_timers.remove(&player_id) {
            cancel.cancel();
        }
    }

    /// Applies the authoritative `status=disconnected` mutation and persists
    /// it before broadcasting, so a concurrent `Snapshot`/reconnect check
    /// always sees the expiry reflected in stored state.
    async fn handle_disconnect_expired(&mut self, player_id: PlayerId) {
        self.disconnect_timers.remove(&player_id);
        if let Ok(next) = transition(&self.state, Event::PlayerLeave(player_id.clone())) {
            self.state = next;
        }
        let _ = self
            .persist_and_broadcast(GameEvent::Presence { player_id, connected: false })
            .await;
    }

    async fn run_to_completion(&mut self) -> EngineResult<()> {
        while !self.state.ended {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.advance_one_phase().await?;
        }
        Ok(())
    }

    async fn advance_one_phase(&mut self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        match self.state.phase {
            Phase::Lobby => {}
            Phase::Strategy => self.run_strategy_phase().await?,
            Phase::Negotiation => self.run_negotiation_phase().await?,
            Phase::Proposal => self.run_proposal_phase().await?,
            Phase::Voting => self.run_voting_phase().await?,
            Phase::Elimination => self.run_elimination_phase().await?,
            Phase::Endgame => {}
        }
        Ok(())
    }

    async fn run_strategy_phase(&mut self) -> EngineResult<()> {
        let non_eliminated = self.state.non_eliminated();
        for player_id in &non_eliminated {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let previous = self
                .state
                .strategy_messages
                .get(player_id)
                .cloned()
                .unwrap_or_default();
            let prompt = format!(
                "Round {}. Your prior strategy was: {previous}. Restate or refine it in one paragraph.",
                self.state.round
            );
            let strategy = self
                .oracle
                .ask(player_id.as_str(), &prompt, &AskOptions::default())
                .await
                .unwrap_or(previous);
            self.state = transition(
                &self.state,
                Event::SubmitStrategy {
                    player_id: player_id.clone(),
                    strategy,
                },
            )
            .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        }
        self.state = transition(&self.state, Event::AllStrategiesSubmitted)
            .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        let event = self.state_update_event();
        self.persist_and_broadcast(event).await
    }

    async fn run_negotiation_phase(&mut self) -> EngineResult<()> {
        if self.matrix.is_none() {
            let ids: Vec<PlayerId> = self.state.players.iter().map(|p| p.player_id.clone()).collect();
            self.matrix = Some(MatrixSubstrate::initialize(&ids));
        }
        let players = self.state.players.clone();
        let eliminated = self.state.eliminated.clone();
        let round = self.state.round;
        let matrix = self.matrix.as_mut().expect("initialized above");
        self.driver
            .run_negotiation_phase(&players, matrix, round, &eliminated, &self.cancel)
            .await;

        let speaker_count = self.state.speaking_order.len().max(1);
        let total_speaks = speaker_count * self.state.max_negotiation_sub_rounds as usize;
        for _ in 0..total_speaks {
            if self.state.phase != Phase::Negotiation {
                break;
            }
            self.state = transition(&self.state, Event::Speak)
                .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        }
        let event = self.state_update_event();
        self.persist_and_broadcast(event).await
    }

    async fn run_proposal_phase(&mut self) -> EngineResult<()> {
        let players = self.state.players.clone();
        let eliminated = self.state.eliminated.clone();
        let proposals = self
            .driver
            .run_proposal_phase(&players, &eliminated, self.matrix.as_ref(), &self.cancel)
            .await;
        for proposal in proposals {
            self.state = transition(&self.state, Event::SubmitProposal(proposal))
                .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        }
        self.state = transition(&self.state, Event::AllProposalsSubmitted)
            .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        let event = self.state_update_event();
        self.persist_and_broadcast(event).await
    }

    async fn run_voting_phase(&mut self) -> EngineResult<()> {
        let players = self.state.players.clone();
        let proposers: Vec<PlayerId> = self.state.proposals.iter().map(|p| p.proposer_id.clone()).collect();
        let votes = self
            .driver
            .run_voting_phase(&players, &proposers, self.matrix.as_ref(), &self.cancel)
            .await;
        for vote in votes {
            self.state = transition(&self.state, Event::SubmitVote(vote))
                .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        }

        let outcome = resolve_vote_outcome(&self.state, &proposers, &self.config);
        self.state = transition(&self.state, Event::AllVotesSubmitted(outcome))
            .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;

        if self.state.phase == Phase::Endgame {
            let event = GameEvent::End(serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null));
            self.persist_and_broadcast(event).await
        } else {
            let event = self.state_update_event();
            self.persist_and_broadcast(event).await
        }
    }

    async fn run_elimination_phase(&mut self) -> EngineResult<()> {
        let proposers: Vec<PlayerId> = self.state.proposals.iter().map(|p| p.proposer_id.clone()).collect();
        if let Some(loser) = pick_elimination_candidate(&self.state, &proposers) {
            self.state = transition(&self.state, Event::Eliminate(vec![loser]))
                .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
            let event = GameEvent::Elimination(
                serde_json::to_value(&self.state).unwrap_or(serde_json::Value::Null),
            );
            self.persist_and_broadcast(event).await?;
        }
        self.state = transition(&self.state, Event::Continue)
            .map_err(|_| EngineError::UnknownGame(self.state.game_id.clone()))?;
        let event = self.state_update_event();
        self.persist_and_broadcast(event).await
    }
}

/// Sums each proposer's votes across *all* voters (eliminated voters
/// included — only proposing is restricted to non-eliminated players).
pub fn vote_totals(state: &GameState, proposers: &[PlayerId]) -> BTreeMap<PlayerId, i64> {
    let mut totals: BTreeMap<PlayerId, i64> = proposers.iter().cloned().map(|p| (p, 0)).collect();
    for ballot in state.votes.values() {
        for (proposer, count) in ballot {
            if let Some(total) = totals.get_mut(proposer) {
                *total += count;
            }
        }
    }
    totals
}

fn two_player_tiebreak(state: &GameState, candidates: [&Proposal; 2]) -> PlayerId {
    let [a, b] = candidates;
    let diff = (a.self_share() - b.self_share()).abs();
    if diff > 5 {
        if a.self_share() < b.self_share() {
            a.proposer_id.clone()
        } else {
            b.proposer_id.clone()
        }
    } else {
        let mut rng = rng_for(state.game_id.as_str(), state.round);
        if rng.next_percent() < 50 {
            a.proposer_id.clone()
        } else {
            b.proposer_id.clone()
        }
    }
}

/// Implements the §4.5 endgame resolution rule: outright win at ≥ the
/// configured win-threshold fraction, else a two-player tiebreak when
/// exactly two non-eliminated proposers remain, else defer to elimination.
pub fn resolve_vote_outcome(
    state: &GameState,
    proposers: &[PlayerId],
    config: &EngineConfig,
) -> VoteOutcome {
    let totals = vote_totals(state, proposers);
    let grand_total: i64 = totals.values().sum();

    if grand_total > 0 {
        if let Some((winner_id, winner_total)) = totals.iter().max_by_key(|(_, v)| **v) {
            let share = *winner_total as f64 / grand_total as f64;
            if share >= config.win_threshold_fraction {
                if let Some(proposal) = state.proposals.iter().find(|p| &p.proposer_id == winner_id) {
                    return VoteOutcome::Winner(proposal.clone());
                }
            }
        }
    }

    let non_eliminated_proposers: Vec<&Proposal> = state
        .proposals
        .iter()
        .filter(|p| !state.eliminated.contains(&p.proposer_id))
        .collect();

    if non_eliminated_proposers.len() == 2 {
        let winner_id = two_player_tiebreak(
            state,
            [non_eliminated_proposers[0], non_eliminated_proposers[1]],
        );
        if let Some(proposal) = state.proposals.iter().find(|p| p.proposer_id == winner_id) {
            return VoteOutcome::Winner(proposal.clone());
        }
    }

    VoteOutcome::NeedsElimination
}

/// Picks the lowest-vote non-eliminated proposer for elimination, with
/// ties broken by a uniform draw seeded from `(gameId, round)`.
pub fn pick_elimination_candidate(state: &GameState, proposers: &[PlayerId]) -> Option<PlayerId> {
    let totals = vote_totals(state, proposers);
    let non_eliminated: Vec<(&PlayerId, &i64)> = totals
        .iter()
        .filter(|(id, _)| !state.eliminated.contains(*id))
        .collect();
    let min = *non_eliminated.iter().map(|(_, v)| *v).min()?;
    let mut tied: Vec<&PlayerId> = non_eliminated
        .into_iter()
        .filter(|(_, v)| **v == min)
        .map(|(id, _)| id)
        .collect();
    tied.sort();
    if tied.len() == 1 {
        return tied.pop().cloned();
    }
    let mut rng = rng_for(state.game_id.as_str(), state.round);
    let index = rng.next_range(tied.len());
    tied.get(index).map(|id| (*id).clone())
}

/// Computes each player's payout from the winning proposal: allocation% ×
/// (player count × entry fee). Players absent from the allocation get 0.
pub fn economic_distribution(
    winner: &Proposal,
    players: &[Player],
    entry_fee: i64,
) -> Vec<Payout> {
    let pool = players.len() as i64 * entry_fee;
    players
        .iter()
        .map(|p| {
            let percent = winner.allocation.get(&p.player_id).copied().unwrap_or(0);
            Payout {
                player_id: p.player_id.clone(),
                amount: percent * pool / 100,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameId;

    fn state_with_votes(votes: &[(&str, &[(&str, i64)])], proposers: &[&str]) -> GameState {
        let mut state = GameState::new(GameId::new("g1"), 10, 10, 5);
        state.round = 1;
        for p in proposers {
            state.proposals.push(Proposal {
                proposer_id: PlayerId::new(*p),
                allocation: BTreeMap::new(),
            });
        }
        for (voter, allocation) in votes {
            let map: BTreeMap<PlayerId, i64> = allocation
                .iter()
                .map(|(id, v)| (PlayerId::new(*id), *v))
                .collect();
            state.votes.insert(PlayerId::new(*voter), map);
        }
        state
    }

    #[test]
    fn scenario_b_supermajority_wins_outright() {
        let state = state_with_votes(
            &[
                ("v1", &[("p1", 100)]),
                ("v2", &[("p1", 100)]),
                ("v3", &[("p1", 50), ("p2", 50)]),
                ("v4", &[("p2", 100)]),
            ],
            &["p1", "p2"],
        );
        let config = EngineConfig::default();
        let proposers = vec![PlayerId::new("p1"), PlayerId::new("p2")];
        let outcome = resolve_vote_outcome(&state, &proposers, &config);
        match outcome {
            VoteOutcome::Winner(p) => assert_eq!(p.proposer_id, PlayerId::new("p1")),
            VoteOutcome::NeedsElimination => panic!("expected outright winner"),
        }
    }

    #[test]
    fn scenario_a_no_outright_winner_eliminates_lowest() {
        let state = state_with_votes(
            &[
                ("a", &[("a", 100)]),
                ("b", &[("b", 100)]),
                ("c", &[("c", 70), ("a", 30)]),
            ],
            &["a", "b", "c"],
        );
        let config = EngineConfig::default();
        let proposers = vec![PlayerId::new("a"), PlayerId::new("b"), PlayerId::new("c")];
        let outcome = resolve_vote_outcome(&state, &proposers, &config);
        assert_eq!(outcome, VoteOutcome::NeedsElimination);
        let loser = pick_elimination_candidate(&state, &proposers).unwrap();
        assert_eq!(loser, PlayerId::new("c"));
    }

    #[test]
    fn scenario_c_tiebreak_favors_lower_self_share_over_threshold() {
        let mut state = state_with_votes(
            &[("v1", &[("p1", 200)]), ("v2", &[("p2", 200)])],
            &["p1", "p2"],
        );
        state.proposals[0].allocation.insert(PlayerId::new("p1"), 40);
        state.proposals[1].allocation.insert(PlayerId::new("p2"), 50);
        let winner = two_player_tiebreak(&state, [&state.proposals[0], &state.proposals[1]]);
        assert_eq!(winner, PlayerId::new("p1"));
    }

    #[test]
    fn economic_distribution_pays_proportionally() {
        let players = vec![Player::new("p1", "p1"), Player::new("p2", "p2")];
        let mut allocation = BTreeMap::new();
        allocation.insert(PlayerId::new("p1"), 60);
        allocation.insert(PlayerId::new("p2"), 40);
        let winner = Proposal {
            proposer_id: PlayerId::new("p1"),
            allocation,
        };
        let payouts = economic_distribution(&winner, &players, 100);
        assert_eq!(payouts[0].amount, 120);
        assert_eq!(payouts[1].amount, 80);
    }
}
