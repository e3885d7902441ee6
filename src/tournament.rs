//! The Tournament Controller (C6): runs a fixed roster of strategies
//! through a series of self-play games, tracks coin balances, and evolves
//! the roster once the tournament is complete.
//!
//! Each game is an ordinary C5-managed game underneath — the controller
//! owns a dedicated [`Orchestrator`] wired with a [`NullWalletVerifier`]
//! since roster strategies have no wallet to sign a `ready` call. Seat
//! assignment across the tournament's games borrows the seeded, offset-
//! style permutation idea from the pack's `match-logic::pairing` (there,
//! circular offsets balance who plays whom; here every game seats the full
//! roster, so what's balanced is which seat — and therefore which speaking
//! position — each strategy draws game to game).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::metrics::Metrics;
use crate::oracle::{AgentOracle, AskOptions};
use crate::orchestrator::{economic_distribution, Orchestrator, Payout};
use crate::persistence::GameStore;
use crate::broadcast::Broadcaster;
use crate::random::rng_for;
use crate::types::{GameId, Player, PlayerId, Proposal, Strategy, StrategyId, WalletType};
use crate::wallet::NullWalletVerifier;

/// A small rotating pool of canonical strategies, substituted when C1
/// fails to synthesize a replacement.
const CANONICAL_POOL: &[(&str, &str)] = &[
    (
        "Steady Splitter",
        "Propose a near-even split, vote for whichever proposal is closest to equal, never threaten.",
    ),
    (
        "Coalition Builder",
        "Seek a voting bloc with two other players early, offer them above-equal shares in exchange for votes.",
    ),
    (
        "Aggressive Maximizer",
        "Propose the largest self-share the floor allows, vote only for proposals that favor you, threaten holdouts.",
    ),
    (
        "Cautious Follower",
        "Wait for others to propose first, vote for the proposal with the broadest support, avoid commitments.",
    ),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentState {
    pub tournament_id: String,
    pub roster: Vec<Strategy>,
    pub games_played: u32,
    pub games_per_tournament: u32,
    pub game_ids: Vec<GameId>,
    pub evolved: bool,
}

/// Persists [`TournamentState`] between runs, the same `save`/`load`
/// contract as [`GameStore`] but keyed by tournament id rather than game id
/// — tournament progress and game state are different objects with
/// different lifetimes, so they get their own store rather than being
/// shoehorned into one.
#[async_trait]
pub trait TournamentStore: Send + Sync {
    async fn save(&self, state: &TournamentState) -> anyhow::Result<()>;
    async fn load(&self, tournament_id: &str) -> anyhow::Result<Option<TournamentState>>;
}

pub struct InMemoryTournamentStore {
    records: Arc<RwLock<HashMap<String, TournamentState>>>,
}

impl InMemoryTournamentStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTournamentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TournamentStore for InMemoryTournamentStore {
    async fn save(&self, state: &TournamentState) -> anyhow::Result<()> {
        self.records
            .write()
            .await
            .insert(state.tournament_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, tournament_id: &str) -> anyhow::Result<Option<TournamentState>> {
        Ok(self.records.read().await.get(tournament_id).cloned())
    }
}

pub struct TournamentController {
    orchestrator: Arc<Orchestrator>,
    tournament_store: Arc<dyn TournamentStore>,
    oracle: Arc<dyn AgentOracle>,
    config: Arc<EngineConfig>,
    metrics: Arc<Metrics>,
}

impl TournamentController {
    pub fn new(
        game_store: Arc<dyn GameStore>,
        broadcaster: Arc<dyn Broadcaster>,
        oracle: Arc<dyn AgentOracle>,
        tournament_store: Arc<dyn TournamentStore>,
        config: Arc<EngineConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            game_store,
            broadcaster,
            oracle.clone(),
            Arc::new(NullWalletVerifier),
            config.clone(),
            metrics.clone(),
        ));
        Self {
            orchestrator,
            tournament_store,
            oracle,
            config,
            metrics,
        }
    }

    pub fn seed_roster(&self, tournament_id: &str) -> Vec<Strategy> {
        (0..self.config.roster_size)
            .map(|i| {
                let (name, strategy) = CANONICAL_POOL[i % CANONICAL_POOL.len()];
                let mut s = Strategy::new(
                    StrategyId::new(format!("{tournament_id}-s{i}")),
                    name,
                    strategy,
                    "canonical",
                );
                s.coin_balance = self.config.starting_balance;
                s
            })
            .collect()
    }

    /// Runs (or resumes) one tournament to completion: plays any
    /// outstanding games, then evolves the roster if it hasn't been
    /// evolved yet. Progress is persisted after every game so a crash
    /// mid-tournament resumes from the last completed game.
    pub async fn run_tournament(
        &self,
        tournament_id: &str,
        initial_roster: Vec<Strategy>,
    ) -> EngineResult<TournamentState> {
        let mut state = match self.tournament_store.load(tournament_id).await {
            Ok(Some(existing)) => existing,
            _ => TournamentState {
                tournament_id: tournament_id.to_string(),
                roster: initial_roster,
                games_played: 0,
                games_per_tournament: self.config.tournament_games_per_tournament,
                game_ids: Vec::new(),
                evolved: false,
            },
        };

        while state.games_played < state.games_per_tournament {
            let game_index = state.games_played;
            let game_id = GameId::new(format!("{tournament_id}-g{game_index}"));
            let payouts = self.play_game(&game_id, &state.roster, game_index).await?;
            apply_payouts(&mut state.roster, &payouts, self.config.entry_fee, &game_id);
            state.games_played += 1;
            state.game_ids.push(game_id);
            let _ = self.tournament_store.save(&state).await;
        }

        if !state.evolved {
            state.roster = self.evolve(state.roster).await;
            state.evolved = true;
            let _ = self.tournament_store.save(&state).await;
        }

        Ok(state)
    }

    /// Plays one game of the tournament: seats the full roster (in a
    /// seeded permutation) as players, joins and readies them, lets the
    /// engine run the game to completion, then converts the winning
    /// proposal into payouts.
    async fn play_game(
        &self,
        game_id: &GameId,
        roster: &[Strategy],
        game_index: u32,
    ) -> EngineResult<Vec<Payout>> {
        self.orchestrator.create(game_id.clone()).await?;
        let seats = seat_order(roster.len(), game_index);

        for &seat in &seats {
            let strategy = &roster[seat];
            self.orchestrator
                .join(game_id, PlayerId::new(strategy.id.as_str()), strategy.name.clone())
                .await?;
        }
        for &seat in &seats {
            let strategy = &roster[seat];
            self.orchestrator
                .ready(
                    game_id,
                    PlayerId::new(strategy.id.as_str()),
                    strategy.strategy.clone(),
                    WalletType::Sol,
                    Vec::new(),
                    Vec::new(),
                )
                .await?;
        }

        let final_state = self.orchestrator.snapshot(game_id).await?;
        self.orchestrator.shutdown(game_id).await;

        let entry_fee = self.config.entry_fee;
        let winner = final_state
            .winner_proposal
            .clone()
            .unwrap_or_else(|| equal_split_fallback(&final_state.players));
        Ok(economic_distribution(&winner, &final_state.players, entry_fee))
    }

    /// Eliminates bankrupt strategies (or, absent any, the bottom two by
    /// balance), synthesizes a replacement for each, and conserves total
    /// coinage across the swap.
    async fn evolve(&self, roster: Vec<Strategy>) -> Vec<Strategy> {
        let pre_total: i64 = roster.iter().map(|s| s.coin_balance).sum();
        let median_balance = median(&roster.iter().map(|s| s.coin_balance).collect::<Vec<_>>());

        let bankrupt: Vec<usize> = roster
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_bankrupt(self.config.bankruptcy_threshold))
            .map(|(i, _)| i)
            .collect();

        let (eliminated_idx, branch) = if !bankrupt.is_empty() {
            (bankrupt, "bankruptcy")
        } else {
            let mut by_balance: Vec<usize> = (0..roster.len()).collect();
            by_balance.sort_by_key(|&i| roster[i].coin_balance);
            (by_balance.into_iter().take(2).collect(), "forced")
        };
        self.metrics.observe_evolution(branch);

        let mut survivor_idx: Vec<usize> = (0..roster.len())
            .filter(|i| !eliminated_idx.contains(i))
            .collect();
        survivor_idx.sort_by_key(|&i| std::cmp::Reverse(roster[i].coin_balance));

        let top_two: Vec<&Strategy> = survivor_idx.iter().take(2).map(|&i| &roster[i]).collect();
        let starting_balance = self.config.starting_balance;

        let mut survivors: Vec<Strategy> = survivor_idx.iter().map(|&i| roster[i].clone()).collect();
        let mut new_strategies = Vec::with_capacity(eliminated_idx.len());
        for (n, &idx) in eliminated_idx.iter().enumerate() {
            let eliminated = &roster[idx];
            let mut synthesized = self
                .synthesize_strategy(&eliminated.id, &top_two, starting_balance, n)
                .await;
            synthesized.coin_balance = median_balance;
            new_strategies.push(synthesized);
        }

        let eliminated_total: i64 = eliminated_idx.iter().map(|&i| roster[i].coin_balance).sum();
        let new_total: i64 = median_balance * new_strategies.len() as i64;
        let delta = eliminated_total - new_total;
        conserve_coinage(&mut survivors, delta);

        let mut evolved = survivors;
        evolved.extend(new_strategies);

        let post_total: i64 = evolved.iter().map(|s| s.coin_balance).sum();
        debug_assert_eq!(
            pre_total, post_total,
            "tournament coinage must be conserved across evolution"
        );
        if pre_total != post_total {
            warn!(pre_total, post_total, "coinage conservation drifted, correcting on top survivor");
            if let Some(top) = evolved.iter_mut().max_by_key(|s| s.coin_balance) {
                top.coin_balance += pre_total - post_total;
            }
        }
        evolved
    }

    async fn synthesize_strategy(
        &self,
        eliminated_id: &StrategyId,
        inspirations: &[&Strategy],
        starting_balance: i64,
        ordinal: usize,
    ) -> Strategy {
        let weights = inspiration_weights(inspirations, starting_balance);
        let prompt = format!(
            "Two strategies are inspiring a replacement for an eliminated strategy. \
             Inspiration 1 (weight {:.2}): {}. Inspiration 2 (weight {:.2}): {}. \
             Reply with a short JSON object {{\"name\": ..., \"strategy\": ...}} \
             describing a new, distinct competitive strategy.",
            weights.0,
            inspirations.first().map(|s| s.strategy.as_str()).unwrap_or(""),
            weights.1,
            inspirations.get(1).map(|s| s.strategy.as_str()).unwrap_or(""),
        );
        let new_id = StrategyId::new(format!("{}-evo-{ordinal}", eliminated_id.as_str()));
        match self.oracle.ask("tournament-synthesis", &prompt, &AskOptions::default()).await {
            Ok(raw) => match parse_synthesis(&raw) {
                Some((name, strategy)) => Strategy::new(new_id, name, strategy, "synthesized"),
                None => canonical_fallback(new_id, ordinal),
            },
            Err(e) => {
                self.metrics.observe_oracle_failure("tournament_synthesis");
                info!(error = %e, "synthesis call failed, substituting canonical strategy");
                canonical_fallback(new_id, ordinal)
            }
        }
    }
}

fn canonical_fallback(id: StrategyId, ordinal: usize) -> Strategy {
    let (name, strategy) = CANONICAL_POOL[ordinal % CANONICAL_POOL.len()];
    Strategy::new(id, name, strategy, "canonical")
}

/// Parses the `{"name": ..., "strategy": ...}` synthesis response
/// tolerantly — adversarial/short LLM output must degrade to the
/// canonical pool, never panic.
fn parse_synthesis(raw: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let strategy = value.get("strategy")?.as_str()?.to_string();
    if name.is_empty() || strategy.is_empty() {
        return None;
    }
    Some((name, strategy))
}

/// Weight of each of up to two inspirations, proportional to profit above
/// the starting balance; falls back to an even 50/50 split when neither is
/// above baseline (a new strategy with no edge to draw weight from).
fn inspiration_weights(inspirations: &[&Strategy], starting_balance: i64) -> (f64, f64) {
    let profit = |s: &Strategy| (s.coin_balance - starting_balance).max(0) as f64;
    let p0 = inspirations.first().map(|s| profit(s)).unwrap_or(0.0);
    let p1 = inspirations.get(1).map(|s| profit(s)).unwrap_or(0.0);
    let total = p0 + p1;
    if total <= 0.0 {
        (0.5, 0.5)
    } else {
        (p0 / total, p1 / total)
    }
}

/// Median of a balance list, matching spec's worked example: for an even
/// count this is the average of the two middle values once sorted.
fn median(balances: &[i64]) -> i64 {
    if balances.is_empty() {
        return 0;
    }
    let mut sorted = balances.to_vec();
    sorted.sort();
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2
    } else {
        sorted[n / 2]
    }
}

/// Distributes `delta` (the coinage freed or owed by synthesizing new
/// strategies at the median rather than at the eliminated total) evenly
/// across survivors, with any remainder going to the strongest survivor.
fn conserve_coinage(survivors: &mut [Strategy], delta: i64) {
    if survivors.is_empty() || delta == 0 {
        return;
    }
    let share = delta / survivors.len() as i64;
    let remainder = delta - share * survivors.len() as i64;
    for s in survivors.iter_mut() {
        s.coin_balance += share;
    }
    if let Some(top) = survivors.iter_mut().max_by_key(|s| s.coin_balance) {
        top.coin_balance += remainder;
    }
}

/// A deterministic permutation of roster seats for one game index, derived
/// the same way `match-logic::pairing` derives its per-match RNG: seeded
/// from a stable key plus an index, so a replay of the same tournament
/// produces the same seat order every time.
fn seat_order(roster_len: usize, game_index: u32) -> Vec<usize> {
    let mut seats: Vec<usize> = (0..roster_len).collect();
    let mut rng = rng_for("tournament-seats", game_index);
    rng.shuffle(&mut seats);
    seats
}

fn equal_split_fallback(players: &[Player]) -> Proposal {
    let n = players.len().max(1) as i64;
    let base = 100 / n;
    let mut allocation: std::collections::BTreeMap<PlayerId, i64> = players
        .iter()
        .map(|p| (p.player_id.clone(), base))
        .collect();
    let drift = 100 - base * n;
    if let Some(first) = players.first() {
        if let Some(v) = allocation.get_mut(&first.player_id) {
            *v += drift;
        }
    }
    Proposal {
        proposer_id: players.first().map(|p| p.player_id.clone()).unwrap_or_else(|| PlayerId::new("none")),
        allocation,
    }
}

fn apply_payouts(roster: &mut [Strategy], payouts: &[Payout], entry_fee: i64, game_id: &GameId) {
    let winner_id = payouts
        .iter()
        .max_by_key(|p| p.amount)
        .map(|p| p.player_id.clone());
    for strategy in roster.iter_mut() {
        let payout = payouts
            .iter()
            .find(|p| p.player_id.as_str() == strategy.id.as_str());
        let Some(payout) = payout else { continue };
        strategy.coin_balance += payout.amount - entry_fee;
        strategy.games_played += 1;
        strategy.total_invested += entry_fee;
        strategy.total_returned += payout.amount;
        if winner_id.as_deref() == Some(strategy.id.as_str()) && payout.amount > 0 {
            strategy.win_history.push(game_id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(id: &str, balance: i64) -> Strategy {
        let mut s = Strategy::new(StrategyId::new(id), id, "split evenly", "canonical");
        s.coin_balance = balance;
        s
    }

    #[test]
    fn median_matches_scenario_f_worked_example() {
        let balances = vec![900, 700, 600, 500, 300, 0];
        assert_eq!(median(&balances), 550);
    }

    #[test]
    fn seat_order_is_a_permutation_and_deterministic() {
        let a = seat_order(6, 3);
        let b = seat_order(6, 3);
        assert_eq!(a, b);
        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn conserve_coinage_keeps_total_and_gives_remainder_to_top() {
        let mut survivors = vec![strategy("a", 900), strategy("b", 300)];
        let pre: i64 = survivors.iter().map(|s| s.coin_balance).sum();
        conserve_coinage(&mut survivors, 7);
        let post: i64 = survivors.iter().map(|s| s.coin_balance).sum();
        assert_eq!(post, pre + 7);
    }

    #[test]
    fn apply_payouts_computes_profit_and_win_history() {
        let mut roster = vec![strategy("a", 500), strategy("b", 500)];
        let payouts = vec![
            Payout { player_id: PlayerId::new("a"), amount: 150 },
            Payout { player_id: PlayerId::new("b"), amount: 50 },
        ];
        apply_payouts(&mut roster, &payouts, 100, &GameId::new("g0"));
        assert_eq!(roster[0].coin_balance, 550);
        assert_eq!(roster[1].coin_balance, 450);
        assert_eq!(roster[0].win_history.len(), 1);
        assert!(roster[1].win_history.is_empty());
    }

    #[test]
    fn bankruptcy_branch_beats_forced_evolution_when_present() {
        let roster = vec![
            strategy("a", 900),
            strategy("b", 700),
            strategy("c", 600),
            strategy("d", 500),
            strategy("e", 300),
            strategy("f", 50),
        ];
        let bankrupt: Vec<usize> = roster
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_bankrupt(100))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(bankrupt, vec![5]);
    }
}
