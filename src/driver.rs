//! The Agent Driver (C4): drives one phase to completion by calling every
//! eligible agent concurrently, validating outputs, and folding the
//! (canonically ordered) results back into state.
//!
//! Fan-out follows the same shape as the teacher's `handlers::
//! featured_markets` (`futures::future::join_all` over per-market
//! blockchain lookups), generalized to a `buffer_unordered` bound so
//! concurrency never exceeds `EngineConfig.oracle_max_concurrency`.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::matrix::MatrixSubstrate;
use crate::metrics::Metrics;
use crate::oracle::{AgentOracle, AskOptions};
use crate::phase::GameState;
use crate::types::{Player, PlayerId, Proposal, Vote};

const FULL_SYSTEM_PREAMBLE: &str = "You are negotiating in a multi-agent token allocation game. \
Respond with a JSON object describing your full matrix row and an explanation.";
const SHORT_SYSTEM_PREAMBLE: &str =
    "Respond only with a small JSON object: {\"explanation\": str, \"matrixRow\": [numbers]}.";

pub struct AgentDriver {
    oracle: Arc<dyn AgentOracle>,
    config: Arc<EngineConfig>,
    metrics: Arc<Metrics>,
}

impl AgentDriver {
    pub fn new(oracle: Arc<dyn AgentOracle>, config: Arc<EngineConfig>, metrics: Arc<Metrics>) -> Self {
        Self {
            oracle,
            config,
            metrics,
        }
    }

    fn matrix_prompt(&self, matrix: &MatrixSubstrate, round: u32, degrade: bool) -> String {
        if degrade {
            format!(
                "Round {round}. {SHORT_SYSTEM_PREAMBLE}"
            )
        } else {
            format!(
                "Round {round}. Current matrix:\n{}\n{FULL_SYSTEM_PREAMBLE}",
                matrix.display_results()
            )
        }
    }

    /// Drives every matrix sub-round of the negotiation phase. Agents are
    /// called in parallel within a sub-round, bounded by
    /// `oracle_max_concurrency`; the fold back into `matrix` happens in
    /// canonical player-index order so identical oracle outputs always
    /// produce identical matrix state.
    pub async fn run_negotiation_phase(
        &self,
        players: &[Player],
        matrix: &mut MatrixSubstrate,
        round: u32,
        eliminated: &std::collections::HashSet<PlayerId>,
        cancel: &CancellationToken,
    ) {
        for sub_round in 1..=self.config.matrix_sub_rounds {
            if cancel.is_cancelled() {
                return;
            }
            let degrade = self.oracle.should_degrade().await;
            let prompt = self.matrix_prompt(matrix, round, degrade);

            let results = self
                .fan_out(players, &prompt, cancel, |player, prompt| {
                    let oracle = self.oracle.clone();
                    let player_id = player.player_id.clone();
                    let prompt = prompt.to_string();
                    async move {
                        oracle
                            .ask(player_id.as_str(), &prompt, &AskOptions::default())
                            .await
                    }
                })
                .await;

            for (index, result) in results.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    return;
                }
                let is_eliminated = eliminated.contains(&players[index].player_id);
                match result {
                    Ok(raw) => {
                        let accepted = matrix.apply_update(
                            index,
                            round,
                            is_eliminated,
                            self.config.self_share_floor,
                            &raw,
                        );
                        self.metrics.observe_oracle_call(if accepted { "ok" } else { "rejected" });
                    }
                    Err(err) => {
                        self.metrics.observe_oracle_failure(oracle_failure_label(&err));
                        // Auto-play: a player who can't be reached (disconnected,
                        // timed out, rate limited) still gets a row this
                        // sub-round, so the phase never stalls on one agent.
                        let default_row =
                            default_matrix_row_json(matrix.players.len(), index, self.config.self_share_floor);
                        matrix.apply_update(
                            index,
                            round,
                            is_eliminated,
                            self.config.self_share_floor,
                            &default_row,
                        );
                    }
                }
            }
            let _ = sub_round;
        }
    }

    /// Derives one proposal per non-eliminated player, preferring the
    /// frozen matrix row (no oracle call needed) and falling back to a
    /// concurrent free-form oracle call per player only when no matrix is
    /// available for this game.
    pub async fn run_proposal_phase(
        &self,
        players: &[Player],
        eliminated: &std::collections::HashSet<PlayerId>,
        matrix: Option<&MatrixSubstrate>,
        cancel: &CancellationToken,
    ) -> Vec<Proposal> {
        let all_ids: Vec<PlayerId> = players.iter().map(|p| p.player_id.clone()).collect();
        let eligible: Vec<Player> = players
            .iter()
            .filter(|p| !eliminated.contains(&p.player_id))
            .cloned()
            .collect();

        let raw_proposals: Vec<Proposal> = if let Some(matrix) = matrix {
            eligible
                .iter()
                .map(|player| {
                    let row_index = players
                        .iter()
                        .position(|p| p.player_id == player.player_id)
                        .expect("player present in roster");
                    let amounts = matrix.proposal_from_row(row_index);
                    build_proposal(&player.player_id, &all_ids, &amounts)
                })
                .collect()
        } else {
            self.free_form_proposals(&eligible, &all_ids, cancel).await
        };

        let mut proposals = Vec::with_capacity(raw_proposals.len());
        for proposal in raw_proposals {
            match validate_proposal(&proposal, &all_ids, self.config.self_share_floor) {
                Ok(()) => proposals.push(proposal),
                Err(reason) => {
                    self.metrics.observe_proposal_fallback(&reason.to_string());
                    proposals.push(equal_split_proposal(
                        &proposal.proposer_id,
                        &all_ids,
                        self.config.self_share_floor,
                    ));
                }
            }
        }
        proposals
    }

    /// Fans every eligible player's free-form proposal call out concurrently
    /// (bounded by `oracle_max_concurrency`), same shape as the negotiation
    /// loop's `fan_out` call, each call raced against `cancel`.
    async fn free_form_proposals(
        &self,
        eligible: &[Player],
        all_ids: &[PlayerId],
        cancel: &CancellationToken,
    ) -> Vec<Proposal> {
        let prompt = format!(
            "Propose a percentage split of the pool across players {:?} as JSON {{playerId: percent}}.",
            all_ids
        );
        let results = self
            .fan_out(eligible, &prompt, cancel, |player, prompt| {
                let oracle = self.oracle.clone();
                let player_id = player.player_id.clone();
                let prompt = prompt.to_string();
                async move { oracle.ask(player_id.as_str(), &prompt, &AskOptions::default()).await }
            })
            .await;

        eligible
            .iter()
            .zip(results)
            .map(|(player, response)| match response {
                Ok(raw) => parse_allocation(&raw)
                    .map(|allocation| Proposal {
                        proposer_id: player.player_id.clone(),
                        allocation,
                    })
                    .unwrap_or_else(|| equal_split_proposal(&player.player_id, all_ids, 0)),
                Err(_) => equal_split_proposal(&player.player_id, all_ids, 0),
            })
            .collect()
    }

    /// Derives one vote per player (eliminated players still vote), via
    /// `VoteFromRow` when a matrix exists, else a concurrent free-form
    /// oracle call per player.
    pub async fn run_voting_phase(
        &self,
        players: &[Player],
        proposers: &[PlayerId],
        matrix: Option<&MatrixSubstrate>,
        cancel: &CancellationToken,
    ) -> Vec<Vote> {
        let raw_votes: Vec<Vote> = if let Some(matrix) = matrix {
            players
                .iter()
                .map(|player| {
                    let row_index = players
                        .iter()
                        .position(|p| p.player_id == player.player_id)
                        .expect("player present in roster");
                    let pairs = matrix.vote_from_row(row_index, proposers);
                    Vote {
                        voter_id: player.player_id.clone(),
                        allocation: pairs.into_iter().collect(),
                    }
                })
                .collect()
        } else {
            self.free_form_votes(players, proposers, cancel).await
        };

        let mut votes = Vec::with_capacity(raw_votes.len());
        for vote in raw_votes {
            match validate_vote(&vote, proposers) {
                Ok(()) => votes.push(vote),
                Err(reason) => {
                    self.metrics.observe_vote_fallback(&reason.to_string());
                    votes.push(equal_split_vote(&vote.voter_id, proposers));
                }
            }
        }
        votes
    }

    /// Fans every player's free-form vote call out concurrently, same shape
    /// as `free_form_proposals`.
    async fn free_form_votes(
        &self,
        players: &[Player],
        proposers: &[PlayerId],
        cancel: &CancellationToken,
    ) -> Vec<Vote> {
        let prompt = format!(
            "Distribute your 100 votes across proposers {:?} as JSON {{playerId: count}}.",
            proposers
        );
        let results = self
            .fan_out(players, &prompt, cancel, |player, prompt| {
                let oracle = self.oracle.clone();
                let player_id = player.player_id.clone();
                let prompt = prompt.to_string();
                async move { oracle.ask(player_id.as_str(), &prompt, &AskOptions::default()).await }
            })
            .await;

        players
            .iter()
            .zip(results)
            .map(|(player, response)| match response {
                Ok(raw) => parse_allocation(&raw)
                    .map(|allocation| Vote {
                        voter_id: player.player_id.clone(),
                        allocation,
                    })
                    .unwrap_or_else(|| equal_split_vote(&player.player_id, proposers)),
                Err(_) => equal_split_vote(&player.player_id, proposers),
            })
            .collect()
    }

    /// Bounded concurrent fan-out shared by the negotiation loop and both
    /// free-form fallback paths.
    ///
    /// `buffer_unordered` completes calls in whatever order finishes first,
    /// so each task carries its player index through and the results are
    /// re-sorted back into canonical order before returning — the fold into
    /// the matrix must be index-ordered regardless of completion order.
    async fn fan_out<F, Fut>(
        &self,
        players: &[Player],
        prompt: &str,
        cancel: &CancellationToken,
        make_call: F,
    ) -> Vec<Result<String, crate::error::OracleError>>
    where
        F: Fn(&Player, &str) -> Fut,
        Fut: std::future::Future<Output = Result<String, crate::error::OracleError>>,
    {
        let tasks = players.iter().enumerate().map(|(index, player)| {
            let fut = make_call(player, prompt);
            let cancel = cancel.clone();
            async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(crate::error::OracleError::Timeout),
                    result = fut => result,
                };
                (index, result)
            }
        });

        let mut indexed: Vec<(usize, Result<String, crate::error::OracleError>)> = stream::iter(tasks)
            .buffer_unordered(self.config.oracle_max_concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

fn oracle_failure_label(err: &crate::error::OracleError) -> &'static str {
    match err {
        crate::error::OracleError::RateLimited => "rate_limited",
        crate::error::OracleError::Timeout => "timeout",
        crate::error::OracleError::UpstreamError(_) => "upstream_error",
        crate::error::OracleError::ParseErrorUpstream(_) => "parse_error",
    }
}

/// The row auto-submitted on a player's turn when their agent can't be
/// reached: a uniform split with the owner's self-share pinned at the
/// floor, zero vote offers/requests.
fn default_matrix_row_json(n: usize, owner_index: usize, self_share_floor: i64) -> String {
    if n == 0 {
        return serde_json::json!({"explanation": "auto-play default row for an empty roster, nothing to split.", "matrixRow": Vec::<f64>::new()}).to_string();
    }
    let self_share = self_share_floor.clamp(0, 100);
    let remainder = 100 - self_share;
    let share = remainder / (n as i64 - 1).max(1);
    let mut proposal = vec![share; n];
    proposal[owner_index] = self_share;
    let drift = 100 - proposal.iter().sum::<i64>();
    let bump_index = if owner_index == n - 1 { 0 } else { n - 1 };
    proposal[bump_index] += drift;

    let vote_allocation = proposal.clone();
    let zeros = vec![0i64; n];
    let matrix_row: Vec<f64> = proposal
        .into_iter()
        .chain(vote_allocation)
        .chain(zeros.clone())
        .chain(zeros)
        .map(|v| v as f64)
        .collect();
    serde_json::json!({
        "explanation": "auto-play default row submitted because the owning agent did not respond in time, using a uniform split and the configured self-share floor.",
        "matrixRow": matrix_row,
    })
    .to_string()
}

fn build_proposal(owner: &PlayerId, all_ids: &[PlayerId], amounts: &[i64]) -> Proposal {
    let allocation = all_ids
        .iter()
        .cloned()
        .zip(amounts.iter().copied())
        .collect::<BTreeMap<_, _>>();
    Proposal {
        proposer_id: owner.clone(),
        allocation,
    }
}

fn equal_split_proposal(owner: &PlayerId, all_ids: &[PlayerId], self_share_floor: i64) -> Proposal {
    let n = all_ids.len() as i64;
    let base = (100 - self_share_floor.min(100)).max(0) / (n - 1).max(1);
    let mut allocation: BTreeMap<PlayerId, i64> = all_ids
        .iter()
        .cloned()
        .map(|id| (id, if &id == owner { 0 } else { base }))
        .collect();
    let owner_share = 100 - base * (n - 1).max(0);
    allocation.insert(owner.clone(), owner_share.max(self_share_floor));
    let sum: i64 = allocation.values().sum();
    let drift = 100 - sum;
    if let Some(v) = allocation.get_mut(owner) {
        *v += drift;
    }
    Proposal {
        proposer_id: owner.clone(),
        allocation,
    }
}

fn equal_split_vote(voter: &PlayerId, proposers: &[PlayerId]) -> Vote {
    let n = proposers.len().max(1) as i64;
    let base = 100 / n;
    let mut allocation: BTreeMap<PlayerId, i64> =
        proposers.iter().cloned().map(|id| (id, base)).collect();
    let drift = 100 - base * n;
    if let Some(first) = proposers.first() {
        if let Some(v) = allocation.get_mut(first) {
            *v += drift;
        }
    }
    Vote {
        voter_id: voter.clone(),
        allocation,
    }
}

fn parse_allocation(raw: &str) -> Option<BTreeMap<PlayerId, i64>> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let mut allocation = BTreeMap::new();
    for (key, v) in object {
        let amount = v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))?;
        allocation.insert(PlayerId::new(key.clone()), amount);
    }
    Some(allocation)
}

fn validate_proposal(
    proposal: &Proposal,
    all_ids: &[PlayerId],
    self_share_floor: i64,
) -> Result<(), ValidationError> {
    let expected: std::collections::BTreeSet<&PlayerId> = all_ids.iter().collect();
    let actual: std::collections::BTreeSet<&PlayerId> = proposal.allocation.keys().collect();
    if expected != actual {
        return Err(ValidationError::ProposalKeysMismatch);
    }
    let sum = proposal.sum();
    if !(99..=101).contains(&sum) {
        return Err(ValidationError::ProposalSumInvalid { actual: sum });
    }
    if proposal.self_share() < self_share_floor {
        return Err(ValidationError::SelfShareBelowFloor {
            actual: proposal.self_share(),
            floor: self_share_floor,
        });
    }
    Ok(())
}

fn validate_vote(vote: &Vote, proposers: &[PlayerId]) -> Result<(), ValidationError> {
    let allowed: std::collections::BTreeSet<&PlayerId> = proposers.iter().collect();
    if !vote.allocation.keys().all(|k| allowed.contains(k)) {
        return Err(ValidationError::VoteKeysMismatch);
    }
    let sum = vote.sum();
    if !(99..=101).contains(&sum) {
        return Err(ValidationError::VoteSumInvalid { actual: sum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockAgentOracle;

    fn three_players() -> Vec<Player> {
        vec![Player::new("a", "a"), Player::new("b", "b"), Player::new("c", "c")]
    }

    #[test]
    fn equal_split_proposal_sums_to_100() {
        let ids: Vec<PlayerId> = three_players().iter().map(|p| p.player_id.clone()).collect();
        let proposal = equal_split_proposal(&ids[0], &ids, 17);
        assert_eq!(proposal.sum(), 100);
        assert!(proposal.self_share() >= 17);
    }

    #[test]
    fn equal_split_vote_sums_to_100() {
        let ids: Vec<PlayerId> = three_players().iter().map(|p| p.player_id.clone()).collect();
        let vote = equal_split_vote(&ids[0], &ids);
        assert_eq!(vote.sum(), 100);
    }

    #[tokio::test]
    async fn proposal_phase_falls_back_on_missing_matrix_when_oracle_output_is_bad() {
        let oracle = Arc::new(MockAgentOracle::new("not json"));
        let config = Arc::new(EngineConfig::default());
        let metrics = Arc::new(Metrics::new());
        let driver = AgentDriver::new(oracle, config, metrics);
        let players = three_players();
        let cancel = CancellationToken::new();
        let proposals = driver
            .run_proposal_phase(&players, &Default::default(), None, &cancel)
            .await;
        assert_eq!(proposals.len(), 3);
        for proposal in &proposals {
            assert_eq!(proposal.sum(), 100);
        }
    }

    #[tokio::test]
    async fn voting_phase_falls_back_on_missing_matrix_when_oracle_output_is_bad() {
        let oracle = Arc::new(MockAgentOracle::new("not json"));
        let config = Arc::new(EngineConfig::default());
        let metrics = Arc::new(Metrics::new());
        let driver = AgentDriver::new(oracle, config, metrics);
        let players = three_players();
        let proposers: Vec<PlayerId> = players.iter().map(|p| p.player_id.clone()).collect();
        let cancel = CancellationToken::new();
        let votes = driver.run_voting_phase(&players, &proposers, None, &cancel).await;
        assert_eq!(votes.len(), 3);
        for vote in &votes {
            assert_eq!(vote.sum(), 100);
        }
    }

    #[test]
    fn default_row_sums_to_100_with_self_share_at_floor() {
        let raw = default_matrix_row_json(3, 1, 17);
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let row: Vec<f64> = value["matrixRow"].as_array().unwrap().iter().map(|v| v.as_f64().unwrap()).collect();
        let proposal_sum: f64 = row[0..3].iter().sum();
        assert_eq!(proposal_sum.round() as i64, 100);
        assert_eq!(row[1].round() as i64, 17);
    }

    #[tokio::test]
    async fn disconnected_player_still_gets_a_matrix_row_scenario_e() {
        let oracle = Arc::new(MockAgentOracle::new("not json"));
        oracle
            .program_error("b", crate::error::OracleError::Timeout)
            .await;
        let config = Arc::new(EngineConfig::default());
        let metrics = Arc::new(Metrics::new());
        let driver = AgentDriver::new(oracle.clone(), config, metrics);
        let players = three_players();
        let player_ids: Vec<PlayerId> = players.iter().map(|p| p.player_id.clone()).collect();
        let mut matrix = crate::matrix::MatrixSubstrate::initialize(&player_ids);
        let cancel = CancellationToken::new();

        driver
            .run_negotiation_phase(&players, &mut matrix, 1, &Default::default(), &cancel)
            .await;

        let b_index = player_ids.iter().position(|id| id.as_str() == "b").unwrap();
        assert!(matrix.rows[b_index].modification_count >= 1);
        assert_eq!(matrix.proposal_from_row(b_index).iter().sum::<i64>(), 100);
    }
}
