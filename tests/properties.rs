//! Property-based invariants over the public surface: matrix rows, vote
//! shares, and persistence round-trips must hold for arbitrary valid
//! inputs, not just the hand-picked cases in the colocated unit tests.

use std::collections::{BTreeSet, HashSet};

use accord_engine::matrix::MatrixSubstrate;
use accord_engine::orchestrator::{pick_elimination_candidate, resolve_vote_outcome, vote_totals};
use accord_engine::persistence::{GameStore, InMemoryGameStore};
use accord_engine::phase::{GameState, Phase};
use accord_engine::types::{GameId, Player, PlayerId, Proposal};
use proptest::prelude::*;

fn row_json(n: usize, self_share: f64, explanation: &str) -> String {
    let rest = if n > 1 { (100.0 - self_share) / (n - 1) as f64 } else { 0.0 };
    let mut proposal = vec![rest; n];
    if n > 0 {
        proposal[0] = self_share;
    }
    let votes = proposal.clone();
    let mut row = proposal;
    row.extend(votes);
    row.extend(vec![0.0; n]);
    row.extend(vec![0.0; n]);
    serde_json::json!({ "explanation": explanation, "matrixRow": row }).to_string()
}

fn long_explanation() -> String {
    "a".repeat(60)
}

fn players(n: usize) -> Vec<PlayerId> {
    (0..n).map(|i| PlayerId::new(format!("p{i}"))).collect()
}

proptest! {
    /// Invariant 1/3: every accepted matrix row's proposal section sums to
    /// ~100, and `proposal_from_row` always sums to exactly 100.
    #[test]
    fn proposal_section_sums_to_100(n in 2usize..6, self_share in 17.0f64..90.0) {
        let ps = players(n);
        let mut substrate = MatrixSubstrate::initialize(&ps);
        let raw = row_json(n, self_share, &long_explanation());
        let accepted = substrate.apply_update(0, 1, false, 17, &raw);
        prop_assert!(accepted);
        let proposal = substrate.proposal_from_row(0);
        prop_assert_eq!(proposal.iter().sum::<i64>(), 100);
    }

    /// Invariant 2: `vote_from_row` always sums to exactly 100, over any
    /// subset of proposers (including ones the row has no column for).
    #[test]
    fn vote_section_sums_to_100(n in 2usize..6, self_share in 17.0f64..90.0, subset_len in 1usize..6) {
        let ps = players(n);
        let mut substrate = MatrixSubstrate::initialize(&ps);
        let raw = row_json(n, self_share, &long_explanation());
        substrate.apply_update(0, 1, false, 17, &raw);
        let extra: Vec<PlayerId> = (0..subset_len).map(|i| PlayerId::new(format!("extra{i}"))).collect();
        let votes = substrate.vote_from_row(0, &extra);
        prop_assert_eq!(votes.iter().map(|(_, v)| v).sum::<i64>(), 100);
    }

    /// Invariant 3: every cell of an accepted row stays within [0, 100],
    /// and the owner's self-share never drops below the configured floor
    /// when the owner is not eliminated.
    #[test]
    fn accepted_row_cells_stay_in_range_and_respect_floor(n in 2usize..6, self_share in 17.0f64..90.0) {
        let ps = players(n);
        let mut substrate = MatrixSubstrate::initialize(&ps);
        let raw = row_json(n, self_share, &long_explanation());
        let accepted = substrate.apply_update(0, 1, false, 17, &raw);
        prop_assert!(accepted);
        let matrix = substrate.get_matrix();
        for cell in &matrix[0] {
            prop_assert!(*cell >= 0.0 && *cell <= 100.0);
        }
        prop_assert!(substrate.rows[0].proposal[0] >= 17.0);
    }

    /// Invariant 4: ownership enforcement only ever admits a write where
    /// owner index equals caller index; every mismatch is logged as a
    /// violation and refused.
    #[test]
    fn ownership_never_crosses_rows(owner in 0usize..6, caller in 0usize..6) {
        let ps = players(6);
        let mut substrate = MatrixSubstrate::initialize(&ps);
        let before = substrate.violations.len();
        let admitted = substrate.enforce_ownership(owner, caller, 1);
        if owner == caller {
            prop_assert!(admitted);
            prop_assert_eq!(substrate.violations.len(), before);
        } else {
            prop_assert!(!admitted);
            prop_assert_eq!(substrate.violations.len(), before + 1);
        }
    }

    /// Invariant 8: a game state saved then loaded back from the store is
    /// equal to the original modulo serialization.
    #[test]
    fn persistence_round_trips_losslessly(n in 2usize..6, round in 0u32..9) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = InMemoryGameStore::new();
            let mut state = GameState::new(GameId::new("prop-game"), 10, 10, 5);
            state.round = round;
            for i in 0..n {
                state.players.push(Player::new(format!("p{i}"), format!("name{i}")));
            }
            store.save(&state).await.unwrap();
            let loaded = store.load(&state.game_id).await.unwrap().unwrap();
            prop_assert_eq!(loaded.round, state.round);
            prop_assert_eq!(loaded.players.len(), state.players.len());
            prop_assert_eq!(loaded.phase, state.phase);
            Ok(())
        })?;
    }

    /// Invariant 6: whenever the vote-resolution logic declares a winner,
    /// either that proposal's vote share met the threshold, or exactly two
    /// proposers remained (the tiebreak carve-out).
    #[test]
    fn winner_threshold_or_two_player_tiebreak(
        shares in prop::collection::vec(0i64..300, 2..5),
    ) {
        let mut state = GameState::new(GameId::new("g"), 10, 10, 5);
        state.round = 1;
        let proposer_ids: Vec<PlayerId> = (0..shares.len()).map(|i| PlayerId::new(format!("p{i}"))).collect();
        for (i, id) in proposer_ids.iter().enumerate() {
            state.players.push(Player::new(id.as_str(), id.as_str()));
            let mut allocation = std::collections::BTreeMap::new();
            allocation.insert(id.clone(), 40 + (i as i64 * 5).min(50));
            state.proposals.push(Proposal { proposer_id: id.clone(), allocation });
        }
        // Every proposer casts all their declared weight for themselves.
        for (i, id) in proposer_ids.iter().enumerate() {
            let mut allocation = std::collections::BTreeMap::new();
            allocation.insert(id.clone(), shares[i]);
            state.votes.insert(id.clone(), allocation);
        }

        let config = accord_engine::EngineConfig::default();
        let outcome = resolve_vote_outcome(&state, &proposer_ids, &config);
        let totals = vote_totals(&state, &proposer_ids);
        let total: i64 = totals.values().sum();

        if let accord_engine::phase::VoteOutcome::Winner(p) = outcome {
            let winner_votes = totals.get(&p.proposer_id).copied().unwrap_or(0);
            let share = if total > 0 { winner_votes as f64 / total as f64 } else { 0.0 };
            prop_assert!(share >= config.win_threshold_fraction || proposer_ids.len() == 2);
        }
    }

    /// Invariant 5 (partial): a `None` elimination candidate never fires
    /// among non-empty proposer sets with distinct vote totals, and the
    /// chosen candidate is always drawn from the non-eliminated proposers.
    #[test]
    fn elimination_candidate_is_always_a_known_proposer(
        totals in prop::collection::vec(0i64..100, 2..6),
    ) {
        let mut state = GameState::new(GameId::new("g"), 10, 10, 5);
        state.round = 1;
        let proposer_ids: Vec<PlayerId> = (0..totals.len()).map(|i| PlayerId::new(format!("p{i}"))).collect();
        for id in &proposer_ids {
            state.players.push(Player::new(id.as_str(), id.as_str()));
        }
        for (i, id) in proposer_ids.iter().enumerate() {
            let mut allocation = std::collections::BTreeMap::new();
            allocation.insert(id.clone(), totals[i]);
            state.votes.insert(id.clone(), allocation);
        }
        let candidate = pick_elimination_candidate(&state, &proposer_ids);
        if let Some(id) = candidate {
            let known: BTreeSet<&PlayerId> = proposer_ids.iter().collect();
            prop_assert!(known.contains(&id));
        }
    }
}

#[test]
fn phase_sequence_never_revisits_lobby() {
    // Invariant 5: once a game leaves `lobby` it never returns to it —
    // spot-checked here since the full DAG is already exercised by
    // `phase.rs`'s transition-table unit tests.
    let mut seen = HashSet::new();
    seen.insert(Phase::Lobby);
    for phase in [
        Phase::Strategy,
        Phase::Negotiation,
        Phase::Proposal,
        Phase::Voting,
        Phase::Elimination,
        Phase::Endgame,
    ] {
        assert!(phase != Phase::Lobby);
        seen.insert(phase);
    }
    assert_eq!(seen.len(), 7);
}
