//! The Matrix Substrate (C2): owns the N×4N negotiation matrix for one game.
//!
//! Parsing of the agent's JSON row deliberately stays on untyped
//! `serde_json::Value` rather than a strict `Deserialize` struct, with each
//! field pulled and checked by hand — the shape is agent-supplied and
//! adversarial, the same posture the teacher's `db.rs` takes toward
//! `row.try_get::<T, _>("col")` on data it doesn't fully trust.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::PlayerId;

pub const MIN_EXPLANATION_LEN: usize = 50;
const SUM_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationEntry {
    pub round: u32,
    pub explanation: String,
    pub snapshot: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub row: usize,
    pub kind: String,
    pub details: String,
    pub round: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub owner: PlayerId,
    pub proposal: Vec<f64>,
    pub vote_allocation: Vec<f64>,
    pub vote_offers: Vec<f64>,
    pub vote_requests: Vec<f64>,
    pub explanation_log: Vec<ExplanationEntry>,
    pub modification_count: u32,
    pub last_modified: Option<DateTime<Utc>>,
}

impl MatrixRow {
    fn zeroed(owner: PlayerId, n: usize) -> Self {
        Self {
            owner,
            proposal: vec![0.0; n],
            vote_allocation: vec![0.0; n],
            vote_offers: vec![0.0; n],
            vote_requests: vec![0.0; n],
            explanation_log: Vec::new(),
            modification_count: 0,
            last_modified: None,
        }
    }

    fn snapshot(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.proposal.len() * 4);
        out.extend_from_slice(&self.proposal);
        out.extend_from_slice(&self.vote_allocation);
        out.extend_from_slice(&self.vote_offers);
        out.extend_from_slice(&self.vote_requests);
        out
    }
}

/// A parsed and validated row update, ready to replace the owner's row.
struct ParsedRow {
    explanation: String,
    proposal: Vec<f64>,
    vote_allocation: Vec<f64>,
    vote_offers: Vec<f64>,
    vote_requests: Vec<f64>,
}

pub struct MatrixSubstrate {
    pub players: Vec<PlayerId>,
    pub rows: Vec<MatrixRow>,
    pub violations: Vec<Violation>,
}

impl MatrixSubstrate {
    /// Sizes the matrix to `N = players.len()`, zero-fills, and records each
    /// row's owner.
    pub fn initialize(players: &[PlayerId]) -> Self {
        let n = players.len();
        let rows = players
            .iter()
            .map(|p| MatrixRow::zeroed(p.clone(), n))
            .collect();
        Self {
            players: players.to_vec(),
            rows,
            violations: Vec::new(),
        }
    }

    fn n(&self) -> usize {
        self.players.len()
    }

    fn log_violation(&mut self, row: usize, kind: &str, details: impl Into<String>, round: u32) {
        self.violations.push(Violation {
            row,
            kind: kind.to_string(),
            details: details.into(),
            round,
            timestamp: Utc::now(),
        });
    }

    fn parse_and_validate(
        &self,
        owner_index: usize,
        is_eliminated: bool,
        self_share_floor: i64,
        raw: &str,
    ) -> Result<ParsedRow, ValidationError> {
        let n = self.n();
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ValidationError::ParseFailure(e.to_string()))?;

        let explanation = value
            .get("explanation")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::ParseFailure("missing explanation".into()))?
            .to_string();
        if explanation.len() < MIN_EXPLANATION_LEN {
            return Err(ValidationError::ExplanationTooShort {
                actual: explanation.len(),
                minimum: MIN_EXPLANATION_LEN,
            });
        }

        let matrix_row = value
            .get("matrixRow")
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::ParseFailure("missing matrixRow".into()))?;
        let expected_len = 4 * n;
        if matrix_row.len() != expected_len {
            return Err(ValidationError::WrongRowLength {
                actual: matrix_row.len(),
                expected: expected_len,
            });
        }

        let mut cells = Vec::with_capacity(expected_len);
        for (index, cell) in matrix_row.iter().enumerate() {
            let v = cell
                .as_f64()
                .ok_or_else(|| ValidationError::ParseFailure(format!("cell {index} not numeric")))?;
            if !(0.0..=100.0).contains(&v) {
                return Err(ValidationError::CellOutOfRange { index, value: v });
            }
            cells.push(v);
        }

        let proposal = cells[0..n].to_vec();
        let vote_allocation = cells[n..2 * n].to_vec();
        let vote_offers = cells[2 * n..3 * n].to_vec();
        let vote_requests = cells[3 * n..4 * n].to_vec();

        let proposal_sum: f64 = proposal.iter().sum();
        if (proposal_sum - 100.0).abs() > SUM_TOLERANCE {
            return Err(ValidationError::ProposalSumInvalid {
                actual: proposal_sum.round() as i64,
            });
        }

        let vote_sum: f64 = vote_allocation.iter().sum();
        if (vote_sum - 100.0).abs() > SUM_TOLERANCE {
            return Err(ValidationError::VoteSumInvalid {
                actual: vote_sum.round() as i64,
            });
        }

        if !is_eliminated {
            let self_share = proposal.get(owner_index).copied().unwrap_or(0.0);
            if (self_share.round() as i64) < self_share_floor {
                return Err(ValidationError::SelfShareBelowFloor {
                    actual: self_share.round() as i64,
                    floor: self_share_floor,
                });
            }
        }

        Ok(ParsedRow {
            explanation,
            proposal,
            vote_allocation,
            vote_offers,
            vote_requests,
        })
    }

    /// Applies one agent's JSON row update. `raw` is the oracle's already-
    /// fetched text; the driver is responsible for constructing the prompt
    /// and calling the oracle, since this substrate never performs I/O.
    pub fn apply_update(
        &mut self,
        owner_index: usize,
        round: u32,
        is_eliminated: bool,
        self_share_floor: i64,
        raw: &str,
    ) -> bool {
        match self.parse_and_validate(owner_index, is_eliminated, self_share_floor, raw) {
            Ok(parsed) => {
                let row = &mut self.rows[owner_index];
                row.proposal = parsed.proposal;
                row.vote_allocation = parsed.vote_allocation;
                row.vote_offers = parsed.vote_offers;
                row.vote_requests = parsed.vote_requests;
                row.modification_count += 1;
                row.last_modified = Some(Utc::now());
                let snapshot = row.snapshot();
                row.explanation_log.push(ExplanationEntry {
                    round,
                    explanation: parsed.explanation,
                    snapshot,
                });
                true
            }
            Err(e) => {
                self.log_violation(owner_index, "INVALID_MATRIX", e.to_string(), round);
                false
            }
        }
    }

    /// Refuses a write attempted against a row the caller does not own.
    /// The row-index-is-the-owner-index convention means this only fires
    /// when a caller is misrouted; kept as an explicit guard so the
    /// invariant is enforced at one obvious call site.
    pub fn enforce_ownership(&mut self, owner_index: usize, caller_index: usize, round: u32) -> bool {
        if owner_index == caller_index {
            return true;
        }
        self.log_violation(
            owner_index,
            "OWNERSHIP_VIOLATION",
            format!("row {owner_index} write attempted by {caller_index}"),
            round,
        );
        false
    }

    /// A stable snapshot of the full matrix, row-major, 4N columns per row.
    pub fn get_matrix(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(MatrixRow::snapshot).collect()
    }

    /// Textual summary for observability; never persisted.
    pub fn display_results(&self) -> String {
        let mut out = String::new();
        for (i, row) in self.rows.iter().enumerate() {
            out.push_str(&format!(
                "row {i} ({}): proposal={:?} votes={:?} mods={}\n",
                row.owner, row.proposal, row.vote_allocation, row.modification_count
            ));
        }
        out
    }

    /// Rounds `proposal` to integers and nudges the largest cell so the sum
    /// is exactly 100.
    pub fn proposal_from_row(&self, row_index: usize) -> Vec<i64> {
        round_to_sum(&self.rows[row_index].proposal, 100)
    }

    /// Maps the vote-allocation segment onto the current proposer list by
    /// column index, zero-weighting any proposer this row has no column
    /// for, then rounds and fixes the sum to 100.
    pub fn vote_from_row(&self, row_index: usize, proposer_list: &[PlayerId]) -> Vec<(PlayerId, i64)> {
        let row = &self.rows[row_index];
        let raw: Vec<f64> = proposer_list
            .iter()
            .map(|proposer| {
                self.players
                    .iter()
                    .position(|p| p == proposer)
                    .and_then(|col| row.vote_allocation.get(col).copied())
                    .unwrap_or(0.0)
            })
            .collect();
        let rounded = round_to_sum(&raw, 100);
        proposer_list.iter().cloned().zip(rounded).collect()
    }
}

/// Largest-remainder-style rounding: round every value down to its nearest
/// integer, then nudge the single largest cell so the total matches `total`
/// exactly. Used by both `ProposalFromRow` and `VoteFromRow`.
fn round_to_sum(values: &[f64], total: i64) -> Vec<i64> {
    if values.is_empty() {
        return Vec::new();
    }
    let sum: f64 = values.iter().sum();
    let mut rounded: Vec<i64> = if sum <= 0.0 {
        let base = total / values.len() as i64;
        let mut v = vec![base; values.len()];
        let remainder = total - base * values.len() as i64;
        if let Some(last) = v.last_mut() {
            *last += remainder;
        }
        return v;
    } else {
        values
            .iter()
            .map(|v| ((v / sum) * total as f64).round() as i64)
            .collect()
    };

    let drift = total - rounded.iter().sum::<i64>();
    if drift != 0 {
        if let Some((largest_idx, _)) = rounded
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
        {
            rounded[largest_idx] += drift;
        }
    }
    rounded
}
