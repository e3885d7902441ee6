//! Best-effort extraction of commitments from free-text negotiation.
//!
//! Strictly advisory: callers may surface these as hints in observability
//! output, but `transition` never reads them and no phase guard depends on
//! them. The authoritative inputs are proposals and votes.

use regex::Regex;

use crate::types::{Commitment, CommitmentKind, PlayerId};

struct Pattern {
    kind: CommitmentKind,
    regex: Regex,
}

fn patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            kind: CommitmentKind::VoteOffer,
            regex: Regex::new(
                r"(?i)I('ll| will) (give|offer|send) (?P<target>\w+)\s+(?P<votes>\d+)\s+votes?",
            )
            .expect("valid regex"),
        },
        Pattern {
            kind: CommitmentKind::SeekingAllocation,
            regex: Regex::new(
                r"(?i)I (need|want|require) (at least )?(?P<allocation>\d+)%",
            )
            .expect("valid regex"),
        },
        Pattern {
            kind: CommitmentKind::Alliance,
            regex: Regex::new(r"(?i)(let's|lets|we should) (team up|ally|work together) with (?P<target>\w+)")
                .expect("valid regex"),
        },
        Pattern {
            kind: CommitmentKind::Threat,
            regex: Regex::new(r"(?i)if you don't .* I('ll| will) vote against (?P<target>\w+)")
                .expect("valid regex"),
        },
        Pattern {
            kind: CommitmentKind::ConditionalTrade,
            regex: Regex::new(
                r"(?i)if (?P<target>\w+) gives? me (?P<allocation>\d+)%,? I('ll| will) (vote|support) (them|you)",
            )
            .expect("valid regex"),
        },
    ]
}

/// Scans `text` for the canonical commitment phrasings and returns every
/// match found. Unmatched free text yields no commitments, which is the
/// common case — most negotiation text is not a structured promise.
pub fn extract_commitments(from_player: &PlayerId, text: &str) -> Vec<Commitment> {
    let mut found = Vec::new();
    for pattern in patterns() {
        for captures in pattern.regex.captures_iter(text) {
            let target_player = captures
                .name("target")
                .map(|m| PlayerId::new(m.as_str()));
            let offered_votes = captures
                .name("votes")
                .and_then(|m| m.as_str().parse::<i64>().ok());
            let required_allocation = captures
                .name("allocation")
                .and_then(|m| m.as_str().parse::<i64>().ok());
            found.push(Commitment {
                kind: pattern.kind,
                from_player: from_player.clone(),
                target_player,
                offered_votes,
                required_allocation,
                fulfilled: None,
            });
        }
    }
    found
}

/// Resolves `fulfilled` after the voting phase by checking whether the
/// commitment's stated condition actually held. Purely observational — the
/// result is never fed back into the state machine.
pub fn resolve_fulfillment(
    commitment: &mut Commitment,
    actual_votes: &std::collections::BTreeMap<PlayerId, i64>,
) {
    commitment.fulfilled = match (&commitment.kind, &commitment.target_player, commitment.offered_votes) {
        (CommitmentKind::VoteOffer, Some(target), Some(offered)) => {
            Some(actual_votes.get(target).copied().unwrap_or(0) >= *offered)
        }
        _ => None,
    };
}
