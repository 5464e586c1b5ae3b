//! Consensus Voting
//!
//! Plurality aggregation of independent sentiment answers from several
//! adapters. The winning label is the one with the most votes; ties go to the
//! label that appeared first. Confidence is discounted by the winning share:
//!
//! ```text
//! confidence = mean(confidences) * (winning_votes / total_votes)
//! ```

use serde::{Deserialize, Serialize};

use crate::adapter::{SentimentLabel, SentimentResult};

/// Consensus configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Vote across adapters for sentiment when at least two are registered
    pub require_consensus: bool,

    /// Winning share below which consensus is reported as weak
    pub consensus_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            require_consensus: false,
            consensus_threshold: 0.6,
        }
    }
}

/// One adapter's vote
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Vote {
    pub adapter: String,
    pub result: SentimentResult,
}

/// Votes per label, in first-seen order
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LabelTally {
    pub label: SentimentLabel,
    pub votes: usize,
}

/// Outcome of a vote
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsensusReport {
    /// Winning label and discounted confidence
    pub result: SentimentResult,
    pub tallies: Vec<LabelTally>,
    pub total_votes: usize,
    /// `winning_votes / total_votes`
    pub agreement: f64,
    /// Agreement fell below the configured threshold
    pub weak: bool,
    pub votes: Vec<Vote>,
}

/// Tally votes; `None` when there are no votes
pub fn tally(votes: Vec<Vote>, threshold: f64) -> Option<ConsensusReport> {
    if votes.is_empty() {
        return None;
    }

    let mut tallies: Vec<LabelTally> = Vec::new();
    for vote in &votes {
        match tallies.iter_mut().find(|t| t.label == vote.result.label) {
            Some(t) => t.votes += 1,
            None => tallies.push(LabelTally {
                label: vote.result.label,
                votes: 1,
            }),
        }
    }

    // First maximum wins, so ties keep first-seen order
    let winner = tallies
        .iter()
        .fold(None::<&LabelTally>, |best, t| match best {
            Some(b) if b.votes >= t.votes => Some(b),
            _ => Some(t),
        })?
        .clone();

    let total = votes.len();
    let mean = votes.iter().map(|v| v.result.confidence).sum::<f64>() / total as f64;
    let agreement = winner.votes as f64 / total as f64;
    let weak = agreement < threshold;

    if weak {
        tracing::warn!(
            label = ?winner.label,
            agreement,
            threshold,
            total_votes = total,
            "Weak consensus across adapters"
        );
    }

    Some(ConsensusReport {
        result: SentimentResult {
            label: winner.label,
            confidence: mean * agreement,
        },
        tallies,
        total_votes: total,
        agreement,
        weak,
        votes,
    })
}
