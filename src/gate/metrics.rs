//! Routing metrics derived from a theme ranking.

use serde::{Deserialize, Serialize};

use crate::model::ThemeRanking;

/// Confidence signals used by the gate. Every value is in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    /// Best normalized score.
    pub top_score: f64,
    /// Best score minus second best (second best is 0 when there is only one
    /// candidate).
    pub margin: f64,
    /// Shannon entropy of the score distribution divided by `ln(n)`.
    pub entropy: f64,
    /// Dense similarity of the best candidate (falls back to its score).
    pub top_similarity: f64,
    /// The ranking service's confidence signal.
    pub confidence: f64,
    pub candidate_count: usize,
}

impl ConfidenceMetrics {
    /// Derive metrics from a ranking. Empty rankings yield all zeros.
    pub fn from_ranking(ranking: &ThemeRanking) -> Self {
        let scores: Vec<f64> = ranking.scores.iter().map(|s| s.score.clamp(0.0, 1.0)).collect();
        let Some(top) = ranking.top() else {
            return Self {
                confidence: ranking.confidence,
                ..Self::default()
            };
        };

        let top_score = scores[0];
        let second = scores.get(1).copied().unwrap_or(0.0);
        let margin = (top_score - second).clamp(0.0, 1.0);

        Self {
            top_score,
            margin,
            entropy: normalized_entropy(&scores),
            top_similarity: top.similarity.unwrap_or(top_score).clamp(0.0, 1.0),
            confidence: ranking.confidence.clamp(0.0, 1.0),
            candidate_count: scores.len(),
        }
    }
}

/// Entropy of `scores` treated as a distribution, normalized to [0, 1].
///
/// All-zero and single-candidate distributions have zero entropy.
pub fn normalized_entropy(scores: &[f64]) -> f64 {
    let n = scores.len();
    let total: f64 = scores.iter().filter(|s| **s > 0.0).sum();
    if n < 2 || total <= 0.0 {
        return 0.0;
    }
    let h: f64 = scores
        .iter()
        .filter(|s| **s > 0.0)
        .map(|s| {
            let p = s / total;
            -p * p.ln()
        })
        .sum();
    (h / (n as f64).ln()).clamp(0.0, 1.0)
}
