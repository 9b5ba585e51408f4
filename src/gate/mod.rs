//! Confidence gate: maps ranking metrics and safety signals to a processing
//! route.
//!
//! Decision order:
//!
//! 1. A matched safety term forces [`Route::QualityFirst`]. This is a hard
//!    override, not a weighted vote.
//! 2. High confidence on a short input takes [`Route::Deterministic`].
//! 3. Low margin, high entropy, low top similarity or a long input promote
//!    to [`Route::QualityFirst`].
//! 4. Everything else is [`Route::Balanced`].

pub mod metrics;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::error::Escalation;
use crate::model::SafetyScan;

pub use metrics::ConfidenceMetrics;

/// Processing mode for the generation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Skip the generative worker entirely.
    Deterministic,
    Balanced,
    /// Highest token budget and timeout.
    QualityFirst,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Deterministic => "deterministic",
            Route::Balanced => "balanced",
            Route::QualityFirst => "quality_first",
        }
    }

    /// The next more expensive route. `QualityFirst` escalates to itself.
    pub fn escalate(self) -> Route {
        match self {
            Route::Deterministic => Route::Balanced,
            Route::Balanced | Route::QualityFirst => Route::QualityFirst,
        }
    }

    pub const ALL: [Route; 3] = [Route::Deterministic, Route::Balanced, Route::QualityFirst];
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the gate picked its route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateReason {
    SafetyTerm { terms: Vec<String> },
    ConfidentShortInput { confidence: f64, tokens: usize },
    LowMargin { margin: f64 },
    HighEntropy { entropy: f64 },
    LowSimilarity { top_similarity: f64 },
    LongInput { tokens: usize },
    /// Retry after a failed quality check.
    QualityRetry { previous: Route },
    Default,
}

/// The gate's output, stored in the `route` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub route: Route,
    pub reasons: Vec<GateReason>,
    pub metrics: ConfidenceMetrics,
}

impl GateDecision {
    /// Decision used by the quality retry: same metrics, escalated route.
    pub fn escalated(&self) -> GateDecision {
        GateDecision {
            route: self.route.escalate(),
            reasons: vec![GateReason::QualityRetry { previous: self.route }],
            metrics: self.metrics,
        }
    }

    pub fn safety_override(&self) -> bool {
        self.reasons.iter().any(|r| matches!(r, GateReason::SafetyTerm { .. }))
    }
}

/// Selects a route from confidence metrics. Thresholds come from
/// configuration.
#[derive(Debug, Clone)]
pub struct ConfidenceGate {
    thresholds: Thresholds,
}

impl ConfidenceGate {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Decide the route. Returns the decision plus the escalation to record
    /// when a safety term forced it.
    pub fn decide(&self, metrics: &ConfidenceMetrics, safety: &SafetyScan) -> (GateDecision, Option<Escalation>) {
        let thr = &self.thresholds;
        let tokens = safety.token_count;

        if safety.matched() {
            let decision = GateDecision {
                route: Route::QualityFirst,
                reasons: vec![GateReason::SafetyTerm {
                    terms: safety.matched_terms.clone(),
                }],
                metrics: *metrics,
            };
            let escalation = Escalation::SafetyEscalationRequired {
                terms: safety.matched_terms.clone(),
            };
            return (decision, Some(escalation));
        }

        if metrics.confidence >= thr.deterministic_skip_confidence && tokens <= thr.short_input_tokens {
            let decision = GateDecision {
                route: Route::Deterministic,
                reasons: vec![GateReason::ConfidentShortInput {
                    confidence: metrics.confidence,
                    tokens,
                }],
                metrics: *metrics,
            };
            return (decision, None);
        }

        let mut reasons = Vec::new();
        if metrics.margin < thr.margin {
            reasons.push(GateReason::LowMargin { margin: metrics.margin });
        }
        if metrics.entropy > thr.entropy {
            reasons.push(GateReason::HighEntropy { entropy: metrics.entropy });
        }
        if metrics.top_similarity < thr.top_similarity {
            reasons.push(GateReason::LowSimilarity {
                top_similarity: metrics.top_similarity,
            });
        }
        if tokens > thr.long_input_tokens {
            reasons.push(GateReason::LongInput { tokens });
        }

        let route = if reasons.is_empty() {
            reasons.push(GateReason::Default);
            Route::Balanced
        } else {
            Route::QualityFirst
        };

        (
            GateDecision {
                route,
                reasons,
                metrics: *metrics,
            },
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ConfidenceGate {
        ConfidenceGate::new(Thresholds::default())
    }

    fn confident() -> ConfidenceMetrics {
        ConfidenceMetrics {
            top_score: 0.8,
            margin: 0.5,
            entropy: 0.3,
            top_similarity: 0.7,
            confidence: 0.95,
            candidate_count: 5,
        }
    }

    fn scan(tokens: usize, terms: &[&str]) -> SafetyScan {
        SafetyScan {
            matched_terms: terms.iter().map(|t| t.to_string()).collect(),
            token_count: tokens,
        }
    }

    #[test]
    fn test_confident_short_input_is_deterministic() {
        let (d, esc) = gate().decide(&confident(), &scan(4, &[]));
        assert_eq!(d.route, Route::Deterministic);
        assert!(esc.is_none());
    }

    #[test]
    fn test_safety_overrides_everything() {
        let (d, esc) = gate().decide(&confident(), &scan(3, &["suicide"]));
        assert_eq!(d.route, Route::QualityFirst);
        assert!(d.safety_override());
        assert!(matches!(esc, Some(Escalation::SafetyEscalationRequired { .. })));
    }

    #[test]
    fn test_each_uncertainty_signal_promotes_quality_first() {
        let g = gate();
        let mut m = confident();
        m.confidence = 0.5;

        let (d, _) = g.decide(&m, &scan(12, &[]));
        assert_eq!(d.route, Route::Balanced);

        let low_margin = ConfidenceMetrics { margin: 0.0, ..m };
        assert_eq!(g.decide(&low_margin, &scan(12, &[])).0.route, Route::QualityFirst);

        let high_entropy = ConfidenceMetrics { entropy: 0.99, ..m };
        assert_eq!(g.decide(&high_entropy, &scan(12, &[])).0.route, Route::QualityFirst);

        let low_sim = ConfidenceMetrics { top_similarity: 0.01, ..m };
        assert_eq!(g.decide(&low_sim, &scan(12, &[])).0.route, Route::QualityFirst);

        let (d, _) = g.decide(&m, &scan(41, &[]));
        assert_eq!(d.route, Route::QualityFirst);
        assert!(d.reasons.contains(&GateReason::LongInput { tokens: 41 }));
    }

    #[test]
    fn test_long_confident_input_is_not_deterministic() {
        let (d, _) = gate().decide(&confident(), &scan(20, &[]));
        assert_eq!(d.route, Route::Balanced);
    }

    #[test]
    fn test_route_escalation_ladder() {
        assert_eq!(Route::Deterministic.escalate(), Route::Balanced);
        assert_eq!(Route::Balanced.escalate(), Route::QualityFirst);
        assert_eq!(Route::QualityFirst.escalate(), Route::QualityFirst);
        assert_eq!(serde_json::to_string(&Route::QualityFirst).unwrap(), "\"quality_first\"");
    }
}
