//! Per-request metrics record, logged as one line when a request finishes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blackboard::{Field, FieldValue, PhaseRecord, Snapshot};
use crate::gate::Route;
use crate::scheduler::RunEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub input_tokens: usize,
    pub candidate_count: usize,
    pub passage_count: usize,
    /// Milliseconds per stage (`phase_1`, `phase_2`, ...).
    pub stage_ms: BTreeMap<String, u64>,
    /// Whether any source timed out or the deadline elapsed.
    pub timeout_hit: bool,
    pub mode: Option<Route>,
    pub total_ms: u64,
    pub safety_hit: bool,
    pub margin: f64,
    pub entropy: f64,
    pub confidence: f64,
    pub fallback_count: usize,
    pub attempts: usize,
}

impl RequestMetrics {
    pub fn collect(
        snapshot: &Snapshot,
        phases: &[PhaseRecord],
        events: &[RunEvent],
        timeout_hit: bool,
        attempts: usize,
        total_ms: u64,
    ) -> Self {
        let safety = snapshot.get(Field::SAFETY_SCAN).and_then(FieldValue::as_safety);
        let metrics = snapshot.get(Field::CONFIDENCE_METRICS).and_then(FieldValue::as_metrics);

        Self {
            input_tokens: safety.map(|s| s.token_count).unwrap_or(0),
            candidate_count: metrics.map(|m| m.candidate_count).unwrap_or(0),
            passage_count: snapshot
                .get(Field::PASSAGES)
                .and_then(FieldValue::as_passages)
                .map(|p| p.len())
                .unwrap_or(0),
            stage_ms: phases
                .iter()
                .map(|p| (format!("phase_{}", p.index), p.elapsed_ms))
                .collect(),
            timeout_hit,
            mode: snapshot.route(),
            total_ms,
            safety_hit: safety.map(|s| s.matched()).unwrap_or(false),
            margin: metrics.map(|m| m.margin).unwrap_or(0.0),
            entropy: metrics.map(|m| m.entropy).unwrap_or(0.0),
            confidence: metrics.map(|m| m.confidence).unwrap_or(0.0),
            fallback_count: events.iter().filter(|e| e.is_fallback()).count(),
            attempts,
        }
    }

    /// Emit the record as a single structured log line.
    pub fn log(&self, request_id: &str) {
        match serde_json::to_string(self) {
            Ok(json) => log::info!("[{request_id}] request_metrics {json}"),
            Err(e) => log::warn!("[{request_id}] could not serialize request metrics: {e}"),
        }
    }
}
