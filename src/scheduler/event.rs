//! Diagnostic events recorded while a request runs.

use serde::{Deserialize, Serialize};

use crate::gate::{GateReason, Route};

/// One thing that happened during a run, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    SourceCompleted {
        source: String,
        phase: usize,
        fields: Vec<String>,
        confidence: f64,
        elapsed_ms: u64,
    },
    SourceFailed {
        source: String,
        phase: usize,
        error: String,
        elapsed_ms: u64,
    },
    /// `fallback` was dispatched to cover `fields` after `failed` left them
    /// empty.
    FallbackUsed {
        failed: String,
        fallback: String,
        fields: Vec<String>,
    },
    NeutralDefault { field: String },
    GateDecided { route: Route, reasons: Vec<GateReason> },
    CommitRejected { source: String, field: String, reason: String },
    QaVerdict { attempt: usize, aggregate: f64, passed: bool },
    RetryStarted { route: Route },
    Stalled { missing: Vec<String> },
    DeadlineExceeded { phase: usize },
    IterationLimit { iterations: usize },
}

impl RunEvent {
    pub fn is_fallback(&self) -> bool {
        matches!(self, RunEvent::FallbackUsed { .. } | RunEvent::NeutralDefault { .. })
    }
}
