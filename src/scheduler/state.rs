//! Per-request run states and the trace of transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum RunState {
    Init,
    /// 1-based phase number, counted across attempts.
    Phase(usize),
    QaCheck,
    RetryGeneration,
    Finalize,
}

impl RunState {
    /// Whether `next` may follow `self`.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Finalize, _) => false,
            (_, Finalize) => true,
            (Init, Phase(1)) | (Init, QaCheck) => true,
            (Phase(a), Phase(b)) => b == a + 1,
            (Phase(_), QaCheck) => true,
            (QaCheck, RetryGeneration) => true,
            (RetryGeneration, Phase(_)) | (RetryGeneration, QaCheck) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => write!(f, "INIT"),
            RunState::Phase(n) => write!(f, "PHASE_{n}"),
            RunState::QaCheck => write!(f, "QA_CHECK"),
            RunState::RetryGeneration => write!(f, "RETRY_GENERATION"),
            RunState::Finalize => write!(f, "FINALIZE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: RunState,
    pub to: RunState,
}

/// Ordered list of the states a request went through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTrace {
    states: Vec<RunState>,
}

impl StateTrace {
    pub fn new() -> Self {
        Self {
            states: vec![RunState::Init],
        }
    }

    pub fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Init)
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), TransitionError> {
        let from = self.current();
        if !from.can_advance_to(next) {
            return Err(TransitionError { from, to: next });
        }
        self.states.push(next);
        Ok(())
    }

    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    /// Highest phase number entered so far.
    pub fn last_phase(&self) -> usize {
        self.states
            .iter()
            .filter_map(|s| match s {
                RunState::Phase(n) => Some(*n),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn is_finalized(&self) -> bool {
        self.current() == RunState::Finalize
    }
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StateTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.states.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", names.join(" -> "))
    }
}
