//! Phase bookkeeping.
//!
//! A phase is one barrier-delimited batch of knowledge sources. [`Phase`]
//! times the batch and [`Phase::finish`] turns it into the [`PhaseRecord`]
//! kept in the run diagnostics.

use std::time::Instant;

use serde::Serialize;

use super::field::Field;

/// What one phase ran and what it committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRecord {
    /// 1-based phase number within the attempt.
    pub index: usize,
    /// Sources dispatched as primaries, in dispatch order.
    pub sources: Vec<String>,
    /// Fallback sources run inside this phase.
    pub fallbacks: Vec<String>,
    /// Fields committed by the phase, in commit order.
    pub committed: Vec<Field>,
    /// Sources that timed out or failed.
    pub failed: Vec<String>,
    /// Unix milliseconds at phase start.
    pub started_at: i64,
    pub elapsed_ms: u64,
}

/// A running phase.
#[derive(Debug)]
pub struct Phase {
    index: usize,
    sources: Vec<String>,
    started_at: i64,
    start: Instant,
}

impl Phase {
    /// Begin phase `index` with the given members.
    pub fn begin(index: usize, sources: Vec<String>) -> Self {
        log::debug!("phase {} begin: [{}]", index, sources.join(", "));
        Self {
            index,
            sources,
            started_at: chrono::Utc::now().timestamp_millis(),
            start: Instant::now(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Close the phase.
    pub fn finish(self, committed: Vec<Field>, failed: Vec<String>, fallbacks: Vec<String>) -> PhaseRecord {
        let elapsed_ms = self.elapsed_ms();
        log::debug!(
            "phase {} end: {} field(s) committed, {} failure(s), {}ms",
            self.index,
            committed.len(),
            failed.len(),
            elapsed_ms
        );
        PhaseRecord {
            index: self.index,
            sources: self.sources,
            fallbacks,
            committed,
            failed,
            started_at: self.started_at,
            elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_record() {
        let phase = Phase::begin(2, vec!["passage_retriever".into(), "theme_check".into()]);
        assert_eq!(phase.index(), 2);
        assert_eq!(phase.sources().len(), 2);
        let record = phase.finish(vec![Field::PASSAGES], vec!["theme_check".into()], vec![]);
        assert_eq!(record.index, 2);
        assert_eq!(record.committed, vec![Field::PASSAGES]);
        assert_eq!(record.failed, vec!["theme_check".to_string()]);
        assert!(record.started_at > 0);
    }
}
