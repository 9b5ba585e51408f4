//! Blackboard slot: a written field with its producer attribution.

use std::sync::Arc;

use serde::Serialize;

use super::field::FieldValue;

/// Producer id used for fields written by the scheduler itself.
pub const SCHEDULER_PRODUCER: &str = "control_strategy";

/// A single written field.
///
/// The value is reference-counted so snapshots and readers share it without
/// copying.
#[derive(Debug, Clone, Serialize)]
pub struct FieldEntry {
    pub value: Arc<FieldValue>,
    /// Name of the knowledge source (or engine component) that wrote it.
    pub producer: String,
    /// Wall-clock write time, Unix milliseconds.
    pub written_at: i64,
    /// Per-store write order, starting at 0.
    pub sequence: u64,
}

impl FieldEntry {
    pub fn new(value: FieldValue, producer: impl Into<String>, sequence: u64) -> Self {
        Self {
            value: Arc::new(value),
            producer: producer.into(),
            written_at: chrono::Utc::now().timestamp_millis(),
            sequence,
        }
    }
}
