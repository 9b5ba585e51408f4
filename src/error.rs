//! Error types for the engine.
//!
//! Startup errors (`ConfigError`, `RegistryError`, `CatalogError`) are fatal
//! and surface through [`EngineError`]. Per-request conditions are modelled by
//! [`Escalation`]: they are recorded in the run diagnostics and handled by the
//! scheduler, never returned to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading the theme catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural problem (duplicate ids, empty ids).
    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Errors loading or validating the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing or serialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of range or inconsistent with another value.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors writing to the blackboard.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The field already holds a value for this request.
    #[error("Field '{field}' already written by '{producer}'")]
    FieldAlreadyWritten { field: String, producer: String },
}

/// Errors building the knowledge source registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two sources share a name.
    #[error("Duplicate knowledge source: {0}")]
    DuplicateSource(String),

    /// A source declares no outputs.
    #[error("Knowledge source '{0}' declares no outputs")]
    NoOutputs(String),

    /// A declared input is neither a seed field nor produced by any source.
    #[error("Knowledge source '{source_name}' reads '{field}', which nothing produces")]
    UnproducedInput { source_name: String, field: String },

    /// A field is only produced by fallback-only sources.
    #[error("Field '{0}' has no primary producer")]
    NoPrimaryProducer(String),

    /// The input/output graph has a cycle.
    #[error("Circular dependency between knowledge sources: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// A source timeout is not strictly shorter than the global deadline.
    #[error("Knowledge source '{source_name}' timeout {timeout_ms}ms is not below the {deadline_ms}ms deadline")]
    TimeoutExceedsDeadline {
        source_name: String,
        timeout_ms: u64,
        deadline_ms: u64,
    },

    /// The registry is empty.
    #[error("Registry has no knowledge sources")]
    Empty,
}

/// Fatal engine construction errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Per-request conditions handled inside the scheduler.
///
/// These are the orchestration-level outcomes of a request. None of them is
/// ever returned from `process()`: timeouts and failures go through the
/// fallback chain, stalls produce a partial result, low quality triggers a
/// single retry, and safety matches force the quality-first route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Escalation {
    /// A knowledge source exceeded its per-call timeout.
    #[error("Knowledge source '{agent}' timed out after {after_ms}ms")]
    AgentTimeout { agent: String, after_ms: u64 },

    /// A knowledge source failed or returned a malformed response.
    #[error("Knowledge source '{agent}' failed: {message}")]
    AgentFailure { agent: String, message: String },

    /// No source can run and terminal fields are missing.
    #[error("Schedule stalled with missing fields: {}", .missing.join(", "))]
    ScheduleStalled { missing: Vec<String> },

    /// The quality aggregate fell below the configured minimum.
    #[error("Quality score {score:.3} below minimum {minimum:.3}")]
    QualityBelowThreshold { score: f64, minimum: f64 },

    /// The input matched a configured escalation term.
    #[error("Safety escalation required for terms: {}", .terms.join(", "))]
    SafetyEscalationRequired { terms: Vec<String> },

    /// A collaborator service could not be reached.
    #[error("Upstream service unavailable for '{agent}': {message}")]
    UpstreamServiceUnavailable { agent: String, message: String },
}

impl Escalation {
    /// Whether this condition is handled by the fallback chain.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Escalation::AgentTimeout { .. }
                | Escalation::AgentFailure { .. }
                | Escalation::UpstreamServiceUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_fallback_classes() {
        let timeout = Escalation::AgentTimeout { agent: "a".into(), after_ms: 10 };
        let upstream = Escalation::UpstreamServiceUnavailable {
            agent: "a".into(),
            message: "refused".into(),
        };
        let stalled = Escalation::ScheduleStalled { missing: vec!["summary".into()] };
        assert!(timeout.triggers_fallback());
        assert!(upstream.triggers_fallback());
        assert!(!stalled.triggers_fallback());
    }

    #[test]
    fn test_escalation_serde_tag() {
        let e = Escalation::SafetyEscalationRequired { terms: vec!["suicide".into()] };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "safety_escalation_required");
        assert_eq!(e.to_string(), "Safety escalation required for terms: suicide");
    }

    #[test]
    fn test_store_error_display() {
        let e = StoreError::FieldAlreadyWritten {
            field: "summary".into(),
            producer: "template_summary".into(),
        };
        assert_eq!(e.to_string(), "Field 'summary' already written by 'template_summary'");
    }

    #[test]
    fn test_registry_error_display() {
        let e = RegistryError::CircularDependency(vec!["a".into(), "b".into()]);
        assert_eq!(e.to_string(), "Circular dependency between knowledge sources: a, b");
    }
}
