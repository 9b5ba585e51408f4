//! Knowledge sources: the workers that read and write the blackboard.
//!
//! Every source declares the fields it reads and writes in a
//! [`SourceDescriptor`]. The scheduler uses the declarations to decide when a
//! source may run ([`KnowledgeSource::can_contribute`]) and to reject writes
//! to anything else.
//!
//! A source never touches the store directly. [`KnowledgeSource::contribute`]
//! stages its outputs in the [`SourceContext`]; the scheduler commits them
//! after the call returns. A call that times out or is cancelled therefore
//! leaves no partial output behind.

pub mod graph;
pub mod registry;
pub mod sources;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blackboard::{Field, FieldValue, Snapshot};
use crate::config::EngineConfig;
use crate::error::Escalation;
use crate::gate::Route;
use crate::services::{Budget, ServiceError};

pub use graph::DependencyGraph;
pub use registry::Registry;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Whether a source is scheduled on its own or only stands in for a failed
/// producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Primary,
    Fallback,
}

/// Static description of a knowledge source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDescriptor {
    pub name: String,
    /// Higher runs earlier within a phase and ranks earlier in fallback
    /// chains.
    pub priority: i32,
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
    /// Default per-call timeout.
    pub timeout_ms: u64,
    /// Minimum confidence the source expects of its own output. Logged when
    /// a contribution falls below it.
    pub confidence_threshold: f64,
    pub role: SourceRole,
    /// Routes in which a primary source is scheduled. `None` means every
    /// route, including before the route is decided.
    pub routes: Option<Vec<Route>>,
    /// Outside `routes`, the source may still stand in for a failed producer.
    pub fallback_elsewhere: bool,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout_ms: 5_000,
            confidence_threshold: 0.0,
            role: SourceRole::Primary,
            routes: None,
            fallback_elsewhere: false,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = Field>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn outputs(mut self, outputs: impl IntoIterator<Item = Field>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Mark as fallback-only.
    pub fn fallback(mut self) -> Self {
        self.role = SourceRole::Fallback;
        self
    }

    /// Restrict primary scheduling to `routes`.
    pub fn primary_in(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes = Some(routes.into_iter().collect());
        self
    }

    /// Allow standing in for failed producers outside the primary routes.
    pub fn fallback_elsewhere(mut self) -> Self {
        self.fallback_elsewhere = true;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the source is scheduled as a primary under `route`.
    pub fn is_primary_in(&self, route: Option<Route>) -> bool {
        if self.role != SourceRole::Primary {
            return false;
        }
        match &self.routes {
            None => true,
            Some(routes) => route.is_some_and(|r| routes.contains(&r)),
        }
    }

    /// Whether the source may stand in for a failed producer under `route`.
    pub fn is_fallback_in(&self, route: Option<Route>) -> bool {
        match self.role {
            SourceRole::Fallback => true,
            SourceRole::Primary => self.fallback_elsewhere && !self.is_primary_in(route),
        }
    }

    pub fn produces(&self, field: Field) -> bool {
        self.outputs.contains(&field)
    }

    pub fn inputs_ready(&self, snapshot: &Snapshot) -> bool {
        self.inputs.iter().all(|f| snapshot.contains(*f))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a contribution failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("{0}")]
    Failure(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("missing or mistyped input '{0}'")]
    MissingInput(Field),

    #[error("write to undeclared field '{0}'")]
    UndeclaredOutput(Field),
}

impl SourceError {
    pub fn failure(message: impl Into<String>) -> Self {
        SourceError::Failure(message.into())
    }

    /// The run-level condition this failure is recorded as.
    pub fn to_escalation(&self, agent: &str) -> Escalation {
        match self {
            SourceError::Timeout { after_ms } => Escalation::AgentTimeout {
                agent: agent.to_string(),
                after_ms: *after_ms,
            },
            SourceError::Upstream(message) => Escalation::UpstreamServiceUnavailable {
                agent: agent.to_string(),
                message: message.clone(),
            },
            other => Escalation::AgentFailure {
                agent: agent.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<ServiceError> for SourceError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Timeout(after_ms) => SourceError::Timeout { after_ms },
            ServiceError::Unavailable(_) | ServiceError::Status { .. } => SourceError::Upstream(err.to_string()),
            ServiceError::Malformed(_) => SourceError::Failure(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Context and outcome
// ---------------------------------------------------------------------------

/// What a successful call reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Contribution {
    /// The source's confidence in its output, in [0, 1].
    pub confidence: f64,
}

impl Contribution {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn certain() -> Self {
        Self::new(1.0)
    }
}

/// Everything a source sees during one call.
#[derive(Debug)]
pub struct SourceContext {
    request_id: String,
    snapshot: Snapshot,
    budget: Budget,
    config: Arc<EngineConfig>,
    declared: Vec<Field>,
    staged: Mutex<Vec<(Field, FieldValue)>>,
}

impl SourceContext {
    pub fn new(
        request_id: impl Into<String>,
        snapshot: Snapshot,
        budget: Budget,
        config: Arc<EngineConfig>,
        declared: Vec<Field>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            snapshot,
            budget,
            config,
            declared,
            staged: Mutex::new(Vec::new()),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn route(&self) -> Option<Route> {
        self.snapshot.route()
    }

    pub fn read(&self, field: Field) -> Option<&FieldValue> {
        self.snapshot.get(field)
    }

    /// Read a declared input through a typed accessor.
    pub fn require<'a, T: ?Sized>(
        &'a self,
        field: Field,
        extract: impl FnOnce(&'a FieldValue) -> Option<&'a T>,
    ) -> Result<&'a T, SourceError> {
        self.snapshot
            .get(field)
            .and_then(extract)
            .ok_or(SourceError::MissingInput(field))
    }

    /// Stage an output. Only declared outputs are accepted, each at most once.
    pub fn write(&self, field: Field, value: FieldValue) -> Result<(), SourceError> {
        if !self.declared.contains(&field) {
            return Err(SourceError::UndeclaredOutput(field));
        }
        let mut staged = self.staged.lock();
        if staged.iter().any(|(f, _)| *f == field) {
            return Err(SourceError::failure(format!("output '{field}' staged twice")));
        }
        staged.push((field, value));
        Ok(())
    }

    /// Take the staged outputs, in staging order.
    pub fn into_staged(self) -> Vec<(Field, FieldValue)> {
        self.staged.into_inner()
    }
}

// ---------------------------------------------------------------------------
// KnowledgeSource trait
// ---------------------------------------------------------------------------

/// A worker that contributes fields to the blackboard.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// True iff every input is present, no output is present, and the
    /// current route schedules this source.
    fn can_contribute(&self, snapshot: &Snapshot) -> bool {
        let d = self.descriptor();
        d.inputs_ready(snapshot) && !d.outputs.iter().any(|f| snapshot.contains(*f)) && d.is_primary_in(snapshot.route())
    }

    /// Per-call timeout under `route`.
    fn timeout(&self, _route: Option<Route>, _config: &EngineConfig) -> Duration {
        self.descriptor().timeout()
    }

    /// Do the work and stage the outputs in `ctx`.
    async fn contribute(&self, ctx: &SourceContext) -> Result<Contribution, SourceError>;
}

impl std::fmt::Debug for dyn KnowledgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeSource")
            .field("name", &self.name())
            .finish()
    }
}
