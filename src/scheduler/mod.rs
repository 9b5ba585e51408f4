//! Phase scheduling over the blackboard.
//!
//! [`ControlStrategy`] drives a request through ready-set phases, the
//! confidence gate, fallbacks and the quality retry. [`ExecutionPlan`] is a
//! static preview of the phase shape for a registry.

pub mod control;
pub mod event;
pub mod plan;
pub mod state;

pub use control::{seed, ControlStrategy, RunOutcome, GATE_PRODUCER, QA_PRODUCER};
pub use event::RunEvent;
pub use plan::{ExecutionPlan, PlannedPhase, Strategy};
pub use state::{RunState, StateTrace, TransitionError};
