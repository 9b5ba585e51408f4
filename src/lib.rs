//! # themeboard
//!
//! A blackboard coordination engine for theme analysis.
//!
//! Each request gets a fresh [`blackboard::BlackboardStore`]. Knowledge
//! sources declare the fields they read and write; the
//! [`scheduler::ControlStrategy`] runs every source whose inputs are ready in
//! concurrent phases, routes generation through the
//! [`gate::ConfidenceGate`], covers failed producers with their
//! [`fallback::FallbackChain`], and checks the assembled answer with
//! [`quality::QualityAssurance`] before returning it. Intermediate results
//! can be streamed phase by phase.
//!
//! Remote ranking, search and generation services plug in through
//! [`services::Collaborator`]; deterministic local implementations ship with
//! the crate.

pub mod blackboard;
pub mod citations;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod knowledge;
pub mod metrics;
pub mod model;
pub mod quality;
pub mod scheduler;
pub mod services;
pub mod streaming;
pub mod text;
pub mod themes;

#[cfg(test)]
pub mod testing;

pub use config::EngineConfig;
pub use engine::{Engine, ProcessResult, ThemeResult};
pub use error::{EngineError, Escalation};
pub use themes::ThemeCatalog;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
