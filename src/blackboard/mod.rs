//! Blackboard: the per-request shared knowledge store.
//!
//! Created empty when a request starts, seeded by the scheduler, filled in
//! by knowledge sources, and dropped when the request ends. A store is never
//! shared between requests.
//!
//! # Single writer per field
//!
//! [`BlackboardStore::write`] fails with
//! [`StoreError::FieldAlreadyWritten`](crate::error::StoreError) when the
//! field is occupied. Sources never write directly: their outputs are staged
//! and committed by the scheduler after the call returns, so a cancelled call
//! leaves nothing behind.
//!
//! # Snapshots
//!
//! [`BlackboardStore::snapshot`] returns an immutable copy that sources read
//! from while other sources of the same phase are running.

pub mod field;
pub mod phase;
pub mod slot;
pub mod view;

pub use field::{Field, FieldValue};
pub use phase::{Phase, PhaseRecord};
pub use slot::{FieldEntry, SCHEDULER_PRODUCER};
pub use view::{BlackboardStore, Snapshot};
