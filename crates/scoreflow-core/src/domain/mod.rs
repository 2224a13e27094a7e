//! Domain model (ids, entities, scores, jobs, outcomes, errors).
//!
//! Nothing in here knows about queues, locks or the runtime; these are the
//! plain values that flow between the scheduler, the workers and the stores.

pub mod entity;
pub mod errors;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod score;

pub use entity::{EntityKind, EntityRef};
pub use errors::{EngineError, ErrorKind, ExecutionError, StoreError, StructuralError};
pub use ids::{CascadeId, EntityId, JobId};
pub use job::{Reason, RecalculationJob};
pub use outcome::{EntityFailure, JobPhase, JobState, JobStatus, Settlement};
pub use score::{Score, WriteOutcome};
