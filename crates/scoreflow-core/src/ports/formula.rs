//! ScoreFormula port - the pluggable scoring arithmetic.
//!
//! The engine decides when and in what order scores are recomputed; what a
//! score *is* comes from a `ScoreFormula`. The only requirement is that the
//! formula is deterministic given its inputs.

use crate::domain::{EntityRef, ExecutionError};
use crate::ports::inputs::Facts;

/// Everything a formula may look at for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInputs {
    pub entity: EntityRef,
    pub facts: Facts,

    /// Current scores of the direct children (empty for tasks).
    pub children: Vec<(EntityRef, f64)>,

    /// Current scores of the tasks this task depends on (empty for aggregates).
    pub predecessors: Vec<(EntityRef, f64)>,
}

pub trait ScoreFormula: Send + Sync {
    /// Compute the score. Returning a terminal error fails the job without
    /// retry; the entity keeps its previous value.
    fn compute(&self, inputs: &ScoreInputs) -> Result<f64, ExecutionError>;
}

impl<F> ScoreFormula for F
where
    F: Fn(&ScoreInputs) -> Result<f64, ExecutionError> + Send + Sync,
{
    fn compute(&self, inputs: &ScoreInputs) -> Result<f64, ExecutionError> {
        self(inputs)
    }
}
