//! Default scoring formula: weighted sum of facts plus averaged inputs.
//!
//! ```text
//! score = Σ weight(fact) * fact
//!       + dependency_weight * mean(predecessor scores)
//!       + child_weight      * mean(child scores)
//! ```
//!
//! clamped to `[0, max_score]` when `max_score` is set. Empty means count as 0.

use std::collections::BTreeMap;

use crate::domain::ExecutionError;
use crate::ports::formula::{ScoreFormula, ScoreInputs};

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSumFormula {
    /// Per-fact weights. Facts without an entry use `default_weight`.
    pub fact_weights: BTreeMap<String, f64>,
    pub default_weight: f64,
    pub dependency_weight: f64,
    pub child_weight: f64,
    pub max_score: Option<f64>,
}

impl Default for WeightedSumFormula {
    fn default() -> Self {
        Self {
            fact_weights: BTreeMap::new(),
            default_weight: 1.0,
            dependency_weight: 1.0,
            child_weight: 1.0,
            max_score: None,
        }
    }
}

impl WeightedSumFormula {
    pub fn with_weight(mut self, fact: impl Into<String>, weight: f64) -> Self {
        self.fact_weights.insert(fact.into(), weight);
        self
    }

    pub fn with_max_score(mut self, max: f64) -> Self {
        self.max_score = Some(max);
        self
    }

    fn weight(&self, fact: &str) -> f64 {
        self.fact_weights
            .get(fact)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

fn mean(values: &[(crate::domain::EntityRef, f64)]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64
    }
}

impl ScoreFormula for WeightedSumFormula {
    fn compute(&self, inputs: &ScoreInputs) -> Result<f64, ExecutionError> {
        let mut score = 0.0;
        for (name, value) in inputs.facts.iter() {
            if !value.is_finite() {
                return Err(ExecutionError::terminal(format!(
                    "{}: fact '{name}' is not a finite number",
                    inputs.entity
                )));
            }
            score += self.weight(name) * value;
        }
        score += self.dependency_weight * mean(&inputs.predecessors);
        score += self.child_weight * mean(&inputs.children);

        if !score.is_finite() {
            return Err(ExecutionError::terminal(format!(
                "{}: score overflowed",
                inputs.entity
            )));
        }
        Ok(match self.max_score {
            Some(max) => score.clamp(0.0, max),
            None => score,
        })
    }
}
