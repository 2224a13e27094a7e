//! InputSource port - the raw facts a score is computed from.
//!
//! Facts (priority, importance, completion, due dates...) live in the
//! application's own store. The engine only needs a read.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{EntityRef, ExecutionError};

/// Named numeric attributes of one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facts(BTreeMap<String, f64>);

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Facts {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[async_trait]
pub trait InputSource: Send + Sync {
    /// Facts for `entity`. A temporarily unreadable source should return a
    /// transient error; the job is then retried.
    async fn facts(&self, entity: EntityRef) -> Result<Facts, ExecutionError>;
}
