//! Ordered, named steady-state candidates.

use std::collections::HashSet;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SteadyStateError};

/// Ordered sequence of `(name, value)` pairs describing one steady-state candidate.
///
/// The order is fixed by the equation system that produced the vector and is the
/// order in which residual functions read the values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableVector {
    names: Vec<String>,
    values: DVector<f64>,
}

impl VariableVector {
    /// Pairs `names` with `values` after checking lengths and uniqueness.
    pub fn new(names: Vec<String>, values: DVector<f64>) -> Result<Self> {
        if names.len() != values.len() {
            return Err(SteadyStateError::dimension_mismatch(
                "variable values",
                names.len(),
                values.len(),
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(SteadyStateError::DuplicateName {
                    kind: "variable",
                    name: name.clone(),
                });
            }
        }

        Ok(Self { names, values })
    }

    /// Builds a vector from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (names, values): (Vec<String>, Vec<f64>) = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .unzip();
        Self::new(names, DVector::from_vec(values))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the vector holds no variables.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    /// Consumes the vector and returns its raw values.
    pub fn into_values(self) -> DVector<f64> {
        self.values
    }

    /// Position of `name` in the ordering.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|index| self.values[index])
    }

    /// Returns a vector with the same ordering and new values.
    pub fn with_values(&self, values: DVector<f64>) -> Result<Self> {
        if values.len() != self.len() {
            return Err(SteadyStateError::dimension_mismatch(
                "replacement values",
                self.len(),
                values.len(),
            ));
        }
        Ok(Self {
            names: self.names.clone(),
            values,
        })
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.names
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.as_str(), *value))
    }

    /// Whether every value is finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|value| value.is_finite())
    }
}
