//! Named structural coefficients and calibration targets.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SteadyStateError};

/// Mapping from parameter name to scalar value.
///
/// Entries are either exogenous (supplied by calibration) or derived (written
/// exactly once by an analytical resolver from already-known entries). The set is
/// a value type: solves receive it by reference and resolvers return an extended
/// copy, so repeated or concurrent solves never share mutable state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
    #[serde(default)]
    derived: BTreeSet<String>,
}

impl ParameterSet {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an exogenous entry.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        self.derived.remove(&name);
        self.values.insert(name, value);
        self
    }

    /// Records a derived entry. Each name may be written once.
    pub fn derive(&mut self, name: impl Into<String>, value: f64) -> Result<()> {
        let name = name.into();
        if self.values.contains_key(&name) {
            return Err(SteadyStateError::DuplicateName {
                kind: "parameter",
                name,
            });
        }
        if !value.is_finite() {
            return Err(SteadyStateError::calibration(name, value, "finite"));
        }
        self.derived.insert(name.clone());
        self.values.insert(name, value);
        Ok(())
    }

    /// Looks up `name`, reporting which formula needed it when absent.
    pub fn require(&self, name: &str, required_by: &str) -> Result<f64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| SteadyStateError::missing_input(name, required_by))
    }

    /// Value of `name`, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether `name` was written by a resolver rather than supplied.
    pub fn is_derived(&self, name: &str) -> bool {
        self.derived.contains(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Keeps only the named entries, dropping everything else.
    pub fn restrict<'a, I>(&self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut restricted = Self::new();
        for name in names {
            let value = self.require(name, "parameter restriction")?;
            restricted.values.insert(name.to_string(), value);
            if self.is_derived(name) {
                restricted.derived.insert(name.to_string());
            }
        }
        Ok(restricted)
    }

    /// Rejects NaN and infinite entries before any formula reads them.
    pub fn ensure_finite(&self) -> Result<()> {
        for (name, value) in self.iter() {
            if !value.is_finite() {
                return Err(SteadyStateError::calibration(name, value, "finite"));
            }
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |set, (name, value)| set.with(name, value))
    }
}
