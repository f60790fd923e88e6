//! Calibration-by-targeting: closed-form derivations that run before any iteration.

use std::collections::BTreeMap;

use crate::error::{Result, SteadyStateError};
use crate::parameters::ParameterSet;

/// Output of an analytical resolver.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Targets extended with every derived parameter.
    pub parameters: ParameterSet,
    /// Steady-state variables pinned down in closed form.
    pinned: BTreeMap<String, f64>,
}

impl Resolution {
    pub fn new(parameters: ParameterSet) -> Self {
        Self {
            parameters,
            pinned: BTreeMap::new(),
        }
    }

    /// Fixes a steady-state variable. Each variable may be pinned once.
    pub fn pin(&mut self, variable: impl Into<String>, value: f64) -> Result<()> {
        let variable = variable.into();
        if !value.is_finite() {
            return Err(SteadyStateError::calibration(variable, value, "finite"));
        }
        if self.pinned.contains_key(&variable) {
            return Err(SteadyStateError::DuplicateName {
                kind: "pinned variable",
                name: variable,
            });
        }
        self.pinned.insert(variable, value);
        Ok(())
    }

    /// Pinned variables in name order.
    pub fn pinned(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.pinned.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn pinned_value(&self, variable: &str) -> Option<f64> {
        self.pinned.get(variable).copied()
    }

    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }
}

/// The analytical stage of a steady-state computation.
///
/// Implementations apply a fixed sequence of substitutions to the targets, each
/// step reading only exogenous or previously derived quantities. They must be
/// referentially transparent: identical targets give identical resolutions.
pub trait AnalyticalResolver {
    fn resolve(&self, targets: &ParameterSet) -> Result<Resolution>;
}

/// Resolver that derives nothing and leaves every variable to the numerical stage.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl AnalyticalResolver for PassThrough {
    fn resolve(&self, targets: &ParameterSet) -> Result<Resolution> {
        Ok(Resolution::new(targets.clone()))
    }
}

/// Requires `value > 0` for a derived quantity.
pub fn require_positive(quantity: &str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(SteadyStateError::calibration(quantity, value, "strictly positive"))
    }
}

/// Requires `0 <= value < 1`, as for tax rates and shares.
pub fn require_in_unit_interval(quantity: &str, value: f64) -> Result<f64> {
    if (0.0..1.0).contains(&value) {
        Ok(value)
    } else {
        Err(SteadyStateError::calibration(quantity, value, "within [0, 1)"))
    }
}

/// Divides with a strictly positive denominator.
pub fn checked_ratio(quantity: &str, numerator: f64, denominator: f64) -> Result<f64> {
    if !(denominator > 0.0 && denominator.is_finite()) {
        return Err(SteadyStateError::calibration(
            quantity,
            denominator,
            "positive denominator",
        ));
    }
    let value = numerator / denominator;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SteadyStateError::calibration(quantity, value, "finite"))
    }
}
