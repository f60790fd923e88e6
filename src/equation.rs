//! Named residual equations and domain-guarded arithmetic.
//!
//! An [`Equation`] declares the variables and parameters it reads. Its closure
//! receives two slices holding those values in declaration order and returns the
//! residual `lhs - rhs`. Arithmetic that can leave its mathematical domain goes
//! through the helpers in this module so that a bad candidate surfaces as a
//! [`DomainViolation`] instead of a NaN.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Signals that a candidate point lies outside an equation's domain.
///
/// This is the "invalid residual" outcome: it is distinct from any finite
/// residual, however large, so root finders can reject the trial point.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DomainViolation {
    /// Short description of the violated requirement.
    pub reason: &'static str,
    /// Equation that produced the violation, filled in by the model.
    pub equation: Option<String>,
}

impl DomainViolation {
    pub fn new(reason: &'static str) -> Self {
        Self {
            reason,
            equation: None,
        }
    }

    /// Attaches the name of the offending equation.
    pub fn in_equation(mut self, equation: &str) -> Self {
        self.equation = Some(equation.to_string());
        self
    }
}

/// Result of evaluating a single residual.
pub type Evaluation = std::result::Result<f64, DomainViolation>;

type EquationFn = dyn Fn(&[f64], &[f64]) -> Evaluation + Send + Sync;

/// Magnitude a residual is measured against when compared with the tolerance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResidualScale {
    /// `max(1, |x_j|)` over the variables the equation reads. Suits equations
    /// written in levels, whose rounding error grows with the variables.
    #[default]
    Levels,
    /// Residual compared as is, for equations written in ratios or rates.
    Unit,
}

/// A pure residual function tagged with a human-readable name.
#[derive(Clone)]
pub struct Equation {
    name: String,
    variables: Vec<String>,
    parameters: Vec<String>,
    scale: ResidualScale,
    function: Arc<EquationFn>,
}

impl Equation {
    /// Creates an equation reading `variables` and `parameters` in the given order.
    pub fn new<F>(name: impl Into<String>, variables: &[&str], parameters: &[&str], function: F) -> Self
    where
        F: Fn(&[f64], &[f64]) -> Evaluation + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            variables: variables.iter().map(|name| name.to_string()).collect(),
            parameters: parameters.iter().map(|name| name.to_string()).collect(),
            scale: ResidualScale::default(),
            function: Arc::new(function),
        }
    }

    /// Overrides how the residual is scaled before the tolerance check.
    pub fn with_scale(mut self, scale: ResidualScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variables read by the equation, in the order the closure receives them.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Parameters read by the equation, in the order the closure receives them.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Magnitude of the residual at `variables`, never below one.
    pub fn scale(&self, variables: &[f64]) -> f64 {
        match self.scale {
            ResidualScale::Unit => 1.0,
            ResidualScale::Levels => variables
                .iter()
                .filter(|value| value.is_finite())
                .fold(1.0, |scale, value| scale.max(value.abs())),
        }
    }

    /// Evaluates the residual. Non-finite results are reported as domain violations.
    pub fn evaluate(&self, variables: &[f64], parameters: &[f64]) -> Evaluation {
        debug_assert_eq!(variables.len(), self.variables.len());
        debug_assert_eq!(parameters.len(), self.parameters.len());

        let residual =
            (self.function)(variables, parameters).map_err(|err| err.in_equation(&self.name))?;
        if !residual.is_finite() {
            return Err(DomainViolation::new("non-finite residual").in_equation(&self.name));
        }
        Ok(residual)
    }
}

impl fmt::Debug for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Equation")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("parameters", &self.parameters)
            .field("scale", &self.scale)
            .finish_non_exhaustive()
    }
}

/// Requires `value > 0`.
pub fn positive(value: f64, reason: &'static str) -> Evaluation {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(DomainViolation::new(reason))
    }
}

/// Natural logarithm of a strictly positive argument.
pub fn ln(value: f64) -> Evaluation {
    positive(value, "logarithm of a non-positive value").map(f64::ln)
}

/// `numerator / denominator` with a non-zero denominator.
pub fn ratio(numerator: f64, denominator: f64) -> Evaluation {
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(DomainViolation::new("division by zero"));
    }
    let value = numerator / denominator;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DomainViolation::new("division overflow"))
    }
}

/// `base^exponent` restricted to positive bases, as in Cobb-Douglas terms.
pub fn pow(base: f64, exponent: f64) -> Evaluation {
    positive(base, "power of a non-positive base").map(|base| base.powf(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_reject_out_of_domain_arguments() {
        assert_eq!(ln(0.0).unwrap_err().reason, "logarithm of a non-positive value");
        assert!(ln(-1.0).is_err());
        assert!(ratio(1.0, 0.0).is_err());
        assert!(pow(-0.5, 0.3).is_err());
        assert!((pow(4.0, 0.5).unwrap() - 2.0).abs() < 1e-15);
        assert!((ratio(1.0, 4.0).unwrap() - 0.25).abs() < 1e-15);
    }

    #[test]
    fn evaluation_tags_the_equation() {
        let equation = Equation::new("log_output", &["y"], &[], |x, _| ln(x[0]));
        let err = equation.evaluate(&[-1.0], &[]).unwrap_err();
        assert_eq!(err.equation.as_deref(), Some("log_output"));

        let overflow = Equation::new("blow_up", &["y"], &[], |x, _| Ok(x[0] * f64::MAX * 10.0));
        assert_eq!(
            overflow.evaluate(&[1.0], &[]).unwrap_err().reason,
            "non-finite residual"
        );
    }

    #[test]
    fn level_equations_scale_with_their_largest_variable() {
        let budget = Equation::new("budget", &["rev", "gc", "ig"], &[], |x, _| Ok(x[0] - x[1] - x[2]));
        assert_eq!(budget.scale(&[0.2, 0.18, 0.03]), 1.0);
        assert_eq!(budget.scale(&[2.1e5, -1.8e5, 3.0e4]), 2.1e5);

        let ratio_form = budget.with_scale(ResidualScale::Unit);
        assert_eq!(ratio_form.scale(&[2.1e5, 1.8e5, 3.0e4]), 1.0);
    }

    #[test]
    fn repeated_evaluation_is_deterministic() {
        let equation = Equation::new("rental_rate", &["r", "y", "k"], &["alpha"], |x, p| {
            Ok(x[0] - p[0] * ratio(x[1], x[2])?)
        });
        let first = equation.evaluate(&[0.04, 1.0, 7.5], &[0.3]).unwrap();
        let second = equation.evaluate(&[0.04, 1.0, 7.5], &[0.3]).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }
}
