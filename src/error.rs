use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::variables::VariableVector;

/// State captured when the numerical stage gives up, so a miscalibration can be
/// diagnosed without rerunning the solve.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Last iterate the solver accepted (or the rejected starting point).
    pub iterate: VariableVector,
    /// Scaled infinity norm of the residual at `iterate`; infinite when it could not be evaluated.
    pub residual_norm: f64,
    /// Newton iterations completed before the failure.
    pub iterations: usize,
    /// Equation responsible for the failure, when one can be identified.
    pub equation: Option<String>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "after {} iterations, residual norm {:e}",
            self.iterations, self.residual_norm
        )?;
        if let Some(equation) = &self.equation {
            write!(f, ", equation `{equation}`")?;
        }
        Ok(())
    }
}

/// Unified error type for `steadyrs` operations.
#[derive(Debug, Error)]
pub enum SteadyStateError {
    /// Raised when a target or parameter referenced by a formula is absent.
    #[error("`{name}` is required by {required_by} but was not supplied")]
    MissingInput {
        /// Name of the absent parameter or target.
        name: String,
        /// Equation or derivation step that needed it.
        required_by: String,
    },

    /// Raised when a name does not refer to any declared variable.
    #[error("unknown {kind} `{name}` referenced by {context}")]
    UnknownName {
        kind: &'static str,
        name: String,
        context: String,
    },

    /// Raised when a name is declared or written twice.
    #[error("{kind} `{name}` is defined more than once")]
    DuplicateName { kind: &'static str, name: String },

    /// Raised when provided vectors or systems have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, often the model-implied value.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when solver options are out of range.
    #[error("invalid solver configuration: {reason}")]
    InvalidConfig { reason: &'static str },

    /// Raised by an analytical derivation that would leave its admissible region.
    #[error("calibration of `{quantity}` failed: value {value} violates requirement `{requirement}`")]
    Calibration {
        quantity: String,
        value: f64,
        requirement: &'static str,
    },

    /// Raised when an equation is evaluated outside its mathematical domain and
    /// backtracking could not recover.
    #[error("equation evaluated outside its domain ({reason}) {diagnostics}")]
    InvalidDomain {
        reason: &'static str,
        diagnostics: Box<Diagnostics>,
    },

    /// Raised when the Newton linear system cannot be solved reliably.
    #[error("Jacobian is singular or ill-conditioned (condition number {condition_number:e}) {diagnostics}")]
    SingularJacobian {
        condition_number: f64,
        diagnostics: Box<Diagnostics>,
    },

    /// Raised when the iteration budget is exhausted.
    #[error("Newton iteration did not converge {diagnostics}")]
    NoConvergence { diagnostics: Box<Diagnostics> },

    /// Raised when the merged steady state fails the final residual check.
    #[error("steady state failed validation: equation `{equation}` has residual {residual:e}")]
    ValidationFailed { equation: String, residual: f64 },
}

impl SteadyStateError {
    /// Helper to format a [`DimensionMismatch`](SteadyStateError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for reporting an absent parameter or target.
    pub fn missing_input(name: impl Into<String>, required_by: impl Into<String>) -> Self {
        Self::MissingInput {
            name: name.into(),
            required_by: required_by.into(),
        }
    }

    /// Helper for reporting a derivation that left its admissible region.
    pub fn calibration(quantity: impl Into<String>, value: f64, requirement: &'static str) -> Self {
        Self::Calibration {
            quantity: quantity.into(),
            value,
            requirement,
        }
    }

    /// Stable cause code for reporting layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "missing_target",
            Self::UnknownName { .. } | Self::DuplicateName { .. } | Self::DimensionMismatch { .. } => {
                "invalid_model"
            }
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Calibration { .. } => "invalid_calibration",
            Self::InvalidDomain { .. } => "invalid_domain",
            Self::SingularJacobian { .. } => "singular_jacobian",
            Self::NoConvergence { .. } => "no_convergence",
            Self::ValidationFailed { .. } => "validation_failed",
        }
    }

    /// Diagnostics attached to numerical failures.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::InvalidDomain { diagnostics, .. }
            | Self::SingularJacobian { diagnostics, .. }
            | Self::NoConvergence { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, SteadyStateError>;

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::*;

    #[test]
    fn codes_follow_the_failure_taxonomy() {
        let iterate = VariableVector::new(vec!["l".to_string()], DVector::from_vec(vec![0.3]))
            .unwrap();
        let err = SteadyStateError::NoConvergence {
            diagnostics: Box::new(Diagnostics {
                iterate,
                residual_norm: 1e-3,
                iterations: 100,
                equation: None,
            }),
        };
        assert_eq!(err.code(), "no_convergence");
        assert_eq!(err.diagnostics().unwrap().iterations, 100);
        assert!(err.to_string().contains("after 100 iterations"));

        let missing = SteadyStateError::missing_input("beta", "euler");
        assert_eq!(missing.code(), "missing_target");
        assert!(missing.diagnostics().is_none());
    }
}
