//! Root-finder configuration and diagnostics.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SteadyStateError};

/// Numeric options for one steady-state solve. Read-only during the solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Bound on both the scaled residual infinity norm and the scaled step norm.
    pub tolerance: f64,
    /// Maximum number of Newton iterations before aborting.
    pub max_iterations: usize,
    /// Fraction of the Newton step applied each iteration (1.0 is plain Newton).
    pub damping: f64,
    /// Relative finite-difference step, scaled by `max(1, |x_j|)`.
    pub fd_step: f64,
    /// Step halvings allowed per iteration when a trial point leaves the domain.
    pub max_backtracks: usize,
    /// Jacobians with a larger condition number are treated as singular.
    pub max_condition_number: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 100,
            damping: 1.0,
            fd_step: 1e-6,
            max_backtracks: 20,
            max_condition_number: 1e12,
        }
    }
}

impl SolverConfig {
    /// Override the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the maximum number of Newton iterations that should be attempted.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Override the step damping factor; values below one widen the basin of attraction.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Override the relative finite-difference step used for Jacobians.
    pub fn with_fd_step(mut self, fd_step: f64) -> Self {
        self.fd_step = fd_step;
        self
    }

    /// Set how many step halvings one iteration may spend leaving an invalid region.
    pub fn with_max_backtracks(mut self, max_backtracks: usize) -> Self {
        self.max_backtracks = max_backtracks;
        self
    }

    /// Override the condition number above which a Jacobian counts as singular.
    pub fn with_max_condition_number(mut self, max_condition_number: f64) -> Self {
        self.max_condition_number = max_condition_number;
        self
    }

    /// Checks that every option lies in its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(SteadyStateError::InvalidConfig {
                reason: "tolerance must be finite and positive",
            });
        }
        if self.max_iterations == 0 {
            return Err(SteadyStateError::InvalidConfig {
                reason: "max_iterations must be at least one",
            });
        }
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(SteadyStateError::InvalidConfig {
                reason: "damping must lie in (0, 1]",
            });
        }
        if !self.fd_step.is_finite() || self.fd_step <= 0.0 {
            return Err(SteadyStateError::InvalidConfig {
                reason: "fd_step must be finite and positive",
            });
        }
        if self.max_condition_number.is_nan() || self.max_condition_number < 1.0 {
            return Err(SteadyStateError::InvalidConfig {
                reason: "max_condition_number must be at least one",
            });
        }
        Ok(())
    }
}

/// Diagnostics returned alongside a converged iterate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    /// Number of Newton iterations performed; zero when no unknowns were left.
    pub iterations: usize,
    /// Scaled infinity norm of the residual at the returned point.
    pub residual_norm: f64,
    /// Scaled infinity norm of the final step.
    pub step_norm: f64,
    /// Total step halvings caused by domain violations.
    pub backtracks: usize,
    /// Residual norm at the starting point and after every iteration.
    pub history: Vec<f64>,
}

impl SolveSummary {
    /// Whether the residual norm never increased along the iteration path.
    ///
    /// Increases below `floor` are treated as rounding noise.
    pub fn is_monotone(&self, floor: f64) -> bool {
        self.history
            .windows(2)
            .all(|pair| pair[1] <= pair[0] || pair[1] < floor)
    }
}
