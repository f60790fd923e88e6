//! Damped Newton iteration with domain backtracking.

use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};

use crate::equation::DomainViolation;
use crate::error::{Diagnostics, Result, SteadyStateError};
use crate::jacobian::{central_difference, condition_number};
use crate::solving::{SolveSummary, SolverConfig};
use crate::variables::VariableVector;

/// A square system of residual equations `F(x) = 0`.
pub trait ResidualFunction {
    /// Evaluates every residual at `x`, or reports that `x` is outside the domain.
    fn residuals(&self, x: &DVector<f64>) -> std::result::Result<DVector<f64>, DomainViolation>;

    /// Analytic Jacobian at `x`. `None` selects symmetric finite differences.
    fn jacobian(
        &self,
        _x: &DVector<f64>,
    ) -> Option<std::result::Result<DMatrix<f64>, DomainViolation>> {
        None
    }

    /// Magnitude of each residual at `x`, used to judge convergence. Defaults to one.
    fn residual_scales(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_element(x.len(), 1.0)
    }
}

/// Residuals divided by their scales.
pub fn scaled_residuals(residuals: &DVector<f64>, scales: &DVector<f64>) -> DVector<f64> {
    residuals.component_div(scales)
}

/// Adapter that turns a closure into a [`ResidualFunction`].
#[derive(Clone, Copy, Debug)]
pub struct FnResidual<F>(F);

/// Wraps `f` as a residual function with finite-difference Jacobians.
pub fn residual_fn<F>(f: F) -> FnResidual<F>
where
    F: Fn(&DVector<f64>) -> std::result::Result<DVector<f64>, DomainViolation>,
{
    FnResidual(f)
}

impl<F> ResidualFunction for FnResidual<F>
where
    F: Fn(&DVector<f64>) -> std::result::Result<DVector<f64>, DomainViolation>,
{
    fn residuals(&self, x: &DVector<f64>) -> std::result::Result<DVector<f64>, DomainViolation> {
        (self.0)(x)
    }
}

/// Converged iterate together with its convergence trace.
#[derive(Clone, Debug)]
pub struct RootSolution {
    pub variables: VariableVector,
    pub summary: SolveSummary,
}

/// Solves `function(x) = 0` starting from `x0`.
///
/// Each iteration solves `J dx = -F(x)` and moves to `x + damping * dx`. A trial
/// point outside the residual's domain halves the step, at most
/// `config.max_backtracks` times per iteration. Convergence requires both the
/// scaled residual infinity norm (see [`ResidualFunction::residual_scales`]) and
/// the scaled step norm to fall below `config.tolerance`; a starting point whose
/// residual is already below it is returned without iterating. No state survives
/// between calls.
pub fn solve<F>(x0: &VariableVector, function: &F, config: &SolverConfig) -> Result<RootSolution>
where
    F: ResidualFunction + ?Sized,
{
    config.validate()?;

    let n = x0.len();
    if n == 0 {
        return Ok(RootSolution {
            variables: x0.clone(),
            summary: SolveSummary::default(),
        });
    }
    if !x0.is_finite() {
        return Err(domain_failure(
            x0.clone(),
            f64::INFINITY,
            0,
            DomainViolation::new("non-finite initial guess"),
        ));
    }

    let mut x = x0.values().clone();
    let mut r = checked_residuals(function, &x)
        .map_err(|violation| domain_failure(x0.clone(), f64::INFINITY, 0, violation))?;
    if r.len() != n {
        return Err(SteadyStateError::dimension_mismatch(
            "residual length",
            n,
            r.len(),
        ));
    }

    let mut residual_norm = residual_norm_at(function, &x, &r);
    let mut step_norm = f64::INFINITY;
    let mut history = vec![residual_norm];
    let mut backtracks = 0usize;
    debug!("newton start: {n} unknowns, residual norm {residual_norm:e}");

    if residual_norm < config.tolerance {
        return Ok(RootSolution {
            variables: x0.clone(),
            summary: SolveSummary {
                iterations: 0,
                residual_norm,
                step_norm: 0.0,
                backtracks,
                history,
            },
        });
    }

    for iteration in 1..=config.max_iterations {
        let jac = match function.jacobian(&x) {
            Some(analytic) => analytic,
            None => central_difference(function, &x, &r, config.fd_step),
        }
        .map_err(|violation| {
            domain_failure(relabel(x0, &x), residual_norm, iteration - 1, violation)
        })?;

        if jac.nrows() != n || jac.ncols() != n {
            return Err(SteadyStateError::dimension_mismatch(
                "Jacobian shape",
                n,
                jac.nrows().max(jac.ncols()),
            ));
        }

        let condition = condition_number(&jac);
        trace!("iteration {iteration}: Jacobian condition number {condition:e}");
        if condition.is_nan() || condition > config.max_condition_number {
            warn!("rejecting Jacobian with condition number {condition:e} at iteration {iteration}");
            return Err(singular_failure(
                relabel(x0, &x),
                residual_norm,
                iteration - 1,
                condition,
            ));
        }

        let direction = match jac.lu().solve(&(-&r)) {
            Some(direction) if direction.iter().all(|value| value.is_finite()) => direction,
            _ => {
                return Err(singular_failure(
                    relabel(x0, &x),
                    residual_norm,
                    iteration - 1,
                    condition,
                ))
            }
        };

        let mut step = direction * config.damping;
        let mut attempts = 0usize;
        let (trial, trial_residuals) = loop {
            let trial = &x + &step;
            match checked_residuals(function, &trial) {
                Ok(values) => break (trial, values),
                Err(violation) => {
                    if attempts == config.max_backtracks {
                        return Err(domain_failure(
                            relabel(x0, &x),
                            residual_norm,
                            iteration - 1,
                            violation,
                        ));
                    }
                    attempts += 1;
                    warn!(
                        "iteration {iteration}: trial point violates domain ({}), halving step",
                        violation.reason
                    );
                    step *= 0.5;
                }
            }
        };
        backtracks += attempts;

        step_norm = scaled_norm(&step, &trial);
        x = trial;
        r = trial_residuals;
        residual_norm = residual_norm_at(function, &x, &r);
        history.push(residual_norm);
        debug!(
            "iteration {iteration}: residual norm {residual_norm:e}, step norm {step_norm:e}"
        );

        if residual_norm < config.tolerance && step_norm < config.tolerance {
            return Ok(RootSolution {
                variables: relabel(x0, &x),
                summary: SolveSummary {
                    iterations: iteration,
                    residual_norm,
                    step_norm,
                    backtracks,
                    history,
                },
            });
        }
    }

    debug!(
        "newton exhausted {} iterations, residual norm {residual_norm:e}, step norm {step_norm:e}",
        config.max_iterations
    );
    Err(SteadyStateError::NoConvergence {
        diagnostics: Box::new(Diagnostics {
            iterate: relabel(x0, &x),
            residual_norm,
            iterations: config.max_iterations,
            equation: None,
        }),
    })
}

fn residual_norm_at<F>(function: &F, x: &DVector<f64>, residuals: &DVector<f64>) -> f64
where
    F: ResidualFunction + ?Sized,
{
    let scales = function.residual_scales(x);
    if scales.len() == residuals.len() {
        scaled_residuals(residuals, &scales).amax()
    } else {
        residuals.amax()
    }
}

/// Largest step component relative to `max(1, |x_j|)`.
fn scaled_norm(step: &DVector<f64>, x: &DVector<f64>) -> f64 {
    step.iter()
        .zip(x.iter())
        .map(|(dx, value)| dx.abs() / value.abs().max(1.0))
        .fold(0.0, f64::max)
}

fn checked_residuals<F>(
    function: &F,
    x: &DVector<f64>,
) -> std::result::Result<DVector<f64>, DomainViolation>
where
    F: ResidualFunction + ?Sized,
{
    let values = function.residuals(x)?;
    if values.iter().all(|value| value.is_finite()) {
        Ok(values)
    } else {
        Err(DomainViolation::new("non-finite residual"))
    }
}

fn relabel(template: &VariableVector, values: &DVector<f64>) -> VariableVector {
    template
        .with_values(values.clone())
        .unwrap_or_else(|_| template.clone())
}

fn domain_failure(
    iterate: VariableVector,
    residual_norm: f64,
    iterations: usize,
    violation: DomainViolation,
) -> SteadyStateError {
    SteadyStateError::InvalidDomain {
        reason: violation.reason,
        diagnostics: Box::new(Diagnostics {
            iterate,
            residual_norm,
            iterations,
            equation: violation.equation,
        }),
    }
}

fn singular_failure(
    iterate: VariableVector,
    residual_norm: f64,
    iterations: usize,
    condition_number: f64,
) -> SteadyStateError {
    SteadyStateError::SingularJacobian {
        condition_number,
        diagnostics: Box::new(Diagnostics {
            iterate,
            residual_norm,
            iterations,
            equation: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::equation;

    fn scalar(name: &str, value: f64) -> VariableVector {
        VariableVector::from_pairs([(name, value)]).unwrap()
    }

    #[test]
    fn simple_quadratic() {
        // Solve x^2 - 4 = 0 from x = 3.
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, x[0] * x[0] - 4.0)));
        let solution = solve(&scalar("x", 3.0), &f, &SolverConfig::default()).unwrap();

        assert_relative_eq!(solution.variables.values()[0], 2.0, epsilon = 1e-12);
        assert!(solution.summary.residual_norm < 1e-10);
        assert!(solution.summary.step_norm < 1e-10);
        assert_eq!(
            solution.summary.history.len(),
            solution.summary.iterations + 1
        );
    }

    struct Circle;

    impl ResidualFunction for Circle {
        // x^2 + y^2 = 4, x = y
        fn residuals(
            &self,
            x: &DVector<f64>,
        ) -> std::result::Result<DVector<f64>, DomainViolation> {
            Ok(DVector::from_vec(vec![
                x[0] * x[0] + x[1] * x[1] - 4.0,
                x[0] - x[1],
            ]))
        }

        fn jacobian(
            &self,
            x: &DVector<f64>,
        ) -> Option<std::result::Result<DMatrix<f64>, DomainViolation>> {
            Some(Ok(DMatrix::from_row_slice(
                2,
                2,
                &[2.0 * x[0], 2.0 * x[1], 1.0, -1.0],
            )))
        }
    }

    #[test]
    fn analytic_jacobian_is_used_when_supplied() {
        let x0 = VariableVector::from_pairs([("x", 1.0), ("y", 2.0)]).unwrap();
        let solution = solve(&x0, &Circle, &SolverConfig::default()).unwrap();
        let root = 2.0_f64.sqrt();
        assert_relative_eq!(solution.variables.get("x").unwrap(), root, epsilon = 1e-12);
        assert_relative_eq!(solution.variables.get("y").unwrap(), root, epsilon = 1e-12);
    }

    #[test]
    fn backtracks_out_of_invalid_domain() {
        // ln(x) = 0; the full Newton step from x = 3 lands at a negative x.
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, equation::ln(x[0])?)));
        let solution = solve(&scalar("x", 3.0), &f, &SolverConfig::default()).unwrap();
        assert!(solution.summary.backtracks >= 1);
        assert_relative_eq!(solution.variables.values()[0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn exhausted_backtracking_reports_domain_violation() {
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, equation::ln(x[0])?)));
        let config = SolverConfig::default().with_max_backtracks(0);
        let err = solve(&scalar("x", 3.0), &f, &config).unwrap_err();

        assert_eq!(err.code(), "invalid_domain");
        let diagnostics = err.diagnostics().unwrap();
        assert_eq!(diagnostics.iterate.values()[0], 3.0);
        assert!(diagnostics.residual_norm.is_finite());
    }

    #[test]
    fn invalid_initial_guess_fails_without_nan() {
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, equation::ln(x[0])?)));
        let err = solve(&scalar("x", -1.0), &f, &SolverConfig::default()).unwrap_err();
        match err {
            SteadyStateError::InvalidDomain { reason, diagnostics } => {
                assert_eq!(reason, "logarithm of a non-positive value");
                assert_eq!(diagnostics.iterations, 0);
                assert!(!diagnostics.iterate.values()[0].is_nan());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn singular_jacobian_is_reported() {
        // Two copies of the same line: rank one everywhere.
        let f = residual_fn(|x: &DVector<f64>| {
            Ok(DVector::from_vec(vec![
                x[0] + x[1] - 2.0,
                2.0 * x[0] + 2.0 * x[1] - 4.0,
            ]))
        });
        let x0 = VariableVector::from_pairs([("a", 0.0), ("b", 0.0)]).unwrap();
        let err = solve(&x0, &f, &SolverConfig::default()).unwrap_err();
        assert_eq!(err.code(), "singular_jacobian");
    }

    #[test]
    fn iteration_budget_is_enforced() {
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, x[0].powi(3) - 8.0)));
        let config = SolverConfig::default().with_max_iterations(2);
        let err = solve(&scalar("x", 100.0), &f, &config).unwrap_err();

        match err {
            SteadyStateError::NoConvergence { diagnostics } => {
                assert_eq!(diagnostics.iterations, 2);
                assert!(diagnostics.residual_norm > 1e-10);
                assert_eq!(diagnostics.iterate.names()[0], "x");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn exact_root_is_accepted_without_a_jacobian() {
        // The Jacobian of x^2 vanishes at the root x = 0.
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, x[0] * x[0])));
        let solution = solve(&scalar("x", 0.0), &f, &SolverConfig::default()).unwrap();

        assert_eq!(solution.variables.values()[0], 0.0);
        assert_eq!(solution.summary.iterations, 0);
        assert_eq!(solution.summary.step_norm, 0.0);
        assert_eq!(solution.summary.history, vec![0.0]);
    }

    struct Levels;

    impl ResidualFunction for Levels {
        // x = 3e8, with rounding noise far above the tolerance in absolute terms.
        fn residuals(
            &self,
            x: &DVector<f64>,
        ) -> std::result::Result<DVector<f64>, DomainViolation> {
            Ok(DVector::from_element(1, x[0] - 3.0e8 + 3.0e-8))
        }

        fn residual_scales(&self, x: &DVector<f64>) -> DVector<f64> {
            x.map(|value| value.abs().max(1.0))
        }
    }

    #[test]
    fn convergence_is_judged_on_scaled_residuals() {
        let solution = solve(&scalar("x", 3.0e8), &Levels, &SolverConfig::default()).unwrap();
        assert_eq!(solution.summary.iterations, 0);
        assert!(solution.summary.residual_norm < 1e-15);
    }

    #[test]
    fn damping_slows_but_still_converges() {
        let f = residual_fn(|x: &DVector<f64>| Ok(DVector::from_element(1, x[0] * x[0] - 4.0)));
        let undamped = solve(&scalar("x", 3.0), &f, &SolverConfig::default()).unwrap();
        let damped = solve(
            &scalar("x", 3.0),
            &f,
            &SolverConfig::default()
                .with_damping(0.5)
                .with_max_iterations(200),
        )
        .unwrap();
        assert!(damped.summary.iterations > undamped.summary.iterations);
        assert_relative_eq!(damped.variables.values()[0], 2.0, epsilon = 1e-10);
    }
}
