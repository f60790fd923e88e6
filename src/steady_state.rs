//! High-level steady-state pipeline: analytical resolution, Newton iteration on
//! whatever is left, and a final residual check over the whole model.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::calibration::AnalyticalResolver;
use crate::error::{Diagnostics, Result, SteadyStateError};
use crate::model::{Model, ReducedSystem};
use crate::newton::{self, ResidualFunction};
use crate::parameters::ParameterSet;
use crate::solving::{SolveSummary, SolverConfig};
use crate::variables::VariableVector;

/// Caller-supplied starting values that override a model's default guesses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitialGuess {
    values: BTreeMap<String, f64>,
}

impl InitialGuess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the starting value of `variable`.
    pub fn with(mut self, variable: impl Into<String>, value: f64) -> Self {
        self.values.insert(variable.into(), value);
        self
    }

    /// Starts from every variable of a previously computed steady state.
    pub fn from_steady_state(steady_state: &SteadyState) -> Self {
        steady_state
            .variables()
            .iter()
            .fold(Self::new(), |guess, (name, value)| guess.with(name, value))
    }

    pub fn get(&self, variable: &str) -> Option<f64> {
        self.values.get(variable).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

/// A validated fixed point of the model together with the parameters that produced it.
///
/// Only [`SteadyStateProblem::compute_steady_state`] creates values of this type,
/// and only after every equation has been re-evaluated within tolerance.
#[derive(Clone, Debug, Serialize)]
pub struct SteadyState {
    variables: VariableVector,
    parameters: ParameterSet,
    residuals: DVector<f64>,
    numerical_variables: Vec<String>,
    summary: SolveSummary,
}

impl SteadyState {
    /// Steady-state values in model order.
    pub fn variables(&self) -> &VariableVector {
        &self.variables
    }

    /// Targets extended with every derived parameter.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Value of `variable`, if the model declares it.
    pub fn value(&self, variable: &str) -> Option<f64> {
        self.variables.get(variable)
    }

    /// Residual of every equation at the steady state, in equation order.
    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    /// Largest absolute residual.
    pub fn max_residual(&self) -> f64 {
        self.residuals.amax()
    }

    /// Variables found by Newton iteration rather than in closed form.
    pub fn numerical_variables(&self) -> &[String] {
        &self.numerical_variables
    }

    /// Whether the analytical stage pinned every variable.
    pub fn is_closed_form(&self) -> bool {
        self.numerical_variables.is_empty()
    }

    /// Diagnostics from the numerical stage (empty for closed-form solutions).
    pub fn summary(&self) -> &SolveSummary {
        &self.summary
    }
}

/// Couples an equation registry with the analytical stage that calibrates it.
#[derive(Clone, Debug)]
pub struct SteadyStateProblem<R> {
    model: Model,
    resolver: R,
}

impl<R: AnalyticalResolver> SteadyStateProblem<R> {
    /// Constructs a new steady-state problem.
    pub fn new(model: Model, resolver: R) -> Self {
        Self { model, resolver }
    }

    /// Accessor for the equation registry.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Accessor for the analytical stage.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Computes the steady state implied by `targets`.
    ///
    /// The analytical resolver runs first and its failures are final. Variables it
    /// pins are held fixed; the remaining ones start from `guesses` (or the model's
    /// defaults) and are found by Newton iteration on the equations that read them.
    /// When nothing is left free the numerical stage is skipped. Either way every
    /// equation is re-evaluated before the result is returned.
    pub fn compute_steady_state(
        &self,
        targets: &ParameterSet,
        guesses: &InitialGuess,
        config: &SolverConfig,
    ) -> Result<SteadyState> {
        config.validate()?;
        targets.ensure_finite()?;

        let resolution = self.resolver.resolve(targets)?;
        info!(
            "analytical stage pinned {} of {} variables",
            resolution.pinned_count(),
            self.model.variables().len()
        );

        let bound = self.model.bind(&resolution.parameters)?;
        let mut start = self.model.default_guess()?.into_values();
        let mut pinned = vec![false; start.len()];

        for (name, value) in resolution.pinned() {
            let index = self.variable_index(name, "analytical resolution")?;
            start[index] = value;
            pinned[index] = true;
        }

        for (name, value) in guesses.iter() {
            let index = self.variable_index(name, "initial guess")?;
            if pinned[index] {
                warn!("ignoring initial guess for `{name}`, which is pinned analytically");
                continue;
            }
            start[index] = value;
        }

        let free: Vec<usize> = (0..start.len()).filter(|&index| !pinned[index]).collect();
        let (values, numerical_variables, summary) = if free.is_empty() {
            debug!("every variable pinned analytically; skipping the numerical stage");
            (start, Vec::new(), SolveSummary::default())
        } else {
            let reduced = bound.reduce(start, free)?;
            debug!(
                "solving {} equations numerically: {:?}",
                reduced.active_equations().len(),
                reduced.active_equations()
            );
            let x0 = reduced.initial_point()?;
            let solution = newton::solve(&x0, &reduced, config)
                .map_err(|err| name_largest_residual(err, &reduced))?;
            info!(
                "numerical stage converged in {} iterations (residual norm {:e})",
                solution.summary.iterations, solution.summary.residual_norm
            );
            let full = reduced.expand(solution.variables.values());
            (full, reduced.free_variables(), solution.summary)
        };

        let variables = VariableVector::new(self.model.variables().to_vec(), values)?;
        let residuals = bound.evaluate(variables.values()).map_err(|violation| {
            SteadyStateError::InvalidDomain {
                reason: violation.reason,
                diagnostics: Box::new(Diagnostics {
                    iterate: variables.clone(),
                    residual_norm: f64::INFINITY,
                    iterations: summary.iterations,
                    equation: violation.equation,
                }),
            }
        })?;

        if !residuals.is_empty() {
            let scaled = newton::scaled_residuals(&residuals, &bound.scales(variables.values()));
            let index = scaled.iamax();
            if scaled[index].abs() > config.tolerance {
                return Err(SteadyStateError::ValidationFailed {
                    equation: self.model.equations()[index].name().to_string(),
                    residual: residuals[index],
                });
            }
        }

        Ok(SteadyState {
            variables,
            parameters: resolution.parameters,
            residuals,
            numerical_variables,
            summary,
        })
    }

    fn variable_index(&self, name: &str, context: &str) -> Result<usize> {
        self.model
            .index_of(name)
            .ok_or_else(|| SteadyStateError::UnknownName {
                kind: "variable",
                name: name.to_string(),
                context: context.to_string(),
            })
    }
}

/// Names the active equation with the largest scaled residual at the last iterate
/// of a failed numerical stage, when the solver could not name one itself.
fn name_largest_residual(mut err: SteadyStateError, reduced: &ReducedSystem<'_>) -> SteadyStateError {
    if let SteadyStateError::NoConvergence { diagnostics }
    | SteadyStateError::SingularJacobian { diagnostics, .. } = &mut err
    {
        if diagnostics.equation.is_none() {
            let x = diagnostics.iterate.values();
            if let Ok(residuals) = reduced.residuals(x) {
                if !residuals.is_empty() {
                    let scaled = newton::scaled_residuals(&residuals, &reduced.residual_scales(x));
                    let name = reduced.active_equations()[scaled.iamax()].to_string();
                    diagnostics.equation = Some(name);
                }
            }
        }
    }
    err
}

impl<R: AnalyticalResolver + Sync> SteadyStateProblem<R> {
    /// Solves independent target sets in parallel, returning results in input order.
    pub fn sweep(
        &self,
        targets: &[ParameterSet],
        guesses: &InitialGuess,
        config: &SolverConfig,
    ) -> Vec<Result<SteadyState>> {
        targets
            .par_iter()
            .map(|target| self.compute_steady_state(target, guesses, config))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::calibration::{PassThrough, Resolution};
    use crate::equation::{self, Equation};

    /// Capital from a rental-rate target, labour from a nonlinear supply condition.
    fn toy_model() -> Model {
        Model::builder()
            .variable("k", 1.0)
            .variable("l", 0.5)
            .equation(Equation::new("capital", &["k"], &["ky"], |x, p| Ok(x[0] - p[0])))
            .equation(Equation::new("labour", &["l", "k"], &["chi"], |x, p| {
                Ok(p[0] * x[0] * x[0] - equation::ln(x[1])?)
            }))
            .build()
            .unwrap()
    }

    struct PinCapital;

    impl AnalyticalResolver for PinCapital {
        fn resolve(&self, targets: &ParameterSet) -> Result<Resolution> {
            let ky = targets.require("ky", "capital pin")?;
            let mut resolution = Resolution::new(targets.clone());
            resolution.pin("k", ky)?;
            Ok(resolution)
        }
    }

    #[test]
    fn merges_pinned_and_numerical_variables() {
        let problem = SteadyStateProblem::new(toy_model(), PinCapital);
        let targets = ParameterSet::new().with("ky", std::f64::consts::E).with("chi", 4.0);
        let steady = problem
            .compute_steady_state(&targets, &InitialGuess::new(), &SolverConfig::default())
            .unwrap();

        assert_eq!(steady.numerical_variables(), ["l"]);
        assert_relative_eq!(steady.value("k").unwrap(), std::f64::consts::E, epsilon = 1e-15);
        assert_relative_eq!(steady.value("l").unwrap(), 0.5, epsilon = 1e-10);
        assert!(steady.max_residual() <= 1e-10);
    }

    #[test]
    fn fully_numerical_with_pass_through() {
        let problem = SteadyStateProblem::new(toy_model(), PassThrough);
        let targets = ParameterSet::new().with("ky", std::f64::consts::E).with("chi", 4.0);
        let guesses = InitialGuess::new().with("k", 2.0).with("l", 0.7);
        let steady = problem
            .compute_steady_state(&targets, &guesses, &SolverConfig::default())
            .unwrap();

        assert_eq!(steady.numerical_variables(), ["k", "l"]);
        assert_relative_eq!(steady.value("l").unwrap(), 0.5, epsilon = 1e-10);
    }

    #[test]
    fn unknown_guess_name_is_rejected() {
        let problem = SteadyStateProblem::new(toy_model(), PassThrough);
        let targets = ParameterSet::new().with("ky", 1.0).with("chi", 1.0);
        let guesses = InitialGuess::new().with("z", 1.0);
        let err = problem
            .compute_steady_state(&targets, &guesses, &SolverConfig::default())
            .unwrap_err();
        assert!(matches!(err, SteadyStateError::UnknownName { .. }));
    }

    #[test]
    fn missing_parameter_is_reported_before_solving() {
        let problem = SteadyStateProblem::new(toy_model(), PinCapital);
        let targets = ParameterSet::new().with("ky", 1.0);
        let err = problem
            .compute_steady_state(&targets, &InitialGuess::new(), &SolverConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "missing_target");
    }

    #[test]
    fn failed_newton_names_the_worst_equation() {
        let problem = SteadyStateProblem::new(toy_model(), PinCapital);
        let targets = ParameterSet::new().with("ky", std::f64::consts::E).with("chi", 4.0);
        let guesses = InitialGuess::new().with("l", 3.0);
        let config = SolverConfig::default().with_max_iterations(1);
        let err = problem
            .compute_steady_state(&targets, &guesses, &config)
            .unwrap_err();

        assert_eq!(err.code(), "no_convergence");
        let diagnostics = err.diagnostics().unwrap();
        assert_eq!(diagnostics.equation.as_deref(), Some("labour"));
        assert_eq!(diagnostics.iterations, 1);
    }

    #[test]
    fn validation_scales_residuals_with_the_variables() {
        // A fixed absolute error that is negligible only next to a large k.
        let model = Model::builder()
            .variable("k", 1.0)
            .equation(Equation::new("capital", &["k"], &["ky"], |x, p| {
                Ok(x[0] - p[0] + 1e-7)
            }))
            .build()
            .unwrap();
        let problem = SteadyStateProblem::new(model, PinCapital);

        let large = ParameterSet::new().with("ky", 1.0e8);
        let steady = problem
            .compute_steady_state(&large, &InitialGuess::new(), &SolverConfig::default())
            .unwrap();
        assert!(steady.is_closed_form());

        let small = ParameterSet::new().with("ky", 1.0);
        let err = problem
            .compute_steady_state(&small, &InitialGuess::new(), &SolverConfig::default())
            .unwrap_err();
        match err {
            SteadyStateError::ValidationFailed { equation, residual } => {
                assert_eq!(equation, "capital");
                assert!(residual > 0.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn sweep_preserves_input_order() {
        let problem = SteadyStateProblem::new(toy_model(), PinCapital);
        let targets: Vec<ParameterSet> = [1.0, 4.0, 9.0]
            .iter()
            .map(|chi| ParameterSet::new().with("ky", std::f64::consts::E).with("chi", *chi))
            .collect();
        let results = problem.sweep(&targets, &InitialGuess::new(), &SolverConfig::default());

        assert_eq!(results.len(), 3);
        for (result, chi) in results.iter().zip([1.0_f64, 4.0, 9.0]) {
            let steady = result.as_ref().unwrap();
            assert_relative_eq!(steady.value("l").unwrap(), 1.0 / chi.sqrt(), epsilon = 1e-10);
        }
    }
}
