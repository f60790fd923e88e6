//! Equation registry and residual evaluation.
//!
//! A [`Model`] fixes the variable ordering and the equation ordering of a square
//! steady-state system. Name references are checked when the model is built
//! (variables) and when it is bound to a [`ParameterSet`] (parameters), so
//! evaluation itself never looks anything up by name.

use std::collections::HashSet;

use nalgebra::DVector;

use crate::equation::{DomainViolation, Equation, Evaluation};
use crate::error::{Diagnostics, Result, SteadyStateError};
use crate::newton::ResidualFunction;
use crate::parameters::ParameterSet;
use crate::variables::VariableVector;

/// Immutable, validated system of steady-state equations.
#[derive(Clone, Debug)]
pub struct Model {
    variables: Vec<String>,
    default_guesses: Vec<f64>,
    equations: Vec<Equation>,
    bindings: Vec<Vec<usize>>,
}

impl Model {
    /// Start declaring variables and equations.
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Variable names in residual order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn index_of(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|name| name == variable)
    }

    /// Indices of the variables read by equation `index`.
    pub fn equation_variables(&self, index: usize) -> &[usize] {
        &self.bindings[index]
    }

    /// Default starting point declared alongside the variables.
    pub fn default_guess(&self) -> Result<VariableVector> {
        VariableVector::new(
            self.variables.clone(),
            DVector::from_vec(self.default_guesses.clone()),
        )
    }

    /// Resolves every parameter the equations read, failing on the first absent one.
    pub fn bind(&self, parameters: &ParameterSet) -> Result<BoundModel<'_>> {
        let mut values = Vec::with_capacity(self.equations.len());
        for equation in &self.equations {
            let resolved = equation
                .parameters()
                .iter()
                .map(|name| parameters.require(name, &format!("equation `{}`", equation.name())))
                .collect::<Result<Vec<f64>>>()?;
            values.push(resolved);
        }
        Ok(BoundModel {
            model: self,
            parameters: values,
        })
    }

    /// Evaluates every equation at `x` under `parameters`.
    ///
    /// `x` must follow the model's variable ordering. Evaluation outside an
    /// equation's domain is reported as [`SteadyStateError::InvalidDomain`].
    pub fn residuals(&self, x: &VariableVector, parameters: &ParameterSet) -> Result<DVector<f64>> {
        self.check_ordering(x)?;
        let bound = self.bind(parameters)?;
        bound.evaluate(x.values()).map_err(|violation| {
            SteadyStateError::InvalidDomain {
                reason: violation.reason,
                diagnostics: Box::new(Diagnostics {
                    iterate: x.clone(),
                    residual_norm: f64::INFINITY,
                    iterations: 0,
                    equation: violation.equation,
                }),
            }
        })
    }

    /// Scale of every equation's residual at `x`, in equation order.
    ///
    /// Dividing [`Model::residuals`] by these gives the quantities compared with
    /// the solver tolerance.
    pub fn residual_scales(&self, x: &VariableVector) -> Result<DVector<f64>> {
        self.check_ordering(x)?;
        Ok(DVector::from_fn(self.equations.len(), |index, _| {
            self.equation_scale(index, x.values())
        }))
    }

    fn equation_scale(&self, index: usize, values: &DVector<f64>) -> f64 {
        let inputs: Vec<f64> = self.bindings[index]
            .iter()
            .map(|&variable| values[variable])
            .collect();
        self.equations[index].scale(&inputs)
    }

    fn check_ordering(&self, x: &VariableVector) -> Result<()> {
        if x.len() != self.variables.len() {
            return Err(SteadyStateError::dimension_mismatch(
                "variable vector",
                self.variables.len(),
                x.len(),
            ));
        }
        match self
            .variables
            .iter()
            .zip(x.names())
            .find(|(expected, found)| expected != found)
        {
            Some((_, found)) => Err(SteadyStateError::UnknownName {
                kind: "variable",
                name: found.clone(),
                context: "model variable ordering".to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Collects variables and equations before validating them into a [`Model`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    variables: Vec<(String, f64)>,
    equations: Vec<Equation>,
}

impl ModelBuilder {
    /// Declares the next variable together with its default starting guess.
    pub fn variable(mut self, name: impl Into<String>, default_guess: f64) -> Self {
        self.variables.push((name.into(), default_guess));
        self
    }

    /// Appends the next equation.
    pub fn equation(mut self, equation: Equation) -> Self {
        self.equations.push(equation);
        self
    }

    /// Finalizes construction after checking names, references and squareness.
    pub fn build(self) -> Result<Model> {
        let (variables, default_guesses): (Vec<String>, Vec<f64>) =
            self.variables.into_iter().unzip();

        let mut seen = HashSet::with_capacity(variables.len());
        for name in &variables {
            if !seen.insert(name.as_str()) {
                return Err(SteadyStateError::DuplicateName {
                    kind: "variable",
                    name: name.clone(),
                });
            }
        }
        if default_guesses.iter().any(|guess| !guess.is_finite()) {
            return Err(SteadyStateError::InvalidConfig {
                reason: "default guesses must be finite",
            });
        }

        let mut equation_names = HashSet::with_capacity(self.equations.len());
        for equation in &self.equations {
            if !equation_names.insert(equation.name()) {
                return Err(SteadyStateError::DuplicateName {
                    kind: "equation",
                    name: equation.name().to_string(),
                });
            }
        }

        if self.equations.len() != variables.len() {
            return Err(SteadyStateError::dimension_mismatch(
                "equation count",
                variables.len(),
                self.equations.len(),
            ));
        }

        let mut bindings = Vec::with_capacity(self.equations.len());
        for equation in &self.equations {
            let indices = equation
                .variables()
                .iter()
                .map(|name| {
                    variables.iter().position(|declared| declared == name).ok_or_else(|| {
                        SteadyStateError::UnknownName {
                            kind: "variable",
                            name: name.clone(),
                            context: format!("equation `{}`", equation.name()),
                        }
                    })
                })
                .collect::<Result<Vec<usize>>>()?;
            bindings.push(indices);
        }

        Ok(Model {
            variables,
            default_guesses,
            equations: self.equations,
            bindings,
        })
    }
}

/// A model with its parameters resolved, ready for repeated evaluation.
#[derive(Clone, Debug)]
pub struct BoundModel<'a> {
    model: &'a Model,
    parameters: Vec<Vec<f64>>,
}

impl<'a> BoundModel<'a> {
    pub fn model(&self) -> &'a Model {
        self.model
    }

    /// Residual of equation `index` at the full variable vector `values`.
    pub fn evaluate_equation(&self, index: usize, values: &DVector<f64>) -> Evaluation {
        let inputs: Vec<f64> = self.model.bindings[index]
            .iter()
            .map(|&variable| values[variable])
            .collect();
        self.model.equations[index].evaluate(&inputs, &self.parameters[index])
    }

    /// Residuals of every equation, in equation order.
    pub fn evaluate(&self, values: &DVector<f64>) -> std::result::Result<DVector<f64>, DomainViolation> {
        let mut residuals = DVector::zeros(self.model.equations.len());
        for index in 0..self.model.equations.len() {
            residuals[index] = self.evaluate_equation(index, values)?;
        }
        Ok(residuals)
    }

    /// Residual scales of every equation at `values`, in equation order.
    pub fn scales(&self, values: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.model.equations.len(), |index, _| {
            self.model.equation_scale(index, values)
        })
    }

    /// Restricts the system to the `free` variables, holding the rest at `base`.
    ///
    /// Only equations that read at least one free variable take part; the others
    /// are settled by `base` alone. The reduced system must be square.
    pub fn reduce(&self, base: DVector<f64>, free: Vec<usize>) -> Result<ReducedSystem<'_>> {
        let n = self.model.variables.len();
        if base.len() != n {
            return Err(SteadyStateError::dimension_mismatch("base vector", n, base.len()));
        }
        if free.iter().any(|&index| index >= n) {
            return Err(SteadyStateError::dimension_mismatch("free variable index", n, free.len()));
        }

        let free_set: HashSet<usize> = free.iter().copied().collect();
        let active: Vec<usize> = (0..self.model.equations.len())
            .filter(|&equation| {
                self.model.bindings[equation]
                    .iter()
                    .any(|variable| free_set.contains(variable))
            })
            .collect();

        if active.len() != free.len() {
            return Err(SteadyStateError::dimension_mismatch(
                "equations reading free variables",
                free.len(),
                active.len(),
            ));
        }

        Ok(ReducedSystem {
            bound: self,
            base,
            free,
            active,
        })
    }
}

/// The square subsystem left for the numerical stage.
#[derive(Clone, Debug)]
pub struct ReducedSystem<'a> {
    bound: &'a BoundModel<'a>,
    base: DVector<f64>,
    free: Vec<usize>,
    active: Vec<usize>,
}

impl ReducedSystem<'_> {
    /// Names of the free variables, in the order of the reduced unknowns.
    pub fn free_variables(&self) -> Vec<String> {
        self.free
            .iter()
            .map(|&index| self.bound.model.variables[index].clone())
            .collect()
    }

    /// Names of the equations solved numerically.
    pub fn active_equations(&self) -> Vec<&str> {
        self.active
            .iter()
            .map(|&index| self.bound.model.equations[index].name())
            .collect()
    }

    /// Current values of the free variables in `base`.
    pub fn initial_point(&self) -> Result<VariableVector> {
        let values = self.free.iter().map(|&index| self.base[index]).collect();
        VariableVector::new(self.free_variables(), DVector::from_vec(values))
    }

    /// Full variable vector with the free entries replaced by `reduced`.
    pub fn expand(&self, reduced: &DVector<f64>) -> DVector<f64> {
        let mut full = self.base.clone();
        for (offset, &index) in self.free.iter().enumerate() {
            full[index] = reduced[offset];
        }
        full
    }
}

impl ResidualFunction for ReducedSystem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> std::result::Result<DVector<f64>, DomainViolation> {
        let full = self.expand(x);
        let mut residuals = DVector::zeros(self.active.len());
        for (offset, &equation) in self.active.iter().enumerate() {
            residuals[offset] = self.bound.evaluate_equation(equation, &full)?;
        }
        Ok(residuals)
    }

    fn residual_scales(&self, x: &DVector<f64>) -> DVector<f64> {
        let full = self.expand(x);
        DVector::from_iterator(
            self.active.len(),
            self.active
                .iter()
                .map(|&equation| self.bound.model.equation_scale(equation, &full)),
        )
    }
}
