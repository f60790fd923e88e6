//! Deterministic steady states of calibrated macroeconomic models.
//!
//! A steady state is a fixed point of the model's equilibrium equations. This
//! crate computes it in two stages that share one core:
//!
//! - an analytical stage (`calibration` module) that back-solves parameters from
//!   target steady-state levels and pins whatever variables have a closed form,
//! - a numerical stage (`newton` module) that runs a damped Newton iteration with
//!   finite-difference Jacobians on the equations that are left.
//!
//! Equations are plain closures registered in a [`Model`] (`model` and
//! `equation` modules). Parameters travel as an explicit [`ParameterSet`] value,
//! so repeated or parallel solves never share mutable state. The
//! `steady_state` module orchestrates both stages and re-checks every residual
//! before handing out a [`SteadyState`]. A worked model with public capital and
//! a labour-income tax lives in `fiscal_growth`.
//!
//! # Quick start
//!
//! ```no_run
//! use steadyrs::fiscal_growth::{self, baseline_targets};
//! use steadyrs::{InitialGuess, SolverConfig};
//!
//! // Closed form: tfp and chi are back-solved from target output and hours.
//! let calibrated = fiscal_growth::closed_form_problem()
//!     .expect("valid model")
//!     .compute_steady_state(&baseline_targets(), &InitialGuess::new(), &SolverConfig::default())
//!     .expect("consistent targets");
//!
//! // Numerical: a fiscal experiment with the calibrated structural parameters.
//! let policy = fiscal_growth::structural_parameters(&calibrated)
//!     .expect("calibrated parameters")
//!     .with("gy", 0.20);
//! let steady = fiscal_growth::numerical_problem()
//!     .expect("valid model")
//!     .compute_steady_state(
//!         &policy,
//!         &InitialGuess::from_steady_state(&calibrated),
//!         &SolverConfig::default(),
//!     )
//!     .expect("converged");
//! println!("hours: {:?}, tax rate: {:?}", steady.value("l"), steady.value("tau"));
//! ```

pub mod basin;
pub mod calibration;
pub mod equation;
pub mod error;
pub mod fiscal_growth;
pub mod jacobian;
pub mod model;
pub mod newton;
pub mod parameters;
pub mod solving;
pub mod steady_state;
pub mod variables;

pub use calibration::{AnalyticalResolver, PassThrough, Resolution};
pub use equation::{DomainViolation, Equation, ResidualScale};
pub use error::{Diagnostics, Result, SteadyStateError};
pub use model::{Model, ModelBuilder};
pub use newton::ResidualFunction;
pub use parameters::ParameterSet;
pub use solving::{SolveSummary, SolverConfig};
pub use steady_state::{InitialGuess, SteadyState, SteadyStateProblem};
pub use variables::VariableVector;
