//! Detrended neoclassical growth model with public capital and a balanced budget.
//!
//! Output is produced from private capital, public capital and labour,
//! `y = tfp * k^alpha * kg^theta * l^(1 - alpha - theta)`. The government buys a
//! fixed share of output, invests a fixed share in public capital and finances
//! both with a flat labour-income tax. Households have log consumption utility
//! and isoelastic labour disutility `chi * l^(1 + phi) / (1 + phi)`.
//!
//! Two calibrations are provided:
//!
//! - [`TargetedCalibration`] back-solves `tfp` and `chi` from target output and
//!   hours and pins every variable in closed form;
//! - [`StructuralCalibration`] takes `tfp` and `chi` as given. Hours then cannot
//!   be isolated algebraically, so only the rental rate is pinned and the rest
//!   is found numerically.

use crate::calibration::{
    checked_ratio, require_in_unit_interval, require_positive, AnalyticalResolver, Resolution,
};
use crate::equation::{pow, positive, ratio, Equation, ResidualScale};
use crate::error::{Result, SteadyStateError};
use crate::model::Model;
use crate::parameters::ParameterSet;
use crate::steady_state::{SteadyState, SteadyStateProblem};

/// Variables in residual order, with default starting guesses.
pub const VARIABLES: [(&str, f64); 12] = [
    ("r", 0.04),
    ("y", 1.0),
    ("k", 7.5),
    ("kg", 1.2),
    ("l", 0.33),
    ("c", 0.57),
    ("i", 0.22),
    ("ig", 0.03),
    ("gc", 0.18),
    ("w", 2.0),
    ("rev", 0.21),
    ("tau", 0.3),
];

/// Parameters that describe the economy independently of any calibration target.
pub const STRUCTURAL_PARAMETERS: [&str; 11] = [
    "alpha", "theta", "delta", "delta_g", "growth", "beta", "gy", "igy", "phi", "tfp", "chi",
];

/// Tolerance on `alpha + theta + labour_share = 1` when all three are supplied.
const SHARE_TOLERANCE: f64 = 1e-10;

/// Builds the twelve-equation steady-state system.
pub fn model() -> Result<Model> {
    let builder = VARIABLES
        .iter()
        .fold(Model::builder(), |builder, (name, guess)| builder.variable(*name, *guess));

    builder
        .equation(
            Equation::new("euler", &["r"], &["beta", "growth", "delta"], |x, p| {
                Ok(p[0] / (1.0 + p[1]) * (1.0 + x[0] - p[2]) - 1.0)
            })
            .with_scale(ResidualScale::Unit),
        )
        .equation(
            Equation::new("rental_rate", &["r", "y", "k"], &["alpha"], |x, p| {
                Ok(x[0] - p[0] * ratio(x[1], x[2])?)
            })
            .with_scale(ResidualScale::Unit),
        )
        .equation(Equation::new("wage", &["w", "y", "l"], &["labour_share"], |x, p| {
            Ok(x[0] - p[0] * ratio(x[1], x[2])?)
        }))
        .equation(Equation::new(
            "production",
            &["y", "k", "kg", "l"],
            &["tfp", "alpha", "theta", "labour_share"],
            |x, p| Ok(x[0] - p[0] * pow(x[1], p[1])? * pow(x[2], p[2])? * pow(x[3], p[3])?),
        ))
        .equation(Equation::new(
            "private_investment",
            &["i", "k"],
            &["growth", "delta"],
            |x, p| Ok(x[0] - (p[0] + p[1]) * x[1]),
        ))
        .equation(Equation::new(
            "public_investment",
            &["ig", "kg"],
            &["growth", "delta_g"],
            |x, p| Ok(x[0] - (p[0] + p[1]) * x[1]),
        ))
        .equation(Equation::new(
            "public_investment_rule",
            &["ig", "y"],
            &["igy"],
            |x, p| Ok(x[0] - p[0] * x[1]),
        ))
        .equation(Equation::new(
            "government_consumption_rule",
            &["gc", "y"],
            &["gy"],
            |x, p| Ok(x[0] - p[0] * x[1]),
        ))
        .equation(Equation::new("tax_revenue", &["rev", "tau", "w", "l"], &[], |x, _| {
            Ok(x[0] - x[1] * x[2] * x[3])
        }))
        .equation(Equation::new("government_budget", &["rev", "gc", "ig"], &[], |x, _| {
            Ok(x[0] - x[1] - x[2])
        }))
        .equation(Equation::new(
            "resource_constraint",
            &["y", "c", "i", "gc", "ig"],
            &[],
            |x, _| Ok(x[0] - x[1] - x[2] - x[3] - x[4]),
        ))
        .equation(Equation::new(
            "labour_supply",
            &["l", "tau", "w", "c"],
            &["chi", "phi"],
            |x, p| {
                let consumption = positive(x[3], "consumption must be positive")?;
                Ok(p[0] * pow(x[0], p[1])? - (1.0 - x[1]) * x[2] / consumption)
            },
        )
        .with_scale(ResidualScale::Unit))
        .build()
}

/// Quarterly baseline: 30% private and 5% public capital share, 2% annual growth.
pub fn baseline_targets() -> ParameterSet {
    ParameterSet::new()
        .with("alpha", 0.30)
        .with("theta", 0.05)
        .with("delta", 0.025)
        .with("delta_g", 0.02)
        .with("growth", 0.005)
        .with("beta", 0.99)
        .with("gy", 0.18)
        .with("igy", 0.03)
        .with("phi", 1.0)
        .with("y_target", 1.0)
        .with("l_target", 0.33)
}

/// Derives the labour share, or checks it when the caller supplied one.
fn labour_share(targets: &ParameterSet, parameters: &mut ParameterSet, context: &str) -> Result<f64> {
    let alpha = require_positive("alpha", targets.require("alpha", context)?)?;
    let theta = require_in_unit_interval("theta", targets.require("theta", context)?)?;
    let implied = 1.0 - alpha - theta;

    match targets.get("labour_share") {
        Some(supplied) => {
            let total = alpha + theta + supplied;
            if (total - 1.0).abs() > SHARE_TOLERANCE {
                return Err(SteadyStateError::calibration(
                    "factor shares",
                    total,
                    "alpha + theta + labour_share = 1",
                ));
            }
            require_positive("labour_share", supplied)
        }
        None => {
            let share = require_positive("labour_share", implied)?;
            parameters.derive("labour_share", share)?;
            Ok(share)
        }
    }
}

/// Rental rate implied by the Euler equation on the balanced growth path.
fn rental_rate(targets: &ParameterSet, context: &str) -> Result<f64> {
    let beta = require_positive("beta", targets.require("beta", context)?)?;
    let growth = targets.require("growth", context)?;
    let delta = targets.require("delta", context)?;
    require_positive("r", (1.0 + growth) / beta - 1.0 + delta)
}

/// Closed-form calibration from target output `y_target` and hours `l_target`.
///
/// Derives `labour_share` (unless supplied), `tfp` and `chi`, and pins all twelve
/// variables, so no Newton iteration is needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetedCalibration;

impl AnalyticalResolver for TargetedCalibration {
    fn resolve(&self, targets: &ParameterSet) -> Result<Resolution> {
        const CONTEXT: &str = "targeted calibration";
        let mut parameters = targets.clone();

        let labour_share = labour_share(targets, &mut parameters, CONTEXT)?;
        let alpha = targets.require("alpha", CONTEXT)?;
        let theta = targets.require("theta", CONTEXT)?;
        let y = require_positive("y_target", targets.require("y_target", CONTEXT)?)?;
        let l = require_positive("l_target", targets.require("l_target", CONTEXT)?)?;
        let growth = targets.require("growth", CONTEXT)?;
        let delta = targets.require("delta", CONTEXT)?;
        let delta_g = targets.require("delta_g", CONTEXT)?;
        let gy = require_in_unit_interval("gy", targets.require("gy", CONTEXT)?)?;
        let igy = require_positive("igy", targets.require("igy", CONTEXT)?)?;
        let phi = targets.require("phi", CONTEXT)?;

        let r = rental_rate(targets, CONTEXT)?;
        let k = checked_ratio("k", alpha * y, r)?;
        let i = (growth + delta) * k;
        let ig = igy * y;
        let kg = checked_ratio("kg", ig, growth + delta_g)?;
        let gc = gy * y;
        let w = checked_ratio("w", labour_share * y, l)?;
        let rev = gc + ig;
        let tau = require_in_unit_interval("tau", checked_ratio("tau", rev, w * l)?)?;
        let c = require_positive("c", y - i - gc - ig)?;

        let tfp = checked_ratio(
            "tfp",
            y,
            k.powf(alpha) * kg.powf(theta) * l.powf(labour_share),
        )?;
        let chi = checked_ratio("chi", (1.0 - tau) * w, c * l.powf(phi))?;
        parameters.derive("tfp", tfp)?;
        parameters.derive("chi", chi)?;

        let mut resolution = Resolution::new(parameters);
        for (name, value) in [
            ("r", r),
            ("y", y),
            ("k", k),
            ("kg", kg),
            ("l", l),
            ("c", c),
            ("i", i),
            ("ig", ig),
            ("gc", gc),
            ("w", w),
            ("rev", rev),
            ("tau", tau),
        ] {
            resolution.pin(name, value)?;
        }
        Ok(resolution)
    }
}

/// Calibration from structural parameters, with `tfp` and `chi` given.
///
/// Only the rental rate has a closed form; the other eleven variables are left
/// to the numerical stage.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralCalibration;

impl AnalyticalResolver for StructuralCalibration {
    fn resolve(&self, targets: &ParameterSet) -> Result<Resolution> {
        const CONTEXT: &str = "structural calibration";
        let mut parameters = targets.clone();
        labour_share(targets, &mut parameters, CONTEXT)?;
        let r = rental_rate(targets, CONTEXT)?;

        let mut resolution = Resolution::new(parameters);
        resolution.pin("r", r)?;
        Ok(resolution)
    }
}

/// Problem that calibrates by targeting and solves in closed form.
pub fn closed_form_problem() -> Result<SteadyStateProblem<TargetedCalibration>> {
    Ok(SteadyStateProblem::new(model()?, TargetedCalibration))
}

/// Problem that takes structural parameters and solves hours numerically.
pub fn numerical_problem() -> Result<SteadyStateProblem<StructuralCalibration>> {
    Ok(SteadyStateProblem::new(model()?, StructuralCalibration))
}

/// Structural parameters of a calibrated steady state, without its targets.
pub fn structural_parameters(calibrated: &SteadyState) -> Result<ParameterSet> {
    calibrated
        .parameters()
        .restrict(STRUCTURAL_PARAMETERS.iter().copied())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::steady_state::InitialGuess;
    use crate::SolverConfig;

    #[test]
    fn model_declares_a_square_system() {
        let model = model().unwrap();
        assert_eq!(model.variables().len(), 12);
        assert_eq!(model.equations().len(), 12);
        assert_eq!(model.index_of("tau"), Some(11));
    }

    #[test]
    fn targeted_calibration_pins_every_variable() {
        let resolution = TargetedCalibration.resolve(&baseline_targets()).unwrap();
        assert_eq!(resolution.pinned_count(), 12);
        assert!(resolution.parameters.is_derived("labour_share"));
        assert!(resolution.parameters.is_derived("tfp"));
        assert!(resolution.parameters.is_derived("chi"));
        assert_relative_eq!(
            resolution.parameters.get("labour_share").unwrap(),
            0.65,
            epsilon = 1e-15
        );
    }

    #[test]
    fn explicit_consistent_labour_share_is_accepted() {
        let targets = baseline_targets().with("labour_share", 0.65);
        let resolution = TargetedCalibration.resolve(&targets).unwrap();
        assert!(!resolution.parameters.is_derived("labour_share"));
    }

    #[test]
    fn structural_calibration_pins_only_the_rental_rate() {
        let calibrated = closed_form_problem()
            .unwrap()
            .compute_steady_state(
                &baseline_targets(),
                &InitialGuess::new(),
                &SolverConfig::default(),
            )
            .unwrap();
        let structural = structural_parameters(&calibrated).unwrap();
        let resolution = StructuralCalibration.resolve(&structural).unwrap();

        assert_eq!(resolution.pinned_count(), 1);
        assert_relative_eq!(
            resolution.pinned_value("r").unwrap(),
            calibrated.value("r").unwrap(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn excessive_government_spending_leaves_no_consumption() {
        let targets = baseline_targets().with("gy", 0.8);
        match TargetedCalibration.resolve(&targets) {
            Err(SteadyStateError::Calibration { quantity, .. }) => {
                // The tax needed to finance spending exceeds labour income first.
                assert_eq!(quantity, "tau");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn negative_rental_rate_is_rejected() {
        let targets = baseline_targets().with("beta", 1.2).with("delta", 0.0);
        assert!(matches!(
            TargetedCalibration.resolve(&targets),
            Err(SteadyStateError::Calibration { ref quantity, .. }) if quantity == "r"
        ));
    }
}
